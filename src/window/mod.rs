//! # Window model
//!
//! Plain data mirrors of the X windows the compositor draws. The X protocol
//! glue fills these in from events; the render pipeline only reads them,
//! except for the per-window image caches and the accumulated damage, which
//! the renderer owns.
//!
//! All regions stored on a [`Window`] are in window local coordinates: the
//! top-left corner of the window, border included, is `(0, 0)`.

pub mod animation;
pub mod preset;
pub mod stack;

use log::trace;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::backend::ImageHandle;
use crate::region::{Rect, Region};
use crate::types::{IBox, IVec2, Vec2};

pub use animation::{
    AnimationConfig, AnimationSet, AnimationTrigger, AnimationUpdate, RunningAnimation,
    WindowAnimation, WindowOutput, CONTEXT_VARIABLES,
};
pub use preset::{AnimationPreset, Direction};
pub use stack::WindowStack;

/// X window id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId(pub u32);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Identity of a window instance across frames. X reuses window ids, the
/// generation tells two windows with the same id apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerKey {
    pub window: WindowId,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowState {
    Unmapped,
    Mapped,
    /// Destroyed on the X side, kept around until its close animation ends.
    Destroyed,
}

/// How much of a window is see-through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowMode {
    /// Fully opaque.
    Solid,
    /// The frame is transparent, the client area is not.
    FrameTrans,
    /// The whole window may be transparent.
    Trans,
}

/// Per-window options resolved from rules and configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowOptions {
    /// Whether to draw the window at all.
    pub paint: bool,
    pub shadow: bool,
    /// Draw the shadow under the window body too.
    pub full_shadow: bool,
    pub blur_background: bool,
    pub corner_radius: f64,
    /// Dim amount in `[0, 1]`.
    pub dim: f64,
    pub invert_color: bool,
    /// Name of a custom shader to draw the window with.
    pub shader: Option<String>,
    /// Transparent parts of this window cut through windows below it.
    pub transparent_clipping: bool,
    /// This window hides the shadows of windows stacked above it.
    pub clip_shadow_above: bool,
    /// Run generated fade animations for this window.
    pub fade: bool,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            paint: true,
            shadow: false,
            full_shadow: false,
            blur_background: false,
            corner_radius: 0.0,
            dim: 0.0,
            invert_color: false,
            shader: None,
            transparent_clipping: false,
            clip_shadow_above: false,
            fade: true,
        }
    }
}

/// Frame extents as reported by `_NET_FRAME_EXTENTS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameExtents {
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
}

/// Window geometry. `width` and `height` exclude the X border.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub border_width: i32,
}

impl Geometry {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            border_width: 0,
        }
    }

    /// Width including the border.
    pub fn width_b(&self) -> i32 {
        self.width + self.border_width * 2
    }

    /// Height including the border.
    pub fn height_b(&self) -> i32 {
        self.height + self.border_width * 2
    }

    pub fn origin(&self) -> IVec2 {
        IVec2::new(self.x, self.y)
    }

    pub fn size_b(&self) -> IVec2 {
        IVec2::new(self.width_b(), self.height_b())
    }
}

/// Values captured at the end of the last animation update, used to
/// detect changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PreviousState {
    pub state: WindowState,
    pub opacity: f64,
    pub geometry: Geometry,
}

/// Monitor layout of the screen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Monitors {
    boxes: Vec<IBox>,
}

impl Monitors {
    pub fn new(boxes: Vec<IBox>) -> Self {
        Self { boxes }
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<IBox> {
        self.boxes.get(index).copied()
    }

    /// Index of the first monitor `b` lies entirely within.
    pub fn find(&self, b: IBox) -> Option<usize> {
        let found = self.boxes.iter().position(|m| m.contains(&b));
        trace!("{:?} is on monitor {:?}", b, found);
        found
    }
}

/// A top-level window.
#[derive(Debug)]
pub struct Window {
    pub id: WindowId,
    pub name: String,
    pub options: WindowOptions,
    pub state: WindowState,
    pub geometry: Geometry,
    pub frame_extents: FrameExtents,
    /// The window's visual has an alpha channel.
    pub has_alpha: bool,
    /// Whether the window manager frames a client window inside this one.
    pub has_client: bool,
    pub client_has_alpha: bool,
    /// Opacity the window is drawn at when no animation overrides it.
    /// Zero while the window is unmapped.
    pub opacity: f64,
    /// Opacity set through `_NET_WM_WINDOW_OPACITY` and rules.
    pub target_opacity: f64,
    pub frame_opacity: f64,
    pub shadow_opacity: f64,
    /// Shadow position relative to the window origin.
    pub shadow_offset: IVec2,
    /// Shadow blur radius; the shadow extends this far past the window.
    pub shadow_radius: i32,
    /// Shape of the window, window local.
    pub bounding_shape: Region,
    /// Set when the shape comes from the X Shape extension.
    pub bounding_shaped: bool,
    /// Content damage not yet picked up by a layout, window local.
    pub damaged: Region,
    pub ever_damaged: bool,
    /// The window is being opened or closed, as opposed to shown or hidden.
    pub in_openclose: bool,
    /// X pixmap holding the window content.
    pub pixmap: Option<u32>,
    /// The pixmap changed and `win_image` must be rebound.
    pub pixmap_stale: bool,
    pub win_image: Option<ImageHandle>,
    /// Old content, kept for animations blending from it.
    pub saved_win_image: Option<ImageHandle>,
    /// Current size over the size of `saved_win_image`.
    pub saved_image_scale: Vec2,
    pub mask_image: Option<ImageHandle>,
    pub shadow_image: Option<ImageHandle>,
    pub(crate) previous: PreviousState,
    pub(crate) animation: Option<RunningAnimation>,
}

impl Window {
    /// Creates an unmapped window with a rectangular shape.
    pub fn new(id: WindowId, geometry: Geometry) -> Self {
        Self {
            id,
            name: String::new(),
            options: WindowOptions::default(),
            state: WindowState::Unmapped,
            geometry,
            frame_extents: FrameExtents::default(),
            has_alpha: false,
            has_client: true,
            client_has_alpha: false,
            opacity: 0.0,
            target_opacity: 1.0,
            frame_opacity: 1.0,
            shadow_opacity: 0.75,
            shadow_offset: IVec2::new(-15, -15),
            shadow_radius: 12,
            bounding_shape: Region::from_xywh(0, 0, geometry.width_b(), geometry.height_b()),
            bounding_shaped: false,
            damaged: Region::new(),
            ever_damaged: false,
            in_openclose: true,
            pixmap: None,
            pixmap_stale: false,
            win_image: None,
            saved_win_image: None,
            saved_image_scale: Vec2::IDENTITY,
            mask_image: None,
            shadow_image: None,
            previous: PreviousState {
                state: WindowState::Unmapped,
                opacity: 0.0,
                geometry,
            },
            animation: None,
        }
    }

    pub fn width_b(&self) -> i32 {
        self.geometry.width_b()
    }

    pub fn height_b(&self) -> i32 {
        self.geometry.height_b()
    }

    /// The window's box in screen coordinates, border included.
    pub fn extents(&self) -> IBox {
        IBox::new(self.geometry.origin(), self.geometry.size_b())
    }

    /// Size of the shadow image.
    pub fn shadow_size(&self) -> IVec2 {
        IVec2::new(
            self.width_b() + self.shadow_radius * 2,
            self.height_b() + self.shadow_radius * 2,
        )
    }

    pub fn is_mapped(&self) -> bool {
        self.state == WindowState::Mapped
    }

    pub fn map(&mut self) {
        self.state = WindowState::Mapped;
        self.opacity = self.target_opacity;
    }

    pub fn unmap(&mut self) {
        self.state = WindowState::Unmapped;
        self.in_openclose = false;
        self.opacity = 0.0;
    }

    pub fn destroy(&mut self) {
        self.state = WindowState::Destroyed;
        self.in_openclose = true;
        self.opacity = 0.0;
    }

    /// Changes the window's opacity property. Takes effect immediately on
    /// a mapped window.
    pub fn set_opacity(&mut self, opacity: f64) {
        self.target_opacity = opacity.clamp(0.0, 1.0);
        if self.is_mapped() {
            self.opacity = self.target_opacity;
        }
    }

    /// Moves and resizes the window. An unshaped window's bounding shape
    /// follows its size. Cached mask and shadow images are dropped from
    /// the window and returned when the size changed, the pixmap is
    /// marked stale.
    pub fn configure(&mut self, geometry: Geometry) -> Vec<ImageHandle> {
        let resized = geometry.size_b() != self.geometry.size_b();
        self.geometry = geometry;
        let mut stale = Vec::new();
        if resized {
            if !self.bounding_shaped {
                self.bounding_shape =
                    Region::from_xywh(0, 0, geometry.width_b(), geometry.height_b());
            }
            stale.extend(self.mask_image.take());
            stale.extend(self.shadow_image.take());
            self.pixmap_stale = true;
        }
        stale
    }

    /// Records content damage, window local.
    pub fn add_damage(&mut self, damage: &Region) {
        self.damaged.union_with(damage);
        self.ever_damaged = true;
    }

    /// Damages the whole window.
    pub fn damage_all(&mut self) {
        let all = Region::from_xywh(0, 0, self.width_b(), self.height_b());
        self.add_damage(&all);
    }

    pub fn has_frame(&self) -> bool {
        self.geometry.border_width != 0
            || self.frame_extents.top != 0
            || self.frame_extents.left != 0
            || self.frame_extents.right != 0
            || self.frame_extents.bottom != 0
    }

    pub fn calc_mode(&self) -> WindowMode {
        if self.has_alpha {
            if !self.has_client || self.client_has_alpha {
                return WindowMode::Trans;
            }
            if self.has_frame() {
                return WindowMode::FrameTrans;
            }
            // The frame has zero size, so the window is solid after all.
        }
        if self.frame_opacity != 1.0 && self.has_frame() {
            return WindowMode::FrameTrans;
        }
        WindowMode::Solid
    }

    /// Frame extents with the X border folded in.
    pub fn effective_frame_extents(&self) -> FrameExtents {
        let bw = self.geometry.border_width;
        FrameExtents {
            left: self.frame_extents.left.max(bw),
            right: self.frame_extents.right.max(bw),
            top: self.frame_extents.top.max(bw),
            bottom: self.frame_extents.bottom.max(bw),
        }
    }

    /// The frame of the window, window local.
    pub fn frame_region_local(&self) -> Region {
        let e = self.effective_frame_extents();
        let (w, h) = (self.width_b(), self.height_b());
        let mut frame = Region::from_rects([
            Rect::new(0, 0, w, e.top),
            Rect::new(0, h - e.bottom, w, h),
            Rect::new(0, 0, e.left, h),
            Rect::new(w - e.right, 0, w, h),
        ]);
        frame.intersect_rect(Rect::new(0, 0, w, h));
        frame
    }

    /// Width of the border drawn along rounded corners. Window managers
    /// that draw borders as frames report them in the frame extents.
    pub fn border_width(&self) -> i32 {
        if self.geometry.border_width != 0 {
            return self.geometry.border_width;
        }
        self.frame_extents
            .left
            .min(self.frame_extents.right)
            .min(self.frame_extents.bottom)
    }

    /// Current value of an animated property: the running animation's
    /// output if it has one, the static default otherwise.
    pub fn animatable(&self, output: WindowOutput) -> f64 {
        if let Some(value) = self.animation.as_ref().and_then(|a| a.output(output)) {
            return value;
        }
        match output {
            WindowOutput::BlurOpacity => {
                if self.is_mapped() {
                    1.0
                } else {
                    0.0
                }
            }
            WindowOutput::Opacity | WindowOutput::ShadowOpacity => self.opacity,
            WindowOutput::OffsetX
            | WindowOutput::OffsetY
            | WindowOutput::ShadowOffsetX
            | WindowOutput::ShadowOffsetY
            | WindowOutput::CropX
            | WindowOutput::CropY
            | WindowOutput::SavedImageBlend => 0.0,
            WindowOutput::ScaleX
            | WindowOutput::ScaleY
            | WindowOutput::ShadowScaleX
            | WindowOutput::ShadowScaleY => 1.0,
            WindowOutput::CropWidth | WindowOutput::CropHeight => f64::INFINITY,
        }
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    /// Images owned by this window, for release when it goes away.
    pub fn take_images(&mut self) -> Vec<ImageHandle> {
        [
            self.win_image.take(),
            self.saved_win_image.take(),
            self.mask_image.take(),
            self.shadow_image.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Removes `radius`×`radius` squares at the four corners of a window of
/// `size` whose top-left corner is at `origin` in `region`'s coordinates.
pub fn remove_corners(region: &mut Region, origin: IVec2, size: IVec2, radius: i32) {
    if radius <= 0 || region.is_empty() {
        return;
    }
    let corners = [(0, 0), (0, 1), (1, 0), (1, 1)].map(|(i, j)| {
        let x1 = origin.x + i * (size.x - radius);
        let y1 = origin.y + j * (size.y - radius);
        Rect::new(x1, y1, x1 + radius, y1 + radius)
    });
    region.subtract_with(&Region::from_rects(corners));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed_window() -> Window {
        let mut w = Window::new(WindowId(1), Geometry::new(10, 20, 100, 80));
        w.frame_extents = FrameExtents {
            left: 2,
            right: 2,
            top: 10,
            bottom: 2,
        };
        w
    }

    #[test]
    fn test_mode() {
        let mut w = framed_window();
        assert_eq!(w.calc_mode(), WindowMode::Solid);

        w.frame_opacity = 0.5;
        assert_eq!(w.calc_mode(), WindowMode::FrameTrans);

        w.frame_opacity = 1.0;
        w.has_alpha = true;
        assert_eq!(w.calc_mode(), WindowMode::FrameTrans);

        w.client_has_alpha = true;
        assert_eq!(w.calc_mode(), WindowMode::Trans);

        w.client_has_alpha = false;
        w.has_client = false;
        assert_eq!(w.calc_mode(), WindowMode::Trans);
    }

    #[test]
    fn test_alpha_without_frame_is_solid() {
        let mut w = Window::new(WindowId(1), Geometry::new(0, 0, 10, 10));
        w.has_alpha = true;
        assert_eq!(w.calc_mode(), WindowMode::Solid);
    }

    #[test]
    fn test_frame_region() {
        let w = framed_window();
        let frame = w.frame_region_local();
        let client = Region::from_xywh(2, 10, 96, 68);
        assert_eq!(frame.area() + client.area(), 100 * 80);
        assert!(frame.intersect(&client).is_empty());
    }

    #[test]
    fn test_frame_region_border() {
        let mut w = Window::new(WindowId(1), Geometry::new(0, 0, 10, 10));
        w.geometry.border_width = 1;
        assert_eq!(w.frame_region_local().area(), 12 * 12 - 10 * 10);
        assert_eq!(w.border_width(), 1);
    }

    #[test]
    fn test_remove_corners() {
        let mut region = Region::from_xywh(5, 5, 20, 10);
        remove_corners(&mut region, IVec2::new(5, 5), IVec2::new(20, 10), 3);
        assert_eq!(region.area(), 200 - 4 * 9);
        assert!(!region.contains_point(5, 5));
        assert!(!region.contains_point(24, 14));
        assert!(region.contains_point(8, 5));
    }

    #[test]
    fn test_configure_drops_cached_images() {
        let mut w = Window::new(WindowId(1), Geometry::new(0, 0, 10, 10));
        w.mask_image = Some(ImageHandle::from_raw(7));
        assert!(w.configure(Geometry::new(5, 5, 10, 10)).is_empty());
        assert_eq!(w.mask_image, Some(ImageHandle::from_raw(7)));

        let stale = w.configure(Geometry::new(5, 5, 20, 10));
        assert_eq!(stale, vec![ImageHandle::from_raw(7)]);
        assert_eq!(w.bounding_shape, Region::from_xywh(0, 0, 20, 10));
        assert!(w.pixmap_stale);
    }

    #[test]
    fn test_default_animatables() {
        let mut w = Window::new(WindowId(1), Geometry::new(0, 0, 10, 10));
        w.set_opacity(0.8);
        assert_eq!(w.animatable(WindowOutput::BlurOpacity), 0.0);
        assert_eq!(w.animatable(WindowOutput::Opacity), 0.0);
        w.map();
        assert_eq!(w.animatable(WindowOutput::BlurOpacity), 1.0);
        assert_eq!(w.animatable(WindowOutput::ShadowOpacity), 0.8);
        assert_eq!(w.animatable(WindowOutput::ScaleY), 1.0);
        assert!(w.animatable(WindowOutput::CropWidth).is_infinite());
    }

    #[test]
    fn test_find_monitor() {
        let monitors = Monitors::new(vec![
            IBox::from_xywh(0, 0, 100, 100),
            IBox::from_xywh(100, 0, 100, 100),
        ]);
        assert_eq!(monitors.find(IBox::from_xywh(110, 10, 50, 50)), Some(1));
        assert_eq!(monitors.find(IBox::from_xywh(90, 10, 50, 50)), None);
    }
}
