//! # Rendering backends
//!
//! The renderer only talks to the GPU (or X Render, or nothing at all)
//! through the [`Backend`] trait. Images are opaque handles owned by the
//! backend; the renderer asks for images, fills them, and hands them back
//! with [`Backend::release_image`].
//!
//! Every drawing operation takes a *target mask*: the region of the target
//! image, in target coordinates, that the operation may modify. Blits and
//! blurs can additionally take a *source mask* image that restricts which
//! source pixels participate.

pub mod dummy;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::time::Duration;
use thiserror::Error;

use crate::region::Region;
use crate::types::{Color, IVec2, Vec2};

pub use dummy::DummyBackend;

/// Opaque reference to an image owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageHandle(u64);

impl ImageHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image#{}", self.0)
    }
}

/// Opaque reference to a compiled custom shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub u64);

/// Opaque reference to backend blur state (kernels, intermediate textures).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlurContextHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// Normal rendering format, also used by bound X pixmaps.
    Pixmap,
    /// Like `Pixmap` with more bits per channel. Optional.
    PixmapHigh,
    /// Single channel format for masks.
    Mask,
}

/// What an image can be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageCapabilities {
    /// Can be sampled from: required for blit and blur sources.
    pub src: bool,
    /// Can be rendered to: required for every operation target.
    pub dst: bool,
}

/// Backend limitations the renderer works around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendQuirks(u32);

impl BackendQuirks {
    pub const NONE: BackendQuirks = BackendQuirks(0);
    /// Blur is slow: shadows are generated on the CPU instead.
    pub const SLOW_BLUR: BackendQuirks = BackendQuirks(1);

    pub fn contains(self, other: BackendQuirks) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for BackendQuirks {
    type Output = BackendQuirks;

    fn bitor(self, rhs: Self) -> Self {
        BackendQuirks(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlurMethod {
    #[default]
    None,
    Box,
    Gaussian,
    DualKawase,
}

/// Parameters of a blur context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlurParams {
    Box { size: i32 },
    Gaussian { size: i32, deviation: f64 },
    DualKawase { strength: i32 },
}

impl BlurParams {
    /// Number of pixels a blur of these parameters reads beyond the edge of
    /// its target mask, in each direction.
    pub fn reach(&self) -> IVec2 {
        let r = match *self {
            BlurParams::Box { size } | BlurParams::Gaussian { size, .. } => size,
            // Each kawase iteration halves the image and samples one
            // pixel further out.
            BlurParams::DualKawase { strength } => (1 << (strength.clamp(1, 20) + 1)) * 3 / 2,
        };
        IVec2::new(r, r)
    }
}

/// Standard deviation of a gaussian kernel of radius `size` whose edge
/// weight relative to the center is `edge`.
pub fn gaussian_kernel_std_for_size(size: f64, edge: f64) -> f64 {
    if size <= 0.0 {
        return 0.0;
    }
    (size * size / (-2.0 * edge.ln())).sqrt()
}

/// A mask image for a blit or blur. Only source pixels covered by the mask
/// participate in the operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskImage {
    pub image: ImageHandle,
    /// Origin of the mask image in source image coordinates.
    pub origin: IVec2,
    /// The corners of the mask are rounded by this radius.
    pub corner_radius: f64,
    pub inverted: bool,
}

/// Effect parameters of a blit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlitParams {
    pub opacity: f64,
    pub dim: f64,
    /// The source is normalized so its maximum brightness is this value.
    pub max_brightness: f64,
    pub scale: Vec2,
    /// Corner radius of the source before scaling.
    pub corner_radius: f64,
    /// Size of the source before scaling, where its corners are. Sources
    /// smaller than this are tiled.
    pub effective_size: IVec2,
    /// Border drawn along rounded corners, before scaling.
    pub border_width: i32,
    pub color_inverted: bool,
    pub shader: Option<ShaderHandle>,
}

impl Default for BlitParams {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            dim: 0.0,
            max_brightness: 1.0,
            scale: Vec2::IDENTITY,
            corner_radius: 0.0,
            effective_size: IVec2::ZERO,
            border_width: 0,
            color_inverted: false,
            shader: None,
        }
    }
}

/// Arguments of [`Backend::blit`].
#[derive(Debug, Clone, Copy)]
pub struct BlitArgs<'a> {
    pub source_image: ImageHandle,
    pub source_mask: Option<MaskImage>,
    /// Region of the target that may be modified, in target coordinates.
    pub target_mask: &'a Region,
    pub params: BlitParams,
}

/// Arguments of [`Backend::blur`].
#[derive(Debug, Clone, Copy)]
pub struct BlurArgs<'a> {
    pub blur_context: BlurContextHandle,
    pub source_image: ImageHandle,
    pub source_mask: Option<MaskImage>,
    pub target_mask: &'a Region,
    pub opacity: f64,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to allocate {format:?} image of size {}x{}", .size.x, .size.y)]
    ImageAllocation { format: ImageFormat, size: IVec2 },
    #[error("{0} is not a valid image")]
    InvalidImage(ImageHandle),
    #[error("{op} failed: {reason}")]
    Operation { op: &'static str, reason: String },
    #[error("failed to create blur context: {0}")]
    BlurContext(String),
    #[error("failed to present the frame: {0}")]
    Present(String),
}

/// A rendering backend.
pub trait Backend {
    fn name(&self) -> &str;

    /// Creates a new, uninitialized image.
    fn new_image(&mut self, format: ImageFormat, size: IVec2) -> Result<ImageHandle, BackendError>;

    fn release_image(&mut self, image: ImageHandle);

    /// Binds an X pixmap as an image. The image has `Pixmap` format and
    /// can not be rendered to.
    fn bind_pixmap(&mut self, pixmap: u32, size: IVec2) -> Result<ImageHandle, BackendError>;

    /// The image that is shown by [`Backend::present`].
    fn back_buffer(&mut self) -> ImageHandle;

    /// Called when a new frame starts, with the region that will be
    /// repainted.
    fn prepare(&mut self, _damage: &Region) {}

    fn blit(
        &mut self,
        origin: IVec2,
        target: ImageHandle,
        args: &BlitArgs<'_>,
    ) -> Result<(), BackendError>;

    fn blur(
        &mut self,
        origin: IVec2,
        target: ImageHandle,
        args: &BlurArgs<'_>,
    ) -> Result<(), BackendError>;

    /// Copies pixels without any effects or blending. `region` is in target
    /// coordinates.
    fn copy_area(
        &mut self,
        origin: IVec2,
        target: ImageHandle,
        source: ImageHandle,
        region: &Region,
    ) -> Result<(), BackendError>;

    /// Like [`Backend::copy_area`], for copying from a high precision image
    /// to a low precision one. May dither.
    fn copy_area_quantize(
        &mut self,
        origin: IVec2,
        target: ImageHandle,
        source: ImageHandle,
        region: &Region,
    ) -> Result<(), BackendError> {
        self.copy_area(origin, target, source, region)
    }

    /// Fills an image with `color`. Mask images only use the alpha channel.
    fn clear(&mut self, target: ImageHandle, color: Color) -> Result<(), BackendError>;

    fn present(&mut self) -> Result<(), BackendError>;

    /// Age of the back buffer's content in frames. `None` or zero means the
    /// content is undefined.
    fn buffer_age(&self) -> Option<usize>;

    /// Largest buffer age this backend can report.
    fn max_buffer_age(&self) -> usize;

    /// How long the last frame took on the GPU, once it finished. `None`
    /// while the backend is still busy with it.
    fn last_render_time(&mut self) -> Option<Duration>;

    fn is_format_supported(&self, format: ImageFormat) -> bool {
        format != ImageFormat::PixmapHigh
    }

    fn image_capabilities(&self, image: ImageHandle) -> ImageCapabilities;

    fn quirks(&self) -> BackendQuirks {
        BackendQuirks::NONE
    }

    fn create_blur_context(
        &mut self,
        method: BlurMethod,
        format: ImageFormat,
        params: &BlurParams,
    ) -> Result<BlurContextHandle, BackendError>;

    fn destroy_blur_context(&mut self, context: BlurContextHandle);

    /// How far outside its target a blur with this context reads.
    fn blur_size(&self, context: BlurContextHandle) -> IVec2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quirks() {
        let quirks = BackendQuirks::NONE | BackendQuirks::SLOW_BLUR;
        assert!(quirks.contains(BackendQuirks::SLOW_BLUR));
        assert!(!BackendQuirks::NONE.contains(BackendQuirks::SLOW_BLUR));
    }

    #[test]
    fn test_gaussian_deviation() {
        let std = gaussian_kernel_std_for_size(12.0, 0.5 / 256.0);
        // Weight at the kernel edge is the requested fraction of the center.
        let edge = (-(12.0f64 * 12.0) / (2.0 * std * std)).exp();
        assert!((edge - 0.5 / 256.0).abs() < 1e-12);
        assert_eq!(gaussian_kernel_std_for_size(0.0, 0.5), 0.0);
    }

    #[test]
    fn test_blur_reach() {
        assert_eq!(BlurParams::Box { size: 3 }.reach(), IVec2::new(3, 3));
        assert_eq!(BlurParams::DualKawase { strength: 1 }.reach(), IVec2::new(6, 6));
    }
}
