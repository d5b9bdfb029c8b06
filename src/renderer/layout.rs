//! Per-frame window layouts
//!
//! Windows form a stack, so the final screen can be thought of as a series
//! of layers stacked on top of each other. Each layer is the size of the
//! screen and holds a single window; the rest of the layer is transparent.
//!
//! The [`LayoutManager`] keeps the layouts of the last few frames in a ring
//! buffer and links each layer to the layer of the same window in the
//! previous and next layout. The damage engine follows these links to find
//! out what changed since a buffer was last drawn.

use log::trace;
use std::collections::HashMap;

use super::command::RenderCommand;
use crate::region::Region;
use crate::types::{IBox, IVec2, Vec2};
use crate::window::{LayerKey, Window, WindowMode, WindowOptions, WindowOutput, WindowStack};

/// One window's contribution to a frame.
#[derive(Debug, Clone)]
pub struct Layer {
    /// Identity of the window drawn in this layer.
    pub key: LayerKey,
    pub options: WindowOptions,
    pub mode: WindowMode,
    /// Window shape, window local.
    pub bounding_shape: Region,
    /// Window frame, window local.
    pub frame: Region,
    pub frame_opacity: f64,
    pub border_width: i32,
    pub saved_image_scale: Vec2,
    /// The window's own box, ignoring animations. Used to find its monitor.
    pub extents: IBox,
    /// Damaged region of this layer, in screen coordinates.
    pub damaged: Region,
    /// Window rectangle in screen coordinates, before it's scaled.
    pub window: IBox,
    /// Shadow rectangle in screen coordinates, before it's scaled.
    pub shadow: IBox,
    /// Scale of the window, about its top-left corner.
    pub scale: Vec2,
    /// Scale of the shadow, about its top-left corner.
    pub shadow_scale: Vec2,
    pub opacity: f64,
    pub blur_opacity: f64,
    pub shadow_opacity: f64,
    /// How much of the window's saved image is blended into its image.
    pub saved_image_blend: f64,
    /// Content of this layer is cropped to this box, screen coordinates.
    pub crop: IBox,
    /// How many commands draw this layer.
    pub number_of_commands: usize,
    /// Index of this window's layer in the previous layout.
    pub prev_rank: Option<usize>,
    /// Index of this window's layer in the next layout.
    pub next_rank: Option<usize>,
    pub is_opaque: bool,
}

impl Layer {
    /// Builds the layer for `w` on a screen of `size`, or `None` if the
    /// window is not drawn. The window's pending damage is moved into the
    /// layer either way.
    pub fn from_window(w: &mut Window, key: LayerKey, size: IVec2) -> Option<Layer> {
        let damaged = std::mem::take(&mut w.damaged);
        if !w.ever_damaged || !w.options.paint || w.win_image.is_none() {
            return None;
        }

        let scale = Vec2::new(
            w.animatable(WindowOutput::ScaleX),
            w.animatable(WindowOutput::ScaleY),
        );
        let window = IBox::new(
            Vec2::new(
                w.geometry.x as f64 + w.animatable(WindowOutput::OffsetX),
                w.geometry.y as f64 + w.animatable(WindowOutput::OffsetY),
            )
            .as_ivec2(),
            IVec2::new(w.width_b(), w.height_b()),
        );
        let crop = IBox::new(
            Vec2::new(
                w.animatable(WindowOutput::CropX),
                w.animatable(WindowOutput::CropY),
            )
            .as_ivec2(),
            Vec2::new(
                w.animatable(WindowOutput::CropWidth),
                w.animatable(WindowOutput::CropHeight),
            )
            .as_ivec2(),
        );
        let (shadow, shadow_scale) = if w.options.shadow {
            let origin = Vec2::new(
                (w.geometry.x + w.shadow_offset.x) as f64
                    + w.animatable(WindowOutput::ShadowOffsetX),
                (w.geometry.y + w.shadow_offset.y) as f64
                    + w.animatable(WindowOutput::ShadowOffsetY),
            );
            (
                IBox::new(origin.as_ivec2(), w.shadow_size()),
                Vec2::new(
                    w.animatable(WindowOutput::ShadowScaleX),
                    w.animatable(WindowOutput::ShadowScaleY),
                ),
            )
        } else {
            (IBox::default(), Vec2::IDENTITY)
        };

        let screen = IBox::new(IVec2::ZERO, size);
        let window_scaled = IBox::new(window.origin, window.size.scale_floor(scale));
        if !window_scaled.overlaps(&screen) || !crop.overlaps(&screen) {
            trace!("{} is off screen", w.id);
            return None;
        }

        let opacity = w.animatable(WindowOutput::Opacity);
        let blur_opacity = w.animatable(WindowOutput::BlurOpacity);
        let shadow_opacity =
            w.animatable(WindowOutput::ShadowOpacity) * w.shadow_opacity * w.frame_opacity;
        if opacity == 0.0 && blur_opacity == 0.0 {
            return None;
        }
        let saved_image_blend = if w.saved_win_image.is_some() {
            w.animatable(WindowOutput::SavedImageBlend)
        } else {
            0.0
        };

        // Shaped windows can have a very large number of rectangles, they
        // are treated as transparent.
        let is_opaque = !w.has_alpha && opacity == 1.0 && !w.bounding_shaped;

        Some(Layer {
            key,
            options: w.options.clone(),
            mode: w.calc_mode(),
            bounding_shape: w.bounding_shape.clone(),
            frame: w.frame_region_local(),
            frame_opacity: w.frame_opacity,
            border_width: w.border_width(),
            saved_image_scale: w.saved_image_scale,
            extents: w.extents(),
            damaged: damaged.translated(window.origin),
            window,
            shadow,
            scale,
            shadow_scale,
            opacity,
            blur_opacity,
            shadow_opacity,
            saved_image_blend,
            crop,
            number_of_commands: 0,
            prev_rank: None,
            next_rank: None,
            is_opaque,
        })
    }
}

/// Layout of windows at one frame.
#[derive(Debug, Default)]
pub struct Layout {
    pub size: IVec2,
    /// Generation of the root background image this layout was drawn with.
    pub root_image_generation: u64,
    /// Layers from bottom to top.
    pub layers: Vec<Layer>,
    /// Commands drawing this layout, grouped by layer in layer order.
    pub commands: Vec<RenderCommand>,
    /// Index of the first command of the bottom layer. Commands before
    /// it draw the background.
    pub first_layer_start: usize,
}

impl Layout {
    /// Range of `commands` drawing layer `index`. Only valid once commands
    /// were built.
    pub fn layer_commands(&self, index: usize) -> std::ops::Range<usize> {
        let start = self.first_layer_start
            + self.layers[..index]
                .iter()
                .map(|l| l.number_of_commands)
                .sum::<usize>();
        start..start + self.layers[index].number_of_commands
    }
}

/// Ring buffer of the layouts of recent frames.
#[derive(Debug)]
pub struct LayoutManager {
    layouts: Vec<Layout>,
    /// Index of the most recent layout in `layouts`.
    current: usize,
    /// Window identity to its layer index in the current layout.
    indices: HashMap<LayerKey, usize>,
}

impl LayoutManager {
    /// Creates a manager that remembers layouts up to `max_buffer_age`
    /// frames old.
    pub fn new(max_buffer_age: usize) -> Self {
        let layouts = (0..=max_buffer_age).map(|_| Layout::default()).collect();
        Self {
            layouts,
            current: 0,
            indices: HashMap::new(),
        }
    }

    pub fn max_buffer_age(&self) -> usize {
        self.layouts.len() - 1
    }

    /// Computes the layout of the windows in `stack` and makes it the
    /// current one, evicting the oldest layout.
    pub fn append_layout(&mut self, stack: &mut WindowStack, root_image_generation: u64, size: IVec2) {
        let len = self.layouts.len();
        let prev = self.current;
        self.current = (self.current + 1) % len;
        let cur = self.current;

        let mut layers = std::mem::take(&mut self.layouts[cur].layers);
        layers.clear();
        let order = stack.render_order().to_vec();
        for id in order {
            let Some(key) = stack.key(id) else {
                continue;
            };
            let Some(w) = stack.get_mut(id) else {
                continue;
            };
            let Some(mut layer) = Layer::from_window(w, key, size) else {
                continue;
            };
            if let Some(&index) = self.indices.get(&key) {
                if let Some(prev_layer) = self.layouts[prev].layers.get_mut(index) {
                    prev_layer.next_rank = Some(layers.len());
                    layer.prev_rank = Some(index);
                }
            }
            layers.push(layer);
        }

        // Windows still present move to their new index, vanished ones are
        // forgotten, new ones are added.
        let prev_layers = &self.layouts[prev].layers;
        self.indices.retain(|_, index| {
            match prev_layers.get(*index).and_then(|l| l.next_rank) {
                Some(next) => {
                    *index = next;
                    true
                }
                None => false,
            }
        });
        for (i, layer) in layers.iter().enumerate() {
            if layer.prev_rank.is_none() {
                self.indices.insert(layer.key, i);
            }
        }

        let layout = &mut self.layouts[cur];
        layout.size = size;
        layout.root_image_generation = root_image_generation;
        layout.layers = layers;
        layout.first_layer_start = 0;
        // Keeps the allocation for the command builder.
        layout.commands.clear();
        trace!("Appended layout with {} layers", layout.layers.len());
    }

    fn slot(&self, age: usize) -> Option<usize> {
        let len = self.layouts.len();
        (age < len).then(|| (self.current + len - age) % len)
    }

    /// The layout `age` frames before the current one. `None` past the
    /// maximum buffer age.
    pub fn layout(&self, age: usize) -> Option<&Layout> {
        self.slot(age).map(|i| &self.layouts[i])
    }

    pub fn layout_mut(&mut self, age: usize) -> Option<&mut Layout> {
        let i = self.slot(age)?;
        Some(&mut self.layouts[i])
    }

    pub fn current(&self) -> &Layout {
        &self.layouts[self.current]
    }

    pub fn current_mut(&mut self) -> &mut Layout {
        &mut self.layouts[self.current]
    }

    /// Where the layer at `index` of the current layout was `age` frames
    /// ago.
    pub fn layer_prev_rank(&self, age: usize, index: usize) -> Option<usize> {
        let len = self.layouts.len();
        let mut layout = self.current;
        let mut index = index;
        for _ in 0..age {
            index = self.layouts[layout].layers.get(index)?.prev_rank?;
            layout = (layout + len - 1) % len;
        }
        Some(index)
    }

    /// Where the layer at `index` of the layout `age` frames ago is in the
    /// current layout.
    pub fn layer_next_rank(&self, age: usize, index: usize) -> Option<usize> {
        let mut layout = self.slot(age)?;
        let mut index = index;
        for _ in 0..age {
            index = self.layouts[layout].layers.get(index)?.next_rank?;
            layout = (layout + 1) % self.layouts.len();
        }
        Some(index)
    }

    /// Adds the content damage of the window at `index` of the current
    /// layout over the last `buffer_age` frames to `damage`.
    pub fn collect_window_damage(&self, index: usize, buffer_age: usize, damage: &mut Region) {
        let len = self.layouts.len();
        let mut layout = self.current;
        let mut index = Some(index);
        for _ in 0..buffer_age {
            let Some(layer) = index.and_then(|i| self.layouts[layout].layers.get(i)) else {
                break;
            };
            damage.union_with(&layer.damaged);
            index = layer.prev_rank;
            layout = (layout + len - 1) % len;
        }
    }
}
