//! Rendering pipeline
//!
//! A frame goes through these steps:
//!
//! 1. [`LayoutManager::append_layout`] snapshots the window stack into a
//!    [`Layout`].
//! 2. [`CommandBuilder`] turns the layout into [`RenderCommand`]s.
//! 3. [`damage::damage`] compares the layout with the one the back buffer
//!    holds, and [`damage::cull`] restricts the commands to the damage.
//! 4. The [`Renderer`] binds the commands' sources to backend images and
//!    runs them against an intermediate back image, then copies the damaged
//!    part to the back buffer and presents it.
//!
//! [`frame_pacing::RenderScheduler`] decides when all of this happens.

pub mod command;
pub mod command_builder;
pub mod damage;
pub mod frame_pacing;
pub mod layout;

use log::{debug, error, info, log_enabled, trace, warn, Level};
use std::collections::HashMap;
use thiserror::Error;

use crate::backend::{
    gaussian_kernel_std_for_size, Backend, BackendError, BackendQuirks, BlitArgs, BlitParams,
    BlurArgs, BlurContextHandle, BlurMethod, BlurParams, ImageFormat, ImageHandle, MaskImage,
    ShaderHandle,
};
use crate::region::Region;
use crate::types::{Color, IBox, IVec2};
use crate::window::{Monitors, Window, WindowId, WindowStack};

pub use command::{BoundCommand, CommandKind, CommandSource, RenderCommand, SourceMask};
pub use command_builder::{BuildOptions, CommandBuilder};
pub use frame_pacing::{RenderDecision, RenderScheduler};
pub use layout::{Layer, Layout, LayoutManager};

/// Edge weight of the shadow kernel relative to its center.
const SHADOW_KERNEL_EDGE: f64 = 0.5 / 256.0;

/// Overlay drawn over repainted areas when monitoring repaints.
const MONITOR_REPAINT_COLOR: Color = Color::new(0.5, 0.0, 0.0, 0.5);

#[derive(Debug, Error)]
pub enum RenderError {
    /// The back image could not be allocated. Nothing can be rendered
    /// until the screen size changes.
    #[error("failed to allocate the back image: {0}")]
    BackBuffer(#[source] BackendError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("{window} has no image for {wanted:?}")]
    MissingImage {
        window: WindowId,
        wanted: CommandSource,
    },
    #[error("{0} is not in the window stack")]
    MissingWindow(WindowId),
}

/// Per-frame inputs of [`Renderer::render`].
#[derive(Debug, Clone, Copy)]
pub struct FrameOptions<'a> {
    /// Root background. Black is drawn without one.
    pub root_image: Option<ImageHandle>,
    /// Blur context for background blur. Blurs are skipped without one.
    pub blur_context: Option<BlurContextHandle>,
    /// Only repaint damaged areas when the backend reports a buffer age.
    pub use_damage: bool,
    /// Tint repainted areas.
    pub monitor_repaint: bool,
    /// Keep copies of recent frames so the back buffer content always
    /// matches its buffer age.
    pub consistent_buffer_age: bool,
    pub build: BuildOptions,
    pub monitors: &'a Monitors,
    pub shaders: &'a HashMap<String, ShaderHandle>,
}

#[derive(Debug)]
struct MonitorRepaint {
    pixel: ImageHandle,
    /// Untinted content of the repainted areas of each recent frame.
    copies: Vec<ImageHandle>,
    regions: Vec<Region>,
}

/// Draws layouts with a backend.
#[derive(Debug)]
pub struct Renderer {
    /// Format of the back image and intermediate images
    format: ImageFormat,
    /// Frame content before it's copied to the back buffer
    back_image: Option<ImageHandle>,
    white_image: ImageHandle,
    black_image: ImageHandle,
    monitor_repaint: Option<MonitorRepaint>,
    /// Copies of the back buffer of recent frames
    back_buffer_copy: Vec<ImageHandle>,
    /// Index of the current frame in the copies ring
    frame_index: usize,
    /// Length of the copies ring
    max_buffer_age: usize,
    canvas_size: IVec2,
    shadow_color: Color,
    shadow_radius: i32,
    shadow_blur_context: Option<BlurContextHandle>,
    builder: CommandBuilder,
}

impl Renderer {
    /// Creates the renderer's images. Shadows are blurred by
    /// `shadow_radius`. With `dithered_present` the frame is rendered at
    /// high precision if the backend can.
    pub fn new(
        backend: &mut dyn Backend,
        shadow_radius: f64,
        shadow_color: Color,
        dithered_present: bool,
    ) -> Result<Self, RenderError> {
        let format = if dithered_present && backend.is_format_supported(ImageFormat::PixmapHigh) {
            ImageFormat::PixmapHigh
        } else {
            ImageFormat::Pixmap
        };
        let white_image = solid_image(backend, format, Color::WHITE)?;
        let black_image = match solid_image(backend, format, Color::BLACK) {
            Ok(image) => image,
            Err(e) => {
                backend.release_image(white_image);
                return Err(e.into());
            }
        };

        let mut shadow_blur_context = None;
        if shadow_radius > 0.0 {
            let params = BlurParams::Gaussian {
                size: shadow_radius as i32,
                deviation: gaussian_kernel_std_for_size(shadow_radius, SHADOW_KERNEL_EDGE),
            };
            match backend.create_blur_context(BlurMethod::Gaussian, ImageFormat::Mask, &params) {
                Ok(context) => shadow_blur_context = Some(context),
                Err(e) => {
                    error!("Failed to create shadow blur context: {}", e);
                    backend.release_image(white_image);
                    backend.release_image(black_image);
                    return Err(e.into());
                }
            }
        }

        info!(
            "🎨 Renderer initialized on {} backend ({:?} format)",
            backend.name(),
            format
        );
        Ok(Self {
            format,
            back_image: None,
            white_image,
            black_image,
            monitor_repaint: None,
            back_buffer_copy: Vec::new(),
            frame_index: 0,
            max_buffer_age: backend.max_buffer_age() + 1,
            canvas_size: IVec2::ZERO,
            shadow_color,
            shadow_radius: shadow_radius.max(0.0) as i32,
            shadow_blur_context,
            builder: CommandBuilder::new(),
        })
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn canvas_size(&self) -> IVec2 {
        self.canvas_size
    }

    /// Releases every backend resource held by the renderer.
    pub fn destroy(mut self, backend: &mut dyn Backend) {
        self.release_canvas(backend);
        backend.release_image(self.white_image);
        backend.release_image(self.black_image);
        if let Some(repaint) = self.monitor_repaint.take() {
            backend.release_image(repaint.pixel);
        }
        if let Some(context) = self.shadow_blur_context.take() {
            backend.destroy_blur_context(context);
        }
    }

    fn release_canvas(&mut self, backend: &mut dyn Backend) {
        if let Some(image) = self.back_image.take() {
            backend.release_image(image);
        }
        for image in self.back_buffer_copy.drain(..) {
            backend.release_image(image);
        }
        if let Some(repaint) = &mut self.monitor_repaint {
            for image in repaint.copies.drain(..) {
                backend.release_image(image);
            }
            repaint.regions.clear();
        }
    }

    /// Reallocates the back image when the screen size changed.
    fn set_root_size(&mut self, backend: &mut dyn Backend, size: IVec2) -> Result<(), RenderError> {
        if self.back_image.is_some() && self.canvas_size == size {
            return Ok(());
        }
        self.release_canvas(backend);
        match backend.new_image(self.format, size) {
            Ok(image) => {
                debug!("Allocated {}x{} back image", size.x, size.y);
                self.back_image = Some(image);
                self.canvas_size = size;
                Ok(())
            }
            Err(e) => {
                self.canvas_size = IVec2::ZERO;
                Err(RenderError::BackBuffer(e))
            }
        }
    }

    fn ensure_images_ready(
        &mut self,
        backend: &mut dyn Backend,
        monitor_repaint: bool,
        consistent_buffer_age: bool,
    ) -> Result<(), BackendError> {
        if monitor_repaint {
            if self.monitor_repaint.is_none() {
                let pixel = solid_image(backend, ImageFormat::Pixmap, MONITOR_REPAINT_COLOR)?;
                self.monitor_repaint = Some(MonitorRepaint {
                    pixel,
                    copies: Vec::new(),
                    regions: Vec::new(),
                });
            }
            if let Some(repaint) = &mut self.monitor_repaint {
                while repaint.copies.len() < self.max_buffer_age {
                    repaint
                        .copies
                        .push(backend.new_image(ImageFormat::Pixmap, self.canvas_size)?);
                }
                repaint.regions.resize(self.max_buffer_age, Region::new());
            }
        }
        if consistent_buffer_age {
            while self.back_buffer_copy.len() < self.max_buffer_age {
                self.back_buffer_copy
                    .push(backend.new_image(ImageFormat::Pixmap, self.canvas_size)?);
            }
        }
        Ok(())
    }

    /// Binds the X pixmaps of windows whose image is missing or out of
    /// date. Windows that fail to bind are left without an image, and not
    /// drawn.
    pub fn bind_window_images(&mut self, backend: &mut dyn Backend, stack: &mut WindowStack) {
        for w in stack.iter_mut() {
            if w.pixmap_stale {
                if let Some(old) = w.win_image.take() {
                    backend.release_image(old);
                }
                w.pixmap_stale = false;
            }
            if w.win_image.is_some() {
                continue;
            }
            let Some(pixmap) = w.pixmap else {
                continue;
            };
            match backend.bind_pixmap(pixmap, w.geometry.size_b()) {
                Ok(image) => w.win_image = Some(image),
                Err(e) => warn!("Failed to bind pixmap of {}: {}", w.id, e),
            }
        }
    }

    /// Creates the mask image of a window from its bounding shape.
    fn bind_mask(&self, backend: &mut dyn Backend, w: &mut Window) -> Result<ImageHandle, BackendError> {
        if let Some(mask) = w.mask_image {
            return Ok(mask);
        }
        let image = backend.new_image(ImageFormat::Mask, w.geometry.size_b())?;
        let filled = backend
            .clear(image, Color::TRANSPARENT)
            .and_then(|()| backend.copy_area(IVec2::ZERO, image, self.white_image, &w.bounding_shape));
        if let Err(e) = filled {
            error!("Failed to fill the mask of {}: {}", w.id, e);
            backend.release_image(image);
            return Err(e);
        }
        w.mask_image = Some(image);
        Ok(image)
    }

    /// Draws a shadow image out of a window mask: the mask is rounded,
    /// blurred and colored. The result is larger than the mask by the
    /// shadow radius on every side.
    pub fn shadow_from_mask(
        &self,
        backend: &mut dyn Backend,
        mask: ImageHandle,
        corner_radius: f64,
        mask_size: IVec2,
        blur: bool,
    ) -> Result<ImageHandle, BackendError> {
        let radius = self.shadow_radius;
        let shadow_size = IVec2::new(mask_size.x + 2 * radius, mask_size.y + 2 * radius);
        trace!("Generating {}x{} shadow from {}", shadow_size.x, shadow_size.y, mask);

        let normalized = backend.new_image(ImageFormat::Mask, shadow_size)?;
        let result = self
            .normalize_mask(backend, normalized, mask, corner_radius, mask_size, blur)
            .and_then(|()| self.color_shadow(backend, normalized, shadow_size));
        backend.release_image(normalized);
        if let Err(e) = &result {
            error!("Failed to draw shadow image: {}", e);
        }
        result
    }

    /// Draws the rounded, blurred window mask into `normalized`.
    fn normalize_mask(
        &self,
        backend: &mut dyn Backend,
        normalized: ImageHandle,
        mask: ImageHandle,
        corner_radius: f64,
        mask_size: IVec2,
        blur: bool,
    ) -> Result<(), BackendError> {
        backend.clear(normalized, Color::TRANSPARENT)?;
        let offset = IVec2::new(self.shadow_radius, self.shadow_radius);
        let target_mask = Region::from_box(IBox::new(offset, mask_size));
        backend.blit(
            offset,
            normalized,
            &BlitArgs {
                source_image: self.white_image,
                source_mask: Some(MaskImage {
                    image: mask,
                    origin: IVec2::ZERO,
                    corner_radius,
                    inverted: false,
                }),
                target_mask: &target_mask,
                params: BlitParams {
                    effective_size: mask_size,
                    ..BlitParams::default()
                },
            },
        )?;
        let Some(context) = self.shadow_blur_context.filter(|_| blur) else {
            return Ok(());
        };
        let full = Region::from_box(IBox::new(
            IVec2::ZERO,
            IVec2::new(mask_size.x + 2 * offset.x, mask_size.y + 2 * offset.y),
        ));
        backend.blur(
            IVec2::ZERO,
            normalized,
            &BlurArgs {
                blur_context: context,
                source_image: normalized,
                source_mask: None,
                target_mask: &full,
                opacity: 1.0,
            },
        )
    }

    /// Fills a new shadow image with the shadow color through `normalized`.
    fn color_shadow(
        &self,
        backend: &mut dyn Backend,
        normalized: ImageHandle,
        shadow_size: IVec2,
    ) -> Result<ImageHandle, BackendError> {
        let shadow = backend.new_image(ImageFormat::Pixmap, shadow_size)?;
        let pixel = match backend
            .clear(shadow, Color::TRANSPARENT)
            .and_then(|()| solid_image(backend, ImageFormat::Pixmap, self.shadow_color))
        {
            Ok(pixel) => pixel,
            Err(e) => {
                backend.release_image(shadow);
                return Err(e);
            }
        };
        let full = Region::from_box(IBox::new(IVec2::ZERO, shadow_size));
        let colored = backend.blit(
            IVec2::ZERO,
            shadow,
            &BlitArgs {
                source_image: pixel,
                source_mask: Some(MaskImage {
                    image: normalized,
                    origin: IVec2::ZERO,
                    corner_radius: 0.0,
                    inverted: false,
                }),
                target_mask: &full,
                params: BlitParams {
                    effective_size: shadow_size,
                    ..BlitParams::default()
                },
            },
        );
        backend.release_image(pixel);
        match colored {
            Ok(()) => Ok(shadow),
            Err(e) => {
                backend.release_image(shadow);
                Err(e)
            }
        }
    }

    fn bind_shadow(&self, backend: &mut dyn Backend, w: &mut Window) -> Result<ImageHandle, BackendError> {
        if let Some(shadow) = w.shadow_image {
            return Ok(shadow);
        }
        // Blurring on a slow backend costs more than an unblurred shadow.
        let blur = !backend.quirks().contains(BackendQuirks::SLOW_BLUR);
        if !blur {
            trace!("Drawing unblurred shadow for {}", w.id);
        }
        let mask = self.bind_mask(backend, w)?;
        let shadow = self.shadow_from_mask(
            backend,
            mask,
            w.options.corner_radius,
            w.geometry.size_b(),
            blur,
        )?;
        w.shadow_image = Some(shadow);
        Ok(shadow)
    }

    /// Resolves the sources of the current layout's commands to images,
    /// creating mask and shadow images as needed.
    fn bind_commands<'a>(
        &self,
        backend: &mut dyn Backend,
        stack: &mut WindowStack,
        layout: &'a Layout,
        frame: &FrameOptions<'_>,
        back_image: ImageHandle,
    ) -> Result<Vec<BoundCommand<'a>>, RenderError> {
        let mut bound = Vec::with_capacity(layout.commands.len());
        let background = layout.commands[..layout.first_layer_start].iter();
        for cmd in background {
            bound.push(BoundCommand {
                command: cmd,
                source: frame.root_image.unwrap_or(self.black_image),
                source_mask: None,
                blur_context: None,
            });
        }

        let mut start = layout.first_layer_start;
        for layer in &layout.layers {
            let end = start + layer.number_of_commands;
            let id = layer.key.window;
            if stack.key(id) != Some(layer.key) {
                return Err(RenderError::MissingWindow(id));
            }
            let w = stack.get_mut(id).ok_or(RenderError::MissingWindow(id))?;
            trace!("Binding commands of {} ({})", id, w.name);

            for cmd in &layout.commands[start..end] {
                let missing = || RenderError::MissingImage {
                    window: id,
                    wanted: cmd.source,
                };
                let (source, source_mask, blur_context) = match &cmd.kind {
                    CommandKind::Blit(blit) => {
                        let source = match cmd.source {
                            CommandSource::Window => w.win_image.ok_or_else(missing)?,
                            CommandSource::WindowSaved => w.saved_win_image.ok_or_else(missing)?,
                            CommandSource::Shadow => self.bind_shadow(backend, w)?,
                            CommandSource::Background => return Err(missing()),
                        };
                        (source, blit.source_mask, None)
                    }
                    CommandKind::Blur(blur) => (back_image, blur.source_mask, frame.blur_context),
                    CommandKind::CopyArea => return Err(missing()),
                };
                let source_mask = match source_mask {
                    Some(mask) => Some(MaskImage {
                        image: self.bind_mask(backend, w)?,
                        origin: mask.origin,
                        corner_radius: mask.corner_radius,
                        inverted: mask.inverted,
                    }),
                    None => None,
                };
                bound.push(BoundCommand {
                    command: cmd,
                    source,
                    source_mask,
                    blur_context,
                });
            }
            start = end;
        }
        Ok(bound)
    }

    /// Renders and presents the current layout of `lm`. Returns the
    /// repainted region.
    pub fn render(
        &mut self,
        backend: &mut dyn Backend,
        lm: &mut LayoutManager,
        stack: &mut WindowStack,
        frame: &FrameOptions<'_>,
    ) -> Result<Region, RenderError> {
        self.set_root_size(backend, lm.current().size)?;
        self.ensure_images_ready(backend, frame.monitor_repaint, frame.consistent_buffer_age)?;

        self.builder
            .build(lm.current_mut(), &frame.build, frame.monitors, frame.shaders);
        if log_enabled!(Level::Trace) {
            log_commands(lm.current());
        }

        let blur_size = frame
            .blur_context
            .map_or(IVec2::ZERO, |context| backend.blur_size(context));
        let buffer_age = if frame.use_damage || frame.monitor_repaint {
            backend.buffer_age().filter(|&age| age > 0)
        } else {
            None
        };

        let screen = Region::from_box(IBox::new(IVec2::ZERO, self.canvas_size));
        if let Some(age) = buffer_age {
            if frame.consistent_buffer_age && age < self.max_buffer_age {
                let past = self.past_frame(age);
                let back_buffer = backend.back_buffer();
                backend.copy_area(IVec2::ZERO, back_buffer, self.back_buffer_copy[past], &screen)?;
            }
        }
        let damage = match buffer_age {
            Some(age) if age <= lm.max_buffer_age() => damage::damage(lm, age, blur_size),
            _ => screen.clone(),
        };
        damage::cull(&mut lm.current_mut().commands, &damage, blur_size);

        let result = self.draw(backend, lm.current(), stack, frame, buffer_age, &damage, &screen);
        damage::uncull(&mut lm.current_mut().commands);
        result?;

        self.frame_index = (self.frame_index + 1) % self.max_buffer_age;
        Ok(damage)
    }

    fn past_frame(&self, age: usize) -> usize {
        (self.frame_index + self.max_buffer_age - age % self.max_buffer_age) % self.max_buffer_age
    }

    #[allow(clippy::too_many_arguments)]
    fn draw(
        &mut self,
        backend: &mut dyn Backend,
        layout: &Layout,
        stack: &mut WindowStack,
        frame: &FrameOptions<'_>,
        buffer_age: Option<usize>,
        damage: &Region,
        screen: &Region,
    ) -> Result<(), RenderError> {
        let back_image = self
            .back_image
            .ok_or(RenderError::BackBuffer(BackendError::ImageAllocation {
                format: self.format,
                size: self.canvas_size,
            }))?;
        let commands = self.bind_commands(backend, stack, layout, frame, back_image)?;

        backend.prepare(damage);

        if let (Some(age), Some(repaint)) = (buffer_age, &self.monitor_repaint) {
            if age <= self.max_buffer_age {
                // Restore what the tint covered in the frame being reused.
                let past = self.past_frame(age);
                let back_buffer = backend.back_buffer();
                backend.copy_area(IVec2::ZERO, back_buffer, repaint.copies[past], &repaint.regions[past])?;
            }
        }

        execute(backend, back_image, &commands)?;
        drop(commands);

        if frame.monitor_repaint {
            if let Some(repaint) = &mut self.monitor_repaint {
                let index = self.frame_index;
                backend.copy_area(IVec2::ZERO, repaint.copies[index], back_image, damage)?;
                repaint.regions[index] = damage.clone();
                trace!("Blit for monitor repaint");
                backend.blit(
                    IVec2::ZERO,
                    back_image,
                    &BlitArgs {
                        source_image: repaint.pixel,
                        source_mask: None,
                        target_mask: damage,
                        params: BlitParams {
                            effective_size: self.canvas_size,
                            ..BlitParams::default()
                        },
                    },
                )?;
            }
        }

        let back_buffer = backend.back_buffer();
        backend.copy_area_quantize(IVec2::ZERO, back_buffer, back_image, damage)?;
        if frame.consistent_buffer_age {
            backend.copy_area(IVec2::ZERO, self.back_buffer_copy[self.frame_index], back_buffer, screen)?;
        }
        if let Err(e) = backend.present() {
            warn!("Failed to present the frame: {}", e);
        }
        Ok(())
    }
}

/// Creates a 1×1 image filled with `color`.
fn solid_image(
    backend: &mut dyn Backend,
    format: ImageFormat,
    color: Color,
) -> Result<ImageHandle, BackendError> {
    let image = backend.new_image(format, IVec2::new(1, 1))?;
    if let Err(e) = backend.clear(image, color) {
        backend.release_image(image);
        return Err(e);
    }
    Ok(image)
}

/// Runs bound commands against `target`. Commands with nothing left to
/// draw are skipped.
pub fn execute(
    backend: &mut dyn Backend,
    target: ImageHandle,
    commands: &[BoundCommand<'_>],
) -> Result<(), BackendError> {
    for bound in commands {
        let cmd = bound.command;
        let mask = cmd.mask();
        if mask.is_empty() {
            continue;
        }
        match &cmd.kind {
            CommandKind::Blit(blit) => backend.blit(
                cmd.origin,
                target,
                &BlitArgs {
                    source_image: bound.source,
                    source_mask: bound.source_mask,
                    target_mask: mask,
                    params: blit.params,
                },
            )?,
            CommandKind::Blur(blur) => {
                let Some(blur_context) = bound.blur_context else {
                    trace!("No blur context, skipping blur");
                    continue;
                };
                backend.blur(
                    cmd.origin,
                    target,
                    &BlurArgs {
                        blur_context,
                        source_image: bound.source,
                        source_mask: bound.source_mask,
                        target_mask: mask,
                        opacity: blur.opacity,
                    },
                )?
            }
            CommandKind::CopyArea => backend.copy_area(cmd.origin, target, bound.source, mask)?,
        }
    }
    Ok(())
}

fn log_commands(layout: &Layout) {
    trace!("Desktop background");
    for cmd in &layout.commands[..layout.first_layer_start] {
        trace!("  {:?} {:?}", cmd.source, cmd.target_mask.extents());
    }
    let mut start = layout.first_layer_start;
    for layer in &layout.layers {
        trace!("Layer for window {}", layer.key.window);
        for cmd in &layout.commands[start..start + layer.number_of_commands] {
            let kind = match cmd.kind {
                CommandKind::Blit(_) => "blit",
                CommandKind::Blur(_) => "blur",
                CommandKind::CopyArea => "copy",
            };
            trace!(
                "  {} from {:?} at {:?}, mask {:?}",
                kind,
                cmd.source,
                cmd.origin,
                cmd.target_mask.extents()
            );
        }
        start += layer.number_of_commands;
    }
}
