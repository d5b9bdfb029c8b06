//! Command builder
//!
//! Turns a [`Layout`] into the ordered list of [`RenderCommand`]s that draw
//! it. Command 0 copies the background over the whole screen, then every
//! layer contributes its commands bottom to top. Within a layer the order
//! is: background blur, shadow, frame, window body, the saved image of a
//! part always coming right before the part itself.
//!
//! # Clipping
//!
//! After building, two passes trim the target masks:
//!
//! - transparent clipping: a window with `transparent_clipping` cuts its
//!   transparent parts out of everything below it;
//! - shadow clipping: a window with `clip_shadow_above` hides the shadows
//!   of windows above it.

use log::{debug, trace};
use std::collections::HashMap;

use super::command::{
    BlitCommand, BlurCommand, CommandKind, CommandSource, RenderCommand, SourceMask,
};
use super::layout::{Layer, Layout};
use crate::backend::{BlitParams, ShaderHandle};
use crate::region::Region;
use crate::types::{IBox, IVec2, Vec2};
use crate::window::{remove_corners, Monitors, WindowMode};

/// Global options affecting how commands are built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildOptions {
    /// Treat every window as transparent.
    pub force_blend: bool,
    /// Blur behind the frame of windows with a transparent frame.
    pub blur_frame: bool,
    /// Dim inactive windows by a fixed amount regardless of their opacity.
    pub inactive_dim_fixed: bool,
    /// Windows brighter than this are darkened.
    pub max_brightness: f64,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            force_blend: false,
            blur_frame: false,
            inactive_dim_fixed: false,
            max_brightness: 1.0,
        }
    }
}

/// Window opacities above this are treated as opaque.
const OPAQUE_THRESHOLD: f64 = 1.0 - 1.0 / 255.0;

#[derive(Debug, Default)]
pub struct CommandBuilder {
    scratch: Region,
}

impl CommandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces `layout.commands` with the commands drawing `layout`.
    pub fn build(
        &mut self,
        layout: &mut Layout,
        options: &BuildOptions,
        monitors: &Monitors,
        shaders: &HashMap<String, ShaderHandle>,
    ) {
        let count = 1 + layout
            .layers
            .iter()
            .map(|layer| command_count(layer, options))
            .sum::<usize>();
        let mut commands = std::mem::take(&mut layout.commands);
        if count > commands.capacity() || count < commands.capacity() / 2 {
            commands = Vec::with_capacity(count);
        } else {
            commands.clear();
        }

        commands.push(RenderCommand::copy_area(
            CommandSource::Background,
            IVec2::ZERO,
            Region::from_box(IBox::new(IVec2::ZERO, layout.size)),
        ));
        layout.first_layer_start = commands.len();

        for layer in &mut layout.layers {
            let start = commands.len();
            push_layer_commands(&mut commands, layer, options, monitors, shaders);
            layer.number_of_commands = commands.len() - start;
            debug_assert_eq!(layer.number_of_commands, command_count(layer, options));
        }
        layout.commands = commands;

        self.clip_transparent(layout);
        self.clip_shadows(layout);
        trace!(
            "Built {} commands for {} layers",
            layout.commands.len(),
            layout.layers.len()
        );
    }

    /// Walks the layers top to bottom, removing the transparent parts of
    /// clipping windows from everything below them.
    fn clip_transparent(&mut self, layout: &mut Layout) {
        self.scratch.clear();
        let mut end = layout.commands.len();
        for layer in layout.layers.iter().rev() {
            let start = end - layer.number_of_commands;
            if !self.scratch.is_empty() {
                for cmd in &mut layout.commands[start..end] {
                    cmd.target_mask.subtract_with(&self.scratch);
                    if let CommandKind::Blit(blit) = &mut cmd.kind {
                        blit.opaque_region.subtract_with(&self.scratch);
                    }
                }
            }
            end = start;

            if !layer.options.transparent_clipping {
                continue;
            }
            let origin = layer.window.origin;
            if layer.mode == WindowMode::Trans || layer.opacity < 1.0 {
                self.scratch.union_with(&layer.bounding_shape.translated(origin));
            } else if layer.mode == WindowMode::FrameTrans {
                self.scratch.union_with(&layer.frame.translated(origin));
            }
        }
    }

    /// Walks the commands bottom to top, removing the bodies of windows
    /// with `clip_shadow_above` from the shadows above them. Blurred areas
    /// show what's below again, so they lift the clip.
    fn clip_shadows(&mut self, layout: &mut Layout) {
        self.scratch.clear();
        let mut start = layout.first_layer_start;
        for layer in &layout.layers {
            let end = start + layer.number_of_commands;
            for cmd in &mut layout.commands[start..end] {
                match (&cmd.kind, cmd.source) {
                    (CommandKind::Blur(_), _) => self.scratch.subtract_with(&cmd.target_mask),
                    (CommandKind::Blit(_), CommandSource::Shadow) => {
                        cmd.target_mask.subtract_with(&self.scratch)
                    }
                    (CommandKind::Blit(_), CommandSource::Window)
                        if layer.options.clip_shadow_above =>
                    {
                        self.scratch.union_with(&cmd.target_mask)
                    }
                    _ => {}
                }
            }
            start = end;
        }
    }
}

fn needs_blur(layer: &Layer, options: &BuildOptions) -> bool {
    layer.options.blur_background
        && layer.blur_opacity > 0.0
        && (options.force_blend
            || layer.mode == WindowMode::Trans
            || layer.opacity < 1.0
            || (options.blur_frame && layer.mode == WindowMode::FrameTrans))
}

fn has_translucent_frame(layer: &Layer) -> bool {
    layer.frame_opacity > 0.0 && layer.frame_opacity < 1.0
}

/// Number of commands drawing `layer`.
fn command_count(layer: &Layer, options: &BuildOptions) -> usize {
    let mut per_image = 1;
    if has_translucent_frame(layer) {
        per_image += 1;
    }
    if layer.saved_image_blend > 0.0 {
        per_image *= 2;
    }
    per_image + usize::from(layer.options.shadow) + usize::from(needs_blur(layer, options))
}

fn corner_radius_px(layer: &Layer) -> i32 {
    layer.options.corner_radius.ceil() as i32
}

fn push_layer_commands(
    commands: &mut Vec<RenderCommand>,
    layer: &Layer,
    options: &BuildOptions,
    monitors: &Monitors,
    shaders: &HashMap<String, ShaderHandle>,
) {
    let crop = Region::from_box(layer.crop);
    let (body, body_saved) = body_commands(layer, options, shaders, &crop);
    let (frame, frame_saved) = frame_commands(&body, body_saved.as_ref(), layer, &crop);

    if needs_blur(layer, options) {
        commands.push(blur_command(layer, options, &crop));
    }
    if layer.options.shadow {
        let blits = [Some(&body), body_saved.as_ref(), frame.as_ref(), frame_saved.as_ref()];
        commands.push(shadow_command(layer, monitors, &crop, blits.into_iter().flatten()));
    }
    commands.extend(frame_saved);
    commands.extend(frame);
    commands.extend(body_saved);
    commands.push(body);
}

/// The window body, and the saved image blended into it if any.
fn body_commands(
    layer: &Layer,
    options: &BuildOptions,
    shaders: &HashMap<String, ShaderHandle>,
    crop: &Region,
) -> (RenderCommand, Option<RenderCommand>) {
    let origin = layer.window.origin;
    let frame = layer.frame.translated(origin);

    let mut target = layer.bounding_shape.translated(origin);
    if layer.frame_opacity < 1.0 {
        target.subtract_with(&frame);
    }

    let mut opaque = Region::new();
    if matches!(layer.mode, WindowMode::Solid | WindowMode::FrameTrans)
        && layer.opacity == 1.0
        && !options.force_blend
    {
        opaque = target.clone();
        if layer.mode == WindowMode::FrameTrans {
            opaque.subtract_with(&frame);
        }
    }
    remove_corners(&mut opaque, origin, layer.window.size, corner_radius_px(layer));

    let shader = layer.options.shader.as_ref().and_then(|name| {
        let shader = shaders.get(name).copied();
        if shader.is_none() {
            debug!("Shader {} is not loaded, drawing {} without it", name, layer.key.window);
        }
        shader
    });

    let blend = layer.saved_image_blend;
    let mut opacity = layer.opacity * (1.0 - blend);
    if opacity > OPAQUE_THRESHOLD {
        opacity = 1.0;
    }
    let opacity_saved = if opacity < 1.0 {
        layer.opacity * blend / (1.0 - opacity)
    } else {
        0.0
    };
    let dim = if options.inactive_dim_fixed {
        layer.options.dim
    } else {
        layer.options.dim * layer.opacity
    };

    let params = BlitParams {
        opacity,
        dim,
        max_brightness: options.max_brightness,
        scale: layer.scale,
        corner_radius: layer.options.corner_radius,
        effective_size: layer.window.size,
        border_width: layer.border_width,
        color_inverted: layer.options.invert_color,
        shader,
    };

    target.scale(origin, layer.scale);
    target.intersect_with(crop);
    opaque.scale(origin, layer.scale);
    opaque.intersect_with(crop);

    let mut body = BlitCommand {
        params,
        source_mask: None,
        opaque_region: opaque,
    };
    let saved = (blend > 0.0).then(|| {
        let saved = BlitCommand {
            params: saved_params(&params, opacity_saved, layer),
            source_mask: None,
            opaque_region: std::mem::take(&mut body.opaque_region),
        };
        RenderCommand::blit(CommandSource::WindowSaved, origin, target.clone(), saved)
    });
    (
        RenderCommand::blit(CommandSource::Window, origin, target, body),
        saved,
    )
}

/// Blit parameters for the saved image, which has its own size.
fn saved_params(params: &BlitParams, opacity: f64, layer: &Layer) -> BlitParams {
    let size = layer.window.size.as_vec2();
    BlitParams {
        opacity,
        effective_size: Vec2::new(
            size.x / layer.saved_image_scale.x,
            size.y / layer.saved_image_scale.y,
        )
        .as_ivec2(),
        scale: layer.scale.scale(layer.saved_image_scale),
        ..*params
    }
}

/// Blits for a translucent frame, derived from the body blits.
fn frame_commands(
    body: &RenderCommand,
    body_saved: Option<&RenderCommand>,
    layer: &Layer,
    crop: &Region,
) -> (Option<RenderCommand>, Option<RenderCommand>) {
    if !has_translucent_frame(layer) {
        return (None, None);
    }
    let origin = layer.window.origin;
    let mut target = layer.frame.translated(origin);
    target.scale(origin, layer.scale);
    target.intersect_with(crop);

    let frame_blit = |cmd: &RenderCommand| {
        cmd.as_blit().map(|blit| {
            let mut params = blit.params;
            params.opacity *= layer.frame_opacity;
            RenderCommand::blit(
                cmd.source,
                origin,
                target.clone(),
                BlitCommand {
                    params,
                    source_mask: None,
                    opaque_region: Region::new(),
                },
            )
        })
    };
    (frame_blit(body), body_saved.and_then(frame_blit))
}

fn shadow_command<'a>(
    layer: &Layer,
    monitors: &Monitors,
    crop: &Region,
    window_blits: impl Iterator<Item = &'a RenderCommand>,
) -> RenderCommand {
    let shadow = layer.shadow;
    let mut mask = Region::from_box(IBox::new(
        shadow.origin,
        shadow.size.scale_floor(layer.shadow_scale),
    ));
    let radius = corner_radius_px(layer);
    if !layer.options.full_shadow {
        for blit in window_blits {
            if radius > 0 {
                let mut target = blit.target_mask.clone();
                remove_corners(&mut target, blit.origin, layer.window.size, radius);
                mask.subtract_with(&target);
            } else {
                mask.subtract_with(&blit.target_mask);
            }
        }
    }
    if let Some(monitor) = monitors.find(layer.extents).and_then(|i| monitors.get(i)) {
        mask.intersect_with(&Region::from_box(monitor));
    }
    mask.intersect_with(crop);

    let source_mask = (layer.options.corner_radius > 0.0).then(|| SourceMask {
        origin: layer.window.origin - shadow.origin,
        corner_radius: layer.options.corner_radius,
        inverted: true,
    });
    RenderCommand::blit(
        CommandSource::Shadow,
        shadow.origin,
        mask,
        BlitCommand {
            params: BlitParams {
                opacity: layer.shadow_opacity,
                max_brightness: 1.0,
                scale: layer.shadow_scale,
                effective_size: shadow.size,
                ..BlitParams::default()
            },
            source_mask,
            opaque_region: Region::new(),
        },
    )
}

/// Blur behind the transparent part of the window. Only called when
/// [`needs_blur`] holds, so a window that is not transparent as a whole
/// has a transparent frame.
fn blur_command(layer: &Layer, options: &BuildOptions, crop: &Region) -> RenderCommand {
    let origin = layer.window.origin;
    let mut target =
        if options.force_blend || layer.mode == WindowMode::Trans || layer.opacity < 1.0 {
            layer.bounding_shape.translated(origin)
        } else {
            layer.frame.translated(origin)
        };
    target.scale(origin, layer.scale);
    target.intersect_with(crop);

    let source_mask = (layer.options.corner_radius > 0.0).then(|| SourceMask {
        origin,
        corner_radius: layer.options.corner_radius,
        inverted: false,
    });
    RenderCommand::blur(
        target,
        BlurCommand {
            opacity: layer.blur_opacity,
            source_mask,
        },
    )
}
