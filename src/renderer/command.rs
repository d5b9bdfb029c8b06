//! Render commands
//!
//! A [`RenderCommand`] describes one drawing operation of a frame in terms
//! of what it draws (a window, its saved image, its shadow, or the desktop
//! background) rather than with which backend image. The renderer binds
//! sources to images right before executing the commands.

use crate::backend::{BlitParams, BlurContextHandle, ImageHandle, MaskImage};
use crate::region::Region;
use crate::types::IVec2;

/// What a command reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandSource {
    /// The window's current content.
    Window,
    /// The window's content from before its last resize.
    WindowSaved,
    /// The window's shadow.
    Shadow,
    /// The root background, or black if there is none.
    Background,
}

/// A rounded mask applied to a command's source. The mask image itself is
/// the window's shape, bound by the renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceMask {
    /// Origin of the mask in source coordinates.
    pub origin: IVec2,
    pub corner_radius: f64,
    pub inverted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlitCommand {
    pub params: BlitParams,
    pub source_mask: Option<SourceMask>,
    /// Part of the target that is fully covered by this blit, screen
    /// coordinates.
    pub opaque_region: Region,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlurCommand {
    pub opacity: f64,
    pub source_mask: Option<SourceMask>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    Blit(BlitCommand),
    /// Blurs the background under `target_mask`.
    Blur(BlurCommand),
    /// Copies the source verbatim.
    CopyArea,
}

/// One drawing operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderCommand {
    pub kind: CommandKind,
    pub source: CommandSource,
    /// Where the source's top-left corner lands, screen coordinates.
    pub origin: IVec2,
    /// Region the command may modify, screen coordinates.
    pub target_mask: Region,
    /// `target_mask` restricted to the damaged area. Set by culling.
    pub culled_mask: Option<Region>,
}

impl RenderCommand {
    pub fn blit(source: CommandSource, origin: IVec2, target_mask: Region, blit: BlitCommand) -> Self {
        Self {
            kind: CommandKind::Blit(blit),
            source,
            origin,
            target_mask,
            culled_mask: None,
        }
    }

    pub fn blur(target_mask: Region, blur: BlurCommand) -> Self {
        Self {
            kind: CommandKind::Blur(blur),
            source: CommandSource::Background,
            origin: IVec2::ZERO,
            target_mask,
            culled_mask: None,
        }
    }

    pub fn copy_area(source: CommandSource, origin: IVec2, target_mask: Region) -> Self {
        Self {
            kind: CommandKind::CopyArea,
            source,
            origin,
            target_mask,
            culled_mask: None,
        }
    }

    /// The mask the command is executed with: the culled mask when culled.
    pub fn mask(&self) -> &Region {
        self.culled_mask.as_ref().unwrap_or(&self.target_mask)
    }

    pub fn as_blit(&self) -> Option<&BlitCommand> {
        match &self.kind {
            CommandKind::Blit(blit) => Some(blit),
            _ => None,
        }
    }

    pub fn as_blit_mut(&mut self) -> Option<&mut BlitCommand> {
        match &mut self.kind {
            CommandKind::Blit(blit) => Some(blit),
            _ => None,
        }
    }

    pub fn is_blit(&self) -> bool {
        matches!(self.kind, CommandKind::Blit(_))
    }

    pub fn is_blur(&self) -> bool {
        matches!(self.kind, CommandKind::Blur(_))
    }

    /// Same operation from the same source at the same place, parameters
    /// and masks aside.
    pub fn same_kind(&self, other: &RenderCommand) -> bool {
        std::mem::discriminant(&self.kind) == std::mem::discriminant(&other.kind)
            && self.source == other.source
            && self.origin == other.origin
    }
}

/// A command with its sources resolved to backend images.
#[derive(Debug, Clone, Copy)]
pub struct BoundCommand<'a> {
    pub command: &'a RenderCommand,
    pub source: ImageHandle,
    pub source_mask: Option<MaskImage>,
    /// Set for blurs when background blur is enabled.
    pub blur_context: Option<BlurContextHandle>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_prefers_culled() {
        let mut cmd = RenderCommand::copy_area(
            CommandSource::Background,
            IVec2::ZERO,
            Region::from_xywh(0, 0, 10, 10),
        );
        assert_eq!(cmd.mask(), &Region::from_xywh(0, 0, 10, 10));
        cmd.culled_mask = Some(Region::new());
        assert!(cmd.mask().is_empty());
    }

    #[test]
    fn test_same_kind() {
        let blur = RenderCommand::blur(
            Region::new(),
            BlurCommand {
                opacity: 1.0,
                source_mask: None,
            },
        );
        let copy = RenderCommand::copy_area(CommandSource::Background, IVec2::ZERO, Region::new());
        assert!(blur.same_kind(&blur.clone()));
        assert!(!blur.same_kind(&copy));
    }
}
