//! Headless backend that records operations instead of drawing.
//!
//! Used by the test suite and by the demo binary. Every call is appended to
//! [`DummyBackend::ops`], images are tracked so leaks and use after release
//! are detected, and failures can be injected per operation kind.

use log::{trace, warn};
use std::collections::HashMap;
use std::time::Duration;

use super::{
    Backend, BackendError, BackendQuirks, BlitArgs, BlurArgs, BlurContextHandle, BlurMethod,
    BlurParams, ImageCapabilities, ImageFormat, ImageHandle,
};
use crate::region::Region;
use crate::types::{Color, IVec2};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendOp {
    NewImage {
        image: ImageHandle,
        format: ImageFormat,
        size: IVec2,
    },
    ReleaseImage(ImageHandle),
    Clear {
        target: ImageHandle,
        color: Color,
    },
    Prepare(Region),
    Blit {
        origin: IVec2,
        target: ImageHandle,
        source: ImageHandle,
        mask: Option<ImageHandle>,
        target_mask: Region,
        opacity: f64,
    },
    Blur {
        origin: IVec2,
        target: ImageHandle,
        source: ImageHandle,
        target_mask: Region,
        opacity: f64,
    },
    CopyArea {
        origin: IVec2,
        target: ImageHandle,
        source: ImageHandle,
        region: Region,
        quantize: bool,
    },
    Present,
}

#[derive(Debug, Clone, Copy)]
struct ImageInfo {
    format: ImageFormat,
    size: IVec2,
    bound: bool,
}

/// Recording backend.
#[derive(Debug)]
pub struct DummyBackend {
    /// Every operation in call order.
    pub ops: Vec<BackendOp>,
    /// Reported by [`Backend::buffer_age`].
    pub buffer_age: Option<usize>,
    pub max_buffer_age: usize,
    /// Reported as the render time of every frame.
    pub render_time: Duration,
    pub quirks: BackendQuirks,
    pub high_precision: bool,
    /// Operation names (`"new_image"`, `"blit"`, ...) that fail.
    pub fail: Vec<&'static str>,
    images: HashMap<ImageHandle, ImageInfo>,
    blur_contexts: HashMap<u64, BlurParams>,
    next_handle: u64,
    back_buffer: ImageHandle,
    frame_pending: bool,
    frames_presented: u64,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new(IVec2::new(1920, 1080))
    }
}

impl DummyBackend {
    /// A backend whose back buffer has size `screen`.
    pub fn new(screen: IVec2) -> Self {
        let back_buffer = ImageHandle::from_raw(1);
        let mut images = HashMap::new();
        images.insert(
            back_buffer,
            ImageInfo {
                format: ImageFormat::Pixmap,
                size: screen,
                bound: false,
            },
        );
        Self {
            ops: Vec::new(),
            buffer_age: Some(1),
            max_buffer_age: 5,
            render_time: Duration::from_micros(1000),
            quirks: BackendQuirks::NONE,
            high_precision: false,
            fail: Vec::new(),
            images,
            blur_contexts: HashMap::new(),
            next_handle: 2,
            back_buffer,
            frame_pending: false,
            frames_presented: 0,
        }
    }

    /// Number of live images, the back buffer excluded.
    pub fn live_images(&self) -> usize {
        self.images.len() - 1
    }

    pub fn image_size(&self, image: ImageHandle) -> Option<IVec2> {
        self.images.get(&image).map(|info| info.size)
    }

    pub fn image_format(&self, image: ImageHandle) -> Option<ImageFormat> {
        self.images.get(&image).map(|info| info.format)
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Recorded operations of the last frame: everything after the most
    /// recent `Prepare`.
    pub fn last_frame(&self) -> &[BackendOp] {
        let start = self
            .ops
            .iter()
            .rposition(|op| matches!(op, BackendOp::Prepare(_)))
            .map_or(0, |i| i + 1);
        &self.ops[start..]
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    fn check_fail(&self, op: &'static str) -> Result<(), BackendError> {
        if self.fail.contains(&op) {
            return Err(BackendError::Operation {
                op,
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn check_image(&self, image: ImageHandle) -> Result<ImageInfo, BackendError> {
        self.images
            .get(&image)
            .copied()
            .ok_or(BackendError::InvalidImage(image))
    }

    fn alloc(&mut self, format: ImageFormat, size: IVec2, bound: bool) -> ImageHandle {
        let image = ImageHandle::from_raw(self.next_handle);
        self.next_handle += 1;
        self.images.insert(
            image,
            ImageInfo {
                format,
                size,
                bound,
            },
        );
        image
    }
}

impl Backend for DummyBackend {
    fn name(&self) -> &str {
        "dummy"
    }

    fn new_image(&mut self, format: ImageFormat, size: IVec2) -> Result<ImageHandle, BackendError> {
        if self.fail.contains(&"new_image")
            || size.x <= 0
            || size.y <= 0
            || !self.is_format_supported(format)
        {
            return Err(BackendError::ImageAllocation { format, size });
        }
        let image = self.alloc(format, size, false);
        trace!("dummy: new {:?} image {} {}x{}", format, image, size.x, size.y);
        self.ops.push(BackendOp::NewImage {
            image,
            format,
            size,
        });
        Ok(image)
    }

    fn release_image(&mut self, image: ImageHandle) {
        if image == self.back_buffer || self.images.remove(&image).is_none() {
            warn!("dummy: releasing unknown image {}", image);
            return;
        }
        self.ops.push(BackendOp::ReleaseImage(image));
    }

    fn bind_pixmap(&mut self, pixmap: u32, size: IVec2) -> Result<ImageHandle, BackendError> {
        self.check_fail("bind_pixmap")?;
        let image = self.alloc(ImageFormat::Pixmap, size, true);
        trace!("dummy: bound pixmap {:#010x} as {}", pixmap, image);
        Ok(image)
    }

    fn back_buffer(&mut self) -> ImageHandle {
        self.back_buffer
    }

    fn prepare(&mut self, damage: &Region) {
        self.ops.push(BackendOp::Prepare(damage.clone()));
    }

    fn blit(
        &mut self,
        origin: IVec2,
        target: ImageHandle,
        args: &BlitArgs<'_>,
    ) -> Result<(), BackendError> {
        self.check_fail("blit")?;
        let info = self.check_image(target)?;
        if info.bound {
            return Err(BackendError::Operation {
                op: "blit",
                reason: format!("{} can not be rendered to", target),
            });
        }
        self.check_image(args.source_image)?;
        if let Some(mask) = &args.source_mask {
            self.check_image(mask.image)?;
        }
        self.ops.push(BackendOp::Blit {
            origin,
            target,
            source: args.source_image,
            mask: args.source_mask.map(|m| m.image),
            target_mask: args.target_mask.clone(),
            opacity: args.params.opacity,
        });
        Ok(())
    }

    fn blur(
        &mut self,
        origin: IVec2,
        target: ImageHandle,
        args: &BlurArgs<'_>,
    ) -> Result<(), BackendError> {
        self.check_fail("blur")?;
        self.check_image(target)?;
        self.check_image(args.source_image)?;
        if !self.blur_contexts.contains_key(&args.blur_context.0) {
            return Err(BackendError::Operation {
                op: "blur",
                reason: "unknown blur context".to_string(),
            });
        }
        self.ops.push(BackendOp::Blur {
            origin,
            target,
            source: args.source_image,
            target_mask: args.target_mask.clone(),
            opacity: args.opacity,
        });
        Ok(())
    }

    fn copy_area(
        &mut self,
        origin: IVec2,
        target: ImageHandle,
        source: ImageHandle,
        region: &Region,
    ) -> Result<(), BackendError> {
        self.check_fail("copy_area")?;
        self.check_image(target)?;
        self.check_image(source)?;
        self.ops.push(BackendOp::CopyArea {
            origin,
            target,
            source,
            region: region.clone(),
            quantize: false,
        });
        Ok(())
    }

    fn copy_area_quantize(
        &mut self,
        origin: IVec2,
        target: ImageHandle,
        source: ImageHandle,
        region: &Region,
    ) -> Result<(), BackendError> {
        self.check_fail("copy_area_quantize")?;
        self.check_image(target)?;
        self.check_image(source)?;
        self.ops.push(BackendOp::CopyArea {
            origin,
            target,
            source,
            region: region.clone(),
            quantize: true,
        });
        Ok(())
    }

    fn clear(&mut self, target: ImageHandle, color: Color) -> Result<(), BackendError> {
        self.check_fail("clear")?;
        self.check_image(target)?;
        self.ops.push(BackendOp::Clear { target, color });
        Ok(())
    }

    fn present(&mut self) -> Result<(), BackendError> {
        if self.fail.contains(&"present") {
            return Err(BackendError::Present("injected failure".to_string()));
        }
        self.ops.push(BackendOp::Present);
        self.frame_pending = true;
        self.frames_presented += 1;
        Ok(())
    }

    fn buffer_age(&self) -> Option<usize> {
        self.buffer_age
    }

    fn max_buffer_age(&self) -> usize {
        self.max_buffer_age
    }

    fn last_render_time(&mut self) -> Option<Duration> {
        if !self.frame_pending {
            return None;
        }
        self.frame_pending = false;
        Some(self.render_time)
    }

    fn is_format_supported(&self, format: ImageFormat) -> bool {
        format != ImageFormat::PixmapHigh || self.high_precision
    }

    fn image_capabilities(&self, image: ImageHandle) -> ImageCapabilities {
        match self.images.get(&image) {
            Some(_) if image == self.back_buffer => ImageCapabilities {
                src: false,
                dst: true,
            },
            Some(info) => ImageCapabilities {
                src: true,
                dst: !info.bound,
            },
            None => ImageCapabilities::default(),
        }
    }

    fn quirks(&self) -> BackendQuirks {
        self.quirks
    }

    fn create_blur_context(
        &mut self,
        method: BlurMethod,
        _format: ImageFormat,
        params: &BlurParams,
    ) -> Result<BlurContextHandle, BackendError> {
        if method == BlurMethod::None {
            return Err(BackendError::BlurContext("no blur method".to_string()));
        }
        self.check_fail("create_blur_context")?;
        let id = self.next_handle;
        self.next_handle += 1;
        self.blur_contexts.insert(id, *params);
        Ok(BlurContextHandle(id))
    }

    fn destroy_blur_context(&mut self, context: BlurContextHandle) {
        if self.blur_contexts.remove(&context.0).is_none() {
            warn!("dummy: destroying unknown blur context {}", context.0);
        }
    }

    fn blur_size(&self, context: BlurContextHandle) -> IVec2 {
        self.blur_contexts
            .get(&context.0)
            .map_or(IVec2::ZERO, BlurParams::reach)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_lifecycle() {
        let mut backend = DummyBackend::new(IVec2::new(100, 100));
        let image = backend
            .new_image(ImageFormat::Mask, IVec2::new(4, 4))
            .unwrap();
        assert_eq!(backend.live_images(), 1);
        backend.clear(image, Color::TRANSPARENT).unwrap();
        backend.release_image(image);
        assert_eq!(backend.live_images(), 0);
        assert!(matches!(
            backend.clear(image, Color::WHITE),
            Err(BackendError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_high_precision_is_optional() {
        let mut backend = DummyBackend::default();
        assert!(backend
            .new_image(ImageFormat::PixmapHigh, IVec2::new(1, 1))
            .is_err());
        backend.high_precision = true;
        assert!(backend
            .new_image(ImageFormat::PixmapHigh, IVec2::new(1, 1))
            .is_ok());
    }

    #[test]
    fn test_injected_failure() {
        let mut backend = DummyBackend::default();
        backend.fail.push("present");
        assert!(backend.present().is_err());
        assert_eq!(backend.frames_presented(), 0);
    }

    #[test]
    fn test_bound_pixmap_is_not_a_target() {
        let mut backend = DummyBackend::default();
        let pixmap = backend.bind_pixmap(0x1234, IVec2::new(10, 10)).unwrap();
        assert!(!backend.image_capabilities(pixmap).dst);
        let white = backend.new_image(ImageFormat::Pixmap, IVec2::new(1, 1)).unwrap();
        let mask = Region::from_xywh(0, 0, 10, 10);
        let args = BlitArgs {
            source_image: white,
            source_mask: None,
            target_mask: &mask,
            params: Default::default(),
        };
        assert!(backend.blit(IVec2::ZERO, pixmap, &args).is_err());
    }

    #[test]
    fn test_render_time_after_present() {
        let mut backend = DummyBackend::default();
        assert_eq!(backend.last_render_time(), None);
        backend.present().unwrap();
        assert_eq!(backend.last_render_time(), Some(backend.render_time));
        assert_eq!(backend.last_render_time(), None);
    }
}
