// SPDX-License-Identifier: MPL-2.0

//! Zero-copy texture cache for native video buffers
//!
//! Each distinct native memory region is imported once as an external image
//! bound to its own texture; later frames backed by the same memory reuse that
//! texture. Entries are never evicted implicitly. They go away only when the
//! producer reports its buffer pool invalidated, when textures are reset, or on
//! teardown, because after a pool change a recycled memory address may point at
//! memory that the cached external image no longer describes.

pub mod materializer;

pub use materializer::{FrameMaterializer, MapMode, MappedFrame};

use crate::config::Config;
use crate::constants::{CROP_EDGE_SHRINK, TIMING_TARGET};
use crate::errors::VideoError;
use crate::filters::{FilterChain, FilterList};
use crate::gpu::{ExternalImageId, GraphicsContext, TextureId, TextureSampling};
use crate::media::{CropRect, MemoryHandle, MemoryId, NativeBuffer};
use crate::types::Size;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Visible region of the texture in normalized [0, 1] coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl SubRect {
    pub const FULL: SubRect = SubRect {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    /// Sub-rectangle for a crop rectangle on a texture of `texture_size`.
    ///
    /// A cropped axis is shrunk by [`CROP_EDGE_SHRINK`] pixels on both edges; an
    /// axis whose crop covers the whole texture (or no crop at all) is left alone.
    pub fn from_crop(crop: Option<CropRect>, texture_size: Size) -> SubRect {
        let Some(crop) = crop else {
            return SubRect::FULL;
        };

        let mut rect = SubRect::FULL;
        let texture_width = texture_size.width as f64;
        let texture_height = texture_size.height as f64;
        let cropped_width = crop.width as f64;
        let cropped_height = crop.height as f64;

        if cropped_width > 0.0 && cropped_width < texture_width {
            rect.x = (crop.x as f64 + CROP_EDGE_SHRINK) / texture_width;
            rect.width = (cropped_width - 2.0 * CROP_EDGE_SHRINK) / texture_width;
        }
        if cropped_height > 0.0 && cropped_height < texture_height {
            rect.y = (crop.y as f64 + CROP_EDGE_SHRINK) / texture_height;
            rect.height = (cropped_height - 2.0 * CROP_EDGE_SHRINK) / texture_height;
        }
        rect
    }

    /// Packed as the `subrect` shader uniform: offset in xy, scale in zw
    pub fn to_uniform(self) -> [f32; 4] {
        [
            self.x as f32,
            self.y as f32,
            self.width as f32,
            self.height as f32,
        ]
    }
}

impl Default for SubRect {
    fn default() -> Self {
        SubRect::FULL
    }
}

/// One imported memory region
#[derive(Debug)]
struct CachedTexture {
    /// Holds a reference on the memory for as long as the import lives
    memory: MemoryHandle,
    image: ExternalImageId,
    texture: TextureId,
}

/// Texture cache feeding the video node (the scene-graph "dynamic texture")
pub struct VideoTexture {
    buffer: Option<NativeBuffer>,
    buffer_changed: bool,
    buffers_invalidated: bool,
    sub_rect: SubRect,
    texture_size: Size,
    texture_id: Option<TextureId>,
    cache: HashMap<MemoryId, CachedTexture>,
    filters: FilterChain,
    materializer: Option<FrameMaterializer>,
    log_bind_timing: bool,
}

impl VideoTexture {
    pub fn new(config: &Config) -> Self {
        Self {
            buffer: None,
            buffer_changed: false,
            buffers_invalidated: false,
            sub_rect: SubRect::FULL,
            texture_size: Size::default(),
            texture_id: None,
            cache: HashMap::new(),
            filters: FilterChain::new(),
            materializer: None,
            log_bind_timing: config.log_bind_timing,
        }
    }

    /// Texture to sample; `None` renders nothing
    pub fn texture_id(&self) -> Option<TextureId> {
        self.texture_id
    }

    pub fn texture_size(&self) -> Size {
        self.texture_size
    }

    pub fn set_texture_size(&mut self, size: Size) {
        self.texture_size = size;
    }

    pub fn sub_rect(&self) -> SubRect {
        self.sub_rect
    }

    pub fn has_alpha_channel(&self) -> bool {
        false
    }

    pub fn has_mipmaps(&self) -> bool {
        false
    }

    /// Number of memory regions currently imported
    pub fn cached_textures(&self) -> usize {
        self.cache.len()
    }

    pub fn materializer(&self) -> Option<&FrameMaterializer> {
        self.materializer.as_ref()
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    /// Stage the buffer to show. Handing in the same buffer again is a no-op.
    pub fn set_buffer(&mut self, buffer: Option<NativeBuffer>) {
        let same = match (&self.buffer, &buffer) {
            (Some(current), Some(new)) => current.ptr_eq(new),
            (None, None) => true,
            _ => false,
        };
        if !same {
            self.buffer_changed = true;
            self.buffer = buffer;
        }
    }

    /// The producer recycled its buffer pool; drop every import before the next update
    pub fn invalidate_buffers(&mut self) {
        self.buffers_invalidated = true;
    }

    /// Drop the current texture and every import, and re-process the buffer on the
    /// next update
    pub fn reset_textures(&mut self, ctx: &mut dyn GraphicsContext) {
        self.texture_id = None;
        self.destroy_cached_textures(ctx);
        self.buffer_changed = true;
    }

    pub fn sync_filters(&mut self, list: &mut FilterList) {
        self.filters.sync(list);
    }

    /// Import or look up the texture for the staged buffer.
    ///
    /// Returns whether what should be drawn changed. A failed import clears the
    /// texture but reports no change.
    pub fn update_texture(&mut self, ctx: &mut dyn GraphicsContext) -> bool {
        if !ctx.is_current() {
            let err = VideoError::NoGraphicsContext("texture update".to_string());
            error!(error = %err, "Skipping texture update");
            return false;
        }

        if self.buffers_invalidated {
            self.buffers_invalidated = false;
            self.destroy_cached_textures(ctx);
        } else if !self.buffer_changed {
            return false;
        }
        self.buffer_changed = false;
        self.texture_id = None;

        let Some(buffer) = self.buffer.clone() else {
            return true;
        };
        let Some(memory) = buffer.memory() else {
            return true;
        };

        self.sub_rect = SubRect::from_crop(buffer.crop(), self.texture_size);

        match self.cache.get(&memory.id()) {
            Some(cached) => {
                let started = Instant::now();
                ctx.bind_external_image(cached.texture, cached.image);
                self.texture_id = Some(cached.texture);
                if self.log_bind_timing {
                    debug!(
                        target: TIMING_TARGET,
                        texture = cached.texture.0,
                        elapsed_us = started.elapsed().as_micros() as u64,
                        "Texture bound"
                    );
                }
            }
            None => match self.import(ctx, memory) {
                Some(texture) => self.texture_id = Some(texture),
                None => return false,
            },
        }

        if !self.filters.is_empty() {
            let materializer = self.materializer.get_or_insert_with(FrameMaterializer::new);
            materializer.set_texture_size(self.texture_size);
            materializer.set_texture_id(self.texture_id);
            materializer.update_frame(ctx);
            if let Err(e) = self.filters.run(materializer, ctx, self.texture_size) {
                debug!(error = %e, "Filter chain finished with an unsupported result");
            }
        }

        true
    }

    fn import(&mut self, ctx: &mut dyn GraphicsContext, memory: &MemoryHandle) -> Option<TextureId> {
        let Some(image) = ctx.create_external_image(memory, self.texture_size) else {
            let err = VideoError::ImportFailure(format!(
                "{:?} as {} external image",
                memory.id(),
                self.texture_size
            ));
            warn!(error = %err, "Rendering nothing");
            return None;
        };

        let texture = ctx.create_texture(TextureSampling::LINEAR_CLAMPED);
        let started = Instant::now();
        ctx.bind_external_image(texture, image);
        if self.log_bind_timing {
            debug!(
                target: TIMING_TARGET,
                texture = texture.0,
                elapsed_us = started.elapsed().as_micros() as u64,
                "Texture initial bind"
            );
        }

        debug!(memory = ?memory.id(), texture = texture.0, "Imported native memory");
        self.cache.insert(
            memory.id(),
            CachedTexture {
                memory: memory.clone(),
                image,
                texture,
            },
        );
        Some(texture)
    }

    fn destroy_cached_textures(&mut self, ctx: &mut dyn GraphicsContext) {
        if !self.cache.is_empty() {
            debug!(count = self.cache.len(), "Destroying cached textures");
        }
        for (_, cached) in self.cache.drain() {
            ctx.delete_texture(cached.texture);
            ctx.destroy_external_image(cached.image);
            drop(cached.memory);
        }
    }

    /// Tear down every GPU resource. Must run on the render thread.
    pub fn release(&mut self, ctx: &mut dyn GraphicsContext) {
        if !ctx.is_current() {
            error!("Releasing video texture without a current graphics context");
            return;
        }
        self.texture_id = None;
        self.destroy_cached_textures(ctx);
        if let Some(materializer) = self.materializer.take() {
            materializer.release(ctx);
        }
        self.buffer = None;
    }
}

impl Drop for VideoTexture {
    fn drop(&mut self) {
        if !self.cache.is_empty() {
            warn!(
                count = self.cache.len(),
                "Video texture dropped with imported textures still alive"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{FilterFrame, FilterOutcome, FilterRunnable, RunFlags, SurfaceFormat, VideoFilter};
    use crate::gpu::SoftwareContext;
    use crate::media::HostMemory;
    use std::sync::{Arc, Mutex};

    const SIZE: Size = Size::new(64, 32);

    fn memory(rgba: [u8; 4]) -> MemoryHandle {
        MemoryHandle::new(HostMemory::filled(SIZE.width, SIZE.height, rgba))
    }

    fn texture() -> VideoTexture {
        let mut texture = VideoTexture::new(&Config::default());
        texture.set_texture_size(SIZE);
        texture
    }

    #[test]
    fn test_sub_rect_full_without_crop() {
        assert_eq!(SubRect::from_crop(None, SIZE), SubRect::FULL);
        assert_eq!(
            SubRect::from_crop(Some(CropRect::new(0, 0, 64, 32)), SIZE),
            SubRect::FULL,
            "Full-frame crop leaves the rect untouched"
        );
    }

    #[test]
    fn test_sub_rect_shrinks_cropped_axes_only() {
        let rect = SubRect::from_crop(Some(CropRect::new(10, 0, 40, 32)), SIZE);
        assert_eq!(rect.x, 11.0 / 64.0);
        assert_eq!(rect.width, 38.0 / 64.0);
        assert_eq!(rect.y, 0.0);
        assert_eq!(rect.height, 1.0);

        let rect = SubRect::from_crop(Some(CropRect::new(0, 4, 64, 20)), SIZE);
        assert_eq!(rect.x, 0.0);
        assert_eq!(rect.y, 5.0 / 32.0);
        assert_eq!(rect.height, 18.0 / 32.0);
    }

    #[test]
    fn test_same_memory_reuses_texture_and_rebinds() {
        let mut ctx = SoftwareContext::new();
        let mut texture = texture();
        let shared = memory([1, 1, 1, 255]);

        texture.set_buffer(Some(NativeBuffer::new(Some(shared.clone()), None)));
        assert!(texture.update_texture(&mut ctx));
        let first = texture.texture_id().unwrap();

        texture.set_buffer(Some(NativeBuffer::new(Some(shared.clone()), None)));
        assert!(texture.update_texture(&mut ctx));
        assert_eq!(texture.texture_id(), Some(first));
        assert_eq!(ctx.stats().images_created, 1, "No duplicate import");
        assert_eq!(ctx.stats().binds, 2, "Binding redone on reuse");
        assert_eq!(texture.cached_textures(), 1);

        texture.release(&mut ctx);
    }

    #[test]
    fn test_unchanged_buffer_reports_no_change() {
        let mut ctx = SoftwareContext::new();
        let mut texture = texture();
        let buffer = NativeBuffer::new(Some(memory([0; 4])), None);

        texture.set_buffer(Some(buffer.clone()));
        assert!(texture.update_texture(&mut ctx));
        texture.set_buffer(Some(buffer));
        assert!(!texture.update_texture(&mut ctx));

        texture.release(&mut ctx);
    }

    #[test]
    fn test_invalidation_forces_fresh_import() {
        let mut ctx = SoftwareContext::new();
        let mut texture = texture();
        let shared = memory([2, 2, 2, 255]);
        let buffer = NativeBuffer::new(Some(shared.clone()), None);

        texture.set_buffer(Some(buffer.clone()));
        texture.update_texture(&mut ctx);
        assert_eq!(shared.ref_count(), 3, "Cache holds a memory reference");

        texture.invalidate_buffers();
        assert!(texture.update_texture(&mut ctx), "Same buffer re-processed");
        assert_eq!(ctx.stats().images_created, 2);
        assert_eq!(ctx.stats().images_destroyed, 1);
        assert_eq!(ctx.live_textures(), 1);

        texture.release(&mut ctx);
        assert_eq!(ctx.live_textures(), 0);
        assert_eq!(ctx.live_external_images(), 0);
        drop(buffer);
        assert_eq!(shared.ref_count(), 1, "Teardown released the memory reference");
    }

    #[test]
    fn test_buffer_without_memory_clears_and_reports_change() {
        let mut ctx = SoftwareContext::new();
        let mut texture = texture();

        texture.set_buffer(Some(NativeBuffer::new(Some(memory([0; 4])), None)));
        texture.update_texture(&mut ctx);
        assert!(texture.texture_id().is_some());

        texture.set_buffer(Some(NativeBuffer::new(None, None)));
        assert!(texture.update_texture(&mut ctx));
        assert_eq!(texture.texture_id(), None);

        texture.release(&mut ctx);
    }

    #[test]
    fn test_failed_import_reports_no_change() {
        let mut ctx = SoftwareContext::new();
        let mut texture = texture();
        let tiny = MemoryHandle::new(HostMemory::new(vec![0u8; 4]));

        texture.set_buffer(Some(NativeBuffer::new(Some(tiny), None)));
        assert!(!texture.update_texture(&mut ctx));
        assert_eq!(texture.texture_id(), None);
        assert_eq!(texture.cached_textures(), 0);
    }

    #[test]
    fn test_next_buffer_imports_after_failed_import() {
        let mut ctx = SoftwareContext::new();
        let mut texture = texture();
        let tiny = MemoryHandle::new(HostMemory::new(vec![0u8; 4]));

        texture.set_buffer(Some(NativeBuffer::new(Some(tiny), None)));
        assert!(!texture.update_texture(&mut ctx));

        texture.set_buffer(Some(NativeBuffer::new(Some(memory([3, 3, 3, 255])), None)));
        assert!(texture.update_texture(&mut ctx), "Stream continues after a failed import");
        assert!(texture.texture_id().is_some());
        assert_eq!(ctx.stats().images_created, 1);
        assert_eq!(texture.cached_textures(), 1);

        texture.release(&mut ctx);
    }

    #[test]
    fn test_reset_textures_reimports() {
        let mut ctx = SoftwareContext::new();
        let mut texture = texture();
        texture.set_buffer(Some(NativeBuffer::new(Some(memory([0; 4])), None)));
        texture.update_texture(&mut ctx);

        texture.reset_textures(&mut ctx);
        assert_eq!(texture.cached_textures(), 0);
        assert!(texture.update_texture(&mut ctx));
        assert_eq!(ctx.stats().images_created, 2);

        texture.release(&mut ctx);
    }

    struct RecordingFilter {
        seen: Arc<Mutex<Vec<(bool, [u8; 4])>>>,
    }

    struct RecordingRunnable {
        seen: Arc<Mutex<Vec<(bool, [u8; 4])>>>,
    }

    impl VideoFilter for RecordingFilter {
        fn create_runnable(&self) -> Box<dyn FilterRunnable> {
            Box::new(RecordingRunnable {
                seen: Arc::clone(&self.seen),
            })
        }
    }

    impl FilterRunnable for RecordingRunnable {
        fn run(
            &mut self,
            frame: &mut FilterFrame<'_>,
            _format: &SurfaceFormat,
            flags: RunFlags,
        ) -> FilterOutcome {
            let pixel = frame.image().map(|image| image.get_pixel(0, 0).0).unwrap_or([0; 4]);
            self.seen.lock().unwrap().push((flags.last_in_chain, pixel));
            FilterOutcome::Unchanged
        }
    }

    #[test]
    fn test_filters_receive_materialized_frame() {
        let mut ctx = SoftwareContext::new();
        let mut texture = texture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut list = FilterList::new();
        list.append(Arc::new(RecordingFilter { seen: seen.clone() }));
        list.append(Arc::new(RecordingFilter { seen: seen.clone() }));
        texture.sync_filters(&mut list);

        texture.set_buffer(Some(NativeBuffer::new(Some(memory([7, 8, 9, 255])), None)));
        assert!(texture.update_texture(&mut ctx));

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![(false, [7, 8, 9, 255]), (true, [7, 8, 9, 255])]);
        assert_eq!(ctx.stats().readbacks, 1, "Both filters share one read-back");
        drop(seen);

        texture.release(&mut ctx);
        assert_eq!(ctx.live_render_targets(), 0);
    }
}
