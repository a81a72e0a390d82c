// SPDX-License-Identifier: MPL-2.0

//! On-demand CPU materialization of the current video texture
//!
//! External-image textures can only be sampled by shaders, so to hand pixels to
//! filters the frame is blitted into an offscreen render target, which can be
//! read back. The blit runs between ordinary scene-graph draws and must leave
//! the fixed-function state exactly as it found it.
//!
//! All state sits behind one lock: filters may map the frame while the render
//! thread updates it.

use crate::errors::{VideoError, VideoResult};
use crate::gpu::{
    BlitVertex, CapabilityState, DrawCall, GraphicsContext, IDENTITY_MATRIX, ProgramId,
    RenderTargetId, ShaderSource, TextureId, Topology, Viewport,
};
use crate::types::Size;
use image::RgbaImage;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, warn};

const BLIT_VERTEX_SHADER: &str = "\
attribute highp vec4 vertexCoordsArray;
attribute highp vec2 textureCoordArray;
uniform highp mat4 texMatrix;
varying highp vec2 textureCoords;
void main(void)
{
    gl_Position = vertexCoordsArray;
    textureCoords = (texMatrix * vec4(textureCoordArray, 0.0, 1.0)).xy;
}
";

const BLIT_FRAGMENT_SHADER: &str = "\
#extension GL_OES_EGL_image_external : require
varying highp vec2 textureCoords;
uniform samplerExternalOES frameTexture;
void main()
{
    gl_FragColor = texture2D(frameTexture, textureCoords);
}
";

pub const BLIT_SHADER: ShaderSource = ShaderSource {
    vertex: BLIT_VERTEX_SHADER,
    fragment: BLIT_FRAGMENT_SHADER,
    attributes: ["vertexCoordsArray", "textureCoordArray"],
    sampler: "frameTexture",
    tex_matrix: Some("texMatrix"),
};

/// Full-target quad in fan order, top row of the texture at the top
const BLIT_QUAD: [BlitVertex; 4] = [
    BlitVertex {
        position: [-1.0, 1.0],
        tex_coord: [0.0, 0.0],
    },
    BlitVertex {
        position: [1.0, 1.0],
        tex_coord: [1.0, 0.0],
    },
    BlitVertex {
        position: [1.0, -1.0],
        tex_coord: [1.0, 1.0],
    },
    BlitVertex {
        position: [-1.0, -1.0],
        tex_coord: [0.0, 1.0],
    },
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MapMode {
    #[default]
    NotMapped,
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// A mapped frame: shared pixels plus row pitch
#[derive(Debug, Clone)]
pub struct MappedFrame {
    pub image: Arc<RgbaImage>,
    pub bytes_per_line: usize,
}

impl MappedFrame {
    pub fn bytes(&self) -> &[u8] {
        self.image.as_raw()
    }
}

#[derive(Debug, Default)]
struct MaterializerState {
    texture_id: Option<TextureId>,
    size: Size,
    /// The current texture has been blitted into the target
    rendered: bool,
    /// The target holds pixels not yet read back
    needs_readback: bool,
    map_mode: MapMode,
    target: Option<RenderTargetId>,
    program: Option<ProgramId>,
    image: Option<Arc<RgbaImage>>,
}

/// Offscreen copy of the current video texture
#[derive(Debug, Default)]
pub struct FrameMaterializer {
    state: Mutex<MaterializerState>,
}

impl FrameMaterializer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MaterializerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn texture_id(&self) -> Option<TextureId> {
        self.lock().texture_id
    }

    pub fn texture_size(&self) -> Size {
        self.lock().size
    }

    pub fn map_mode(&self) -> MapMode {
        self.lock().map_mode
    }

    pub fn set_texture_size(&self, size: Size) {
        self.lock().size = size;
    }

    /// Bind a new frame; the next update re-renders and the next read re-reads
    pub fn set_texture_id(&self, texture: Option<TextureId>) {
        let mut state = self.lock();
        state.texture_id = texture;
        state.rendered = false;
        state.needs_readback = false;
        state.image = None;
    }

    /// Render the bound texture into the target unless already done for it
    pub fn update_frame(&self, ctx: &mut dyn GraphicsContext) {
        let mut state = self.lock();
        Self::update_frame_locked(&mut state, ctx);
    }

    /// Create the render target and blit program.
    ///
    /// Only valid on the render thread: targets and programs belong to the
    /// context that created them.
    pub fn ensure_resources(&self, ctx: &mut dyn GraphicsContext) -> VideoResult<()> {
        let mut state = self.lock();
        Self::ensure_resources_locked(&mut state, ctx)
    }

    /// Blit the bound texture into the offscreen target
    pub fn render(&self, ctx: &mut dyn GraphicsContext) -> VideoResult<()> {
        let mut state = self.lock();
        Self::render_locked(&mut state, ctx)
    }

    /// CPU copy of the bound frame, rendering it first if needed.
    ///
    /// The target is read back at most once per bound texture; until a new
    /// texture is bound the same image is returned.
    pub fn to_image(&self, ctx: &mut dyn GraphicsContext) -> Option<Arc<RgbaImage>> {
        let mut state = self.lock();
        Self::to_image_locked(&mut state, ctx)
    }

    /// Map the frame. Only read-only mapping is supported.
    pub fn map(&self, ctx: &mut dyn GraphicsContext, mode: MapMode) -> Option<MappedFrame> {
        let mut state = self.lock();
        if state.map_mode != MapMode::NotMapped || mode != MapMode::ReadOnly {
            debug!(current = ?state.map_mode, requested = ?mode, "Refusing to map frame");
            return None;
        }

        let image = Self::to_image_locked(&mut state, ctx)?;
        state.map_mode = mode;
        let bytes_per_line = image.width() as usize * 4;
        Some(MappedFrame {
            image,
            bytes_per_line,
        })
    }

    pub fn unmap(&self) {
        self.lock().map_mode = MapMode::NotMapped;
    }

    /// Destroy the GPU resources. Must run on the render thread.
    pub fn release(&self, ctx: &mut dyn GraphicsContext) {
        let mut state = self.lock();
        state.map_mode = MapMode::NotMapped;
        state.image = None;
        state.rendered = false;
        state.needs_readback = false;

        if !ctx.is_current() {
            error!("Releasing materializer resources without a current graphics context");
            return;
        }
        if let Some(target) = state.target.take() {
            ctx.delete_render_target(target);
        }
        if let Some(program) = state.program.take() {
            ctx.delete_program(program);
        }
    }

    fn update_frame_locked(state: &mut MaterializerState, ctx: &mut dyn GraphicsContext) {
        if state.rendered {
            return;
        }
        match Self::render_locked(state, ctx) {
            Ok(()) => state.rendered = true,
            Err(e) => warn!(error = %e, "Failed to materialize video frame"),
        }
    }

    fn ensure_resources_locked(
        state: &mut MaterializerState,
        ctx: &mut dyn GraphicsContext,
    ) -> VideoResult<()> {
        if !ctx.is_current() {
            error!("No current graphics context, materializer must run on the render thread");
            return Err(VideoError::NoGraphicsContext(
                "materializer resources requested off the render thread".to_string(),
            ));
        }

        if let Some(target) = state.target {
            if ctx.render_target_size(target) != Some(state.size) {
                debug!(size = %state.size, "Texture size changed, recreating render target");
                ctx.delete_render_target(target);
                state.target = None;
            }
        }

        if state.target.is_none() {
            state.target = Some(ctx.create_render_target(state.size)?);
        }

        if state.program.is_none() {
            state.program = Some(ctx.create_program(&BLIT_SHADER)?);
        }
        Ok(())
    }

    fn render_locked(
        state: &mut MaterializerState,
        ctx: &mut dyn GraphicsContext,
    ) -> VideoResult<()> {
        if !state.size.is_valid() {
            return Ok(());
        }
        let Some(texture) = state.texture_id else {
            return Ok(());
        };

        Self::ensure_resources_locked(state, ctx)?;
        let (Some(target), Some(program)) = (state.target, state.program) else {
            return Err(VideoError::Gpu("materializer resources missing".to_string()));
        };

        let saved = CapabilityState::save_and_disable(ctx);
        ctx.bind_render_target(Some(target));
        ctx.set_viewport(Viewport::full(state.size));

        let result = ctx.draw(&DrawCall {
            program,
            texture,
            vertices: &BLIT_QUAD,
            tex_matrix: IDENTITY_MATRIX,
            topology: Topology::TriangleFan,
        });

        ctx.bind_render_target(None);
        saved.restore(ctx);

        result?;
        state.needs_readback = true;
        Ok(())
    }

    fn to_image_locked(
        state: &mut MaterializerState,
        ctx: &mut dyn GraphicsContext,
    ) -> Option<Arc<RgbaImage>> {
        Self::update_frame_locked(state, ctx);
        if state.needs_readback {
            if !ctx.is_current() {
                error!("Frame read-back requested without a current graphics context");
                return state.image.clone();
            }
            let target = state.target?;
            match ctx.read_render_target(target) {
                Ok(image) => {
                    state.image = Some(Arc::new(image));
                    state.needs_readback = false;
                }
                Err(e) => warn!(error = %e, "Frame read-back failed"),
            }
        }
        state.image.clone()
    }
}

impl Drop for FrameMaterializer {
    fn drop(&mut self) {
        let state = self.lock();
        if state.target.is_some() || state.program.is_some() {
            warn!("Frame materializer dropped with live GPU resources");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Capability, SoftwareContext, TextureSampling};
    use crate::media::{HostMemory, MemoryHandle};

    fn bound_texture(ctx: &mut SoftwareContext, size: Size, rgba: [u8; 4]) -> TextureId {
        let memory = MemoryHandle::new(HostMemory::filled(size.width, size.height, rgba));
        let image = ctx.create_external_image(&memory, size).unwrap();
        let texture = ctx.create_texture(TextureSampling::LINEAR_CLAMPED);
        ctx.bind_external_image(texture, image);
        texture
    }

    #[test]
    fn test_render_restores_capabilities() {
        let mut ctx = SoftwareContext::new();
        let size = Size::new(4, 4);
        let texture = bound_texture(&mut ctx, size, [10, 20, 30, 255]);
        ctx.set_enabled(Capability::Blend, true);
        ctx.set_enabled(Capability::DepthTest, true);

        let materializer = FrameMaterializer::new();
        materializer.set_texture_size(size);
        materializer.set_texture_id(Some(texture));
        materializer.render(&mut ctx).unwrap();

        assert!(ctx.is_enabled(Capability::Blend));
        assert!(ctx.is_enabled(Capability::DepthTest));
        assert!(!ctx.is_enabled(Capability::StencilTest));
        assert!(!ctx.is_enabled(Capability::ScissorTest));
        assert_eq!(ctx.bound_render_target(), None, "Default target rebound");
        assert_eq!(ctx.viewport(), Viewport::full(size));

        materializer.release(&mut ctx);
    }

    #[test]
    fn test_to_image_is_memoized_per_texture() {
        let mut ctx = SoftwareContext::new();
        let size = Size::new(4, 2);
        let first = bound_texture(&mut ctx, size, [255, 0, 0, 255]);
        let second = bound_texture(&mut ctx, size, [0, 0, 255, 255]);

        let materializer = FrameMaterializer::new();
        materializer.set_texture_size(size);
        materializer.set_texture_id(Some(first));
        materializer.update_frame(&mut ctx);

        let a = materializer.to_image(&mut ctx).unwrap();
        let b = materializer.to_image(&mut ctx).unwrap();
        assert!(Arc::ptr_eq(&a, &b), "Second read returns the memoized image");
        assert_eq!(ctx.stats().readbacks, 1);
        assert_eq!(a.get_pixel(0, 0).0, [255, 0, 0, 255]);

        materializer.set_texture_id(Some(second));
        materializer.update_frame(&mut ctx);
        let c = materializer.to_image(&mut ctx).unwrap();
        assert_eq!(ctx.stats().readbacks, 2, "New texture forces a re-read");
        assert_eq!(c.get_pixel(3, 1).0, [0, 0, 255, 255]);

        materializer.release(&mut ctx);
    }

    #[test]
    fn test_to_image_after_texture_change_reads_new_frame() {
        let mut ctx = SoftwareContext::new();
        let size = Size::new(4, 2);
        let red = bound_texture(&mut ctx, size, [255, 0, 0, 255]);
        let blue = bound_texture(&mut ctx, size, [0, 0, 255, 255]);

        let materializer = FrameMaterializer::new();
        materializer.set_texture_size(size);
        materializer.set_texture_id(Some(red));
        materializer.update_frame(&mut ctx);
        let first = materializer.to_image(&mut ctx).unwrap();
        assert_eq!(first.get_pixel(0, 0).0, [255, 0, 0, 255]);

        materializer.set_texture_id(Some(blue));
        let second = materializer.to_image(&mut ctx).unwrap();
        assert!(!Arc::ptr_eq(&first, &second), "Stale image returned");
        assert_eq!(second.get_pixel(0, 0).0, [0, 0, 255, 255]);
        assert_eq!(ctx.stats().draws, 2, "Rendered on demand");
        assert_eq!(ctx.stats().readbacks, 2);

        let again = materializer.to_image(&mut ctx).unwrap();
        assert!(Arc::ptr_eq(&second, &again));
        assert_eq!(ctx.stats().readbacks, 2);

        materializer.release(&mut ctx);
    }

    #[test]
    fn test_to_image_without_texture_is_none() {
        let mut ctx = SoftwareContext::new();
        let materializer = FrameMaterializer::new();
        materializer.set_texture_size(Size::new(4, 4));
        assert!(materializer.to_image(&mut ctx).is_none());

        materializer.set_texture_id(None);
        assert!(materializer.to_image(&mut ctx).is_none());
        assert_eq!(ctx.stats().draws, 0);
    }

    #[test]
    fn test_map_from_another_thread_sees_whole_frames() {
        let mut ctx = SoftwareContext::new();
        let size = Size::new(8, 8);
        let red = bound_texture(&mut ctx, size, [255, 0, 0, 255]);
        let blue = bound_texture(&mut ctx, size, [0, 0, 255, 255]);
        let materializer = FrameMaterializer::new();
        materializer.set_texture_size(size);
        // Created here, so never current on the mapping thread
        let mut mapper_ctx = SoftwareContext::new();

        std::thread::scope(|scope| {
            let mapper = scope.spawn(|| {
                for _ in 0..200 {
                    if let Some(frame) = materializer.map(&mut mapper_ctx, MapMode::ReadOnly) {
                        let first = frame.image.get_pixel(0, 0).0;
                        assert!(first == [255, 0, 0, 255] || first == [0, 0, 255, 255]);
                        assert!(
                            frame.image.pixels().all(|pixel| pixel.0 == first),
                            "Mapped frame mixes two renders"
                        );
                        assert_eq!(materializer.map_mode(), MapMode::ReadOnly);
                        materializer.unmap();
                    }
                }
            });

            for i in 0..200 {
                let (texture, rgba) = if i % 2 == 0 {
                    (red, [255, 0, 0, 255])
                } else {
                    (blue, [0, 0, 255, 255])
                };
                materializer.set_texture_id(Some(texture));
                let image = materializer.to_image(&mut ctx).unwrap();
                assert_eq!(image.get_pixel(7, 7).0, rgba);
            }

            mapper.join().unwrap();
        });

        assert_eq!(mapper_ctx.stats().draws, 0, "Off-thread maps never draw");
        materializer.release(&mut ctx);
    }

    #[test]
    fn test_update_frame_renders_once_per_texture() {
        let mut ctx = SoftwareContext::new();
        let size = Size::new(2, 2);
        let texture = bound_texture(&mut ctx, size, [1, 2, 3, 4]);

        let materializer = FrameMaterializer::new();
        materializer.set_texture_size(size);
        materializer.set_texture_id(Some(texture));
        materializer.update_frame(&mut ctx);
        materializer.update_frame(&mut ctx);
        assert_eq!(ctx.stats().draws, 1);

        materializer.set_texture_id(Some(texture));
        materializer.update_frame(&mut ctx);
        assert_eq!(ctx.stats().draws, 2, "Rebinding the same id is a new frame");

        materializer.release(&mut ctx);
    }

    #[test]
    fn test_target_recreated_on_resize_program_kept() {
        let mut ctx = SoftwareContext::new();
        let materializer = FrameMaterializer::new();

        materializer.set_texture_size(Size::new(4, 4));
        materializer.ensure_resources(&mut ctx).unwrap();
        materializer.ensure_resources(&mut ctx).unwrap();
        assert_eq!(ctx.live_render_targets(), 1);
        assert_eq!(ctx.live_programs(), 1);

        materializer.set_texture_size(Size::new(8, 4));
        materializer.ensure_resources(&mut ctx).unwrap();
        assert_eq!(ctx.live_render_targets(), 1, "Old target destroyed");
        assert_eq!(ctx.live_programs(), 1, "Program created once");

        materializer.release(&mut ctx);
        assert_eq!(ctx.live_render_targets(), 0);
        assert_eq!(ctx.live_programs(), 0);
    }

    #[test]
    fn test_ensure_resources_off_render_thread_is_reported() {
        let ctx = SoftwareContext::new();
        let result = std::thread::spawn(move || {
            let mut ctx = ctx;
            let materializer = FrameMaterializer::new();
            materializer.set_texture_size(Size::new(4, 4));
            materializer.ensure_resources(&mut ctx)
        })
        .join()
        .unwrap();

        assert!(matches!(result, Err(VideoError::NoGraphicsContext(_))));
    }

    #[test]
    fn test_map_is_read_only_and_exclusive() {
        let mut ctx = SoftwareContext::new();
        let size = Size::new(3, 2);
        let texture = bound_texture(&mut ctx, size, [9, 9, 9, 255]);

        let materializer = FrameMaterializer::new();
        materializer.set_texture_size(size);
        materializer.set_texture_id(Some(texture));

        assert!(materializer.map(&mut ctx, MapMode::ReadWrite).is_none());

        let mapped = materializer.map(&mut ctx, MapMode::ReadOnly).unwrap();
        assert_eq!(mapped.bytes_per_line, 12);
        assert_eq!(mapped.bytes().len(), 24);
        assert_eq!(materializer.map_mode(), MapMode::ReadOnly);
        assert!(
            materializer.map(&mut ctx, MapMode::ReadOnly).is_none(),
            "Already mapped"
        );

        materializer.unmap();
        assert_eq!(materializer.map_mode(), MapMode::NotMapped);
        materializer.release(&mut ctx);
    }
}
