// SPDX-License-Identifier: MPL-2.0

//! The GPU seam.
//!
//! Every GPU call the pipeline makes goes through [`GraphicsContext`]. An
//! implementation wraps one graphics context, which is only valid on the render
//! thread it is current on; [`GraphicsContext::is_current`] lets callers detect
//! (and refuse) use from any other thread.
//!
//! The vocabulary follows external-image texturing: native memory is wrapped in an
//! *external image*, which is then bound to a *texture* that shaders sample
//! directly without a CPU copy.

pub mod gl;
pub mod software;

pub use gl::GlContext;
pub use software::SoftwareContext;

use crate::errors::VideoResult;
use crate::media::MemoryHandle;
use crate::types::Size;
use image::RgbaImage;

/// Imported external-image handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternalImageId(pub u32);

/// GPU texture name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Offscreen render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderTargetId(pub u32);

/// Linked shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

/// Texture filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filtering {
    Nearest,
    Linear,
}

/// Texture coordinate wrapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrap {
    Repeat,
    ClampToEdge,
}

/// Sampling parameters applied when a texture is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureSampling {
    pub min_filter: Filtering,
    pub mag_filter: Filtering,
    pub wrap_s: Wrap,
    pub wrap_t: Wrap,
}

impl TextureSampling {
    /// Linear filtering, clamped to edge: what video frames are sampled with
    pub const LINEAR_CLAMPED: TextureSampling = TextureSampling {
        min_filter: Filtering::Linear,
        mag_filter: Filtering::Linear,
        wrap_s: Wrap::ClampToEdge,
        wrap_t: Wrap::ClampToEdge,
    };
}

/// Fixed-function state toggled around offscreen draws
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Blend,
    DepthTest,
    StencilTest,
    ScissorTest,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Blend,
        Capability::DepthTest,
        Capability::StencilTest,
        Capability::ScissorTest,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn full(size: Size) -> Self {
        Self {
            x: 0,
            y: 0,
            width: size.width,
            height: size.height,
        }
    }
}

/// Vertex stage / fragment stage source pair plus the names draws bind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderSource {
    pub vertex: &'static str,
    pub fragment: &'static str,
    /// Position and texture-coordinate attributes, bound to locations 0 and 1
    pub attributes: [&'static str; 2],
    /// Sampler reading texture unit 0
    pub sampler: &'static str,
    /// Uniform receiving [`DrawCall::tex_matrix`], if the shader has one
    pub tex_matrix: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    TriangleFan,
    TriangleStrip,
}

/// Position in clip space plus texture coordinate
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlitVertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
}

pub const IDENTITY_MATRIX: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// A single draw sampling an external-image texture
#[derive(Debug, Clone, Copy)]
pub struct DrawCall<'a> {
    pub program: ProgramId,
    /// Texture bound to unit 0
    pub texture: TextureId,
    pub vertices: &'a [BlitVertex],
    /// Column-major transform applied to texture coordinates
    pub tex_matrix: [[f32; 4]; 4],
    pub topology: Topology,
}

/// One graphics context, current on the render thread
pub trait GraphicsContext {
    /// The context is current on the calling thread
    fn is_current(&self) -> bool;

    /// Wrap native memory in an external image. `None` when the memory cannot be imported.
    fn create_external_image(
        &mut self,
        memory: &MemoryHandle,
        size: Size,
    ) -> Option<ExternalImageId>;

    fn destroy_external_image(&mut self, image: ExternalImageId);

    /// Allocate a texture name with the given sampling parameters
    fn create_texture(&mut self, sampling: TextureSampling) -> TextureId;

    fn delete_texture(&mut self, texture: TextureId);

    /// Attach an external image to a texture. Bindings do not persist across
    /// frames, so this has to be repeated every time a cached texture is reused.
    fn bind_external_image(&mut self, texture: TextureId, image: ExternalImageId);

    fn is_enabled(&self, capability: Capability) -> bool;

    fn set_enabled(&mut self, capability: Capability, enabled: bool);

    fn create_render_target(&mut self, size: Size) -> VideoResult<RenderTargetId>;

    fn delete_render_target(&mut self, target: RenderTargetId);

    fn render_target_size(&self, target: RenderTargetId) -> Option<Size>;

    /// Direct drawing at `target`, or at the default framebuffer for `None`
    fn bind_render_target(&mut self, target: Option<RenderTargetId>);

    fn set_viewport(&mut self, viewport: Viewport);

    fn create_program(&mut self, source: &ShaderSource) -> VideoResult<ProgramId>;

    fn delete_program(&mut self, program: ProgramId);

    fn draw(&mut self, call: &DrawCall<'_>) -> VideoResult<()>;

    /// Copy a render target's pixels to the CPU, top row first
    fn read_render_target(&mut self, target: RenderTargetId) -> VideoResult<RgbaImage>;
}

/// Snapshot of the enable state of every [`Capability`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityState {
    enabled: [bool; 4],
}

impl CapabilityState {
    /// Record the current state and disable every capability
    pub fn save_and_disable(ctx: &mut dyn GraphicsContext) -> Self {
        let mut enabled = [false; 4];
        for (slot, capability) in enabled.iter_mut().zip(Capability::ALL) {
            *slot = ctx.is_enabled(capability);
            if *slot {
                ctx.set_enabled(capability, false);
            }
        }
        Self { enabled }
    }

    /// Re-enable whatever was enabled when the snapshot was taken
    pub fn restore(self, ctx: &mut dyn GraphicsContext) {
        for (enabled, capability) in self.enabled.into_iter().zip(Capability::ALL) {
            if enabled {
                ctx.set_enabled(capability, true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_state_round_trip() {
        let mut ctx = SoftwareContext::new();
        ctx.set_enabled(Capability::Blend, true);
        ctx.set_enabled(Capability::ScissorTest, true);

        let saved = CapabilityState::save_and_disable(&mut ctx);
        for capability in Capability::ALL {
            assert!(!ctx.is_enabled(capability), "{:?} left enabled", capability);
        }

        saved.restore(&mut ctx);
        assert!(ctx.is_enabled(Capability::Blend));
        assert!(ctx.is_enabled(Capability::ScissorTest));
        assert!(!ctx.is_enabled(Capability::DepthTest));
        assert!(!ctx.is_enabled(Capability::StencilTest));
    }
}
