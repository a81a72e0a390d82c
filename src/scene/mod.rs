// SPDX-License-Identifier: MPL-2.0

//! Scene-graph side of the video output
//!
//! [`VideoNode`] is the geometry node the host renderer draws. It owns the
//! texture cache and the material; the material only borrows the texture when
//! the renderer asks for its state.

pub mod geometry;
pub mod material;

pub use geometry::{TexturedPoint2D, mirror_axes, rotation_steps, textured_quad};
pub use material::{MaterialUpdate, RenderState, VideoMaterial};

use crate::config::Config;
use crate::gpu::GraphicsContext;
use crate::texture::VideoTexture;
use crate::types::Rect;

/// Node hook the renderer runs once per frame before drawing
pub trait PreprocessNode {
    fn preprocess(&mut self, ctx: &mut dyn GraphicsContext);
}

/// What the renderer has to re-upload for a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyState {
    pub material: bool,
    pub geometry: bool,
}

impl DirtyState {
    pub fn is_clean(&self) -> bool {
        !self.material && !self.geometry
    }
}

/// Geometry node drawing the current video frame
pub struct VideoNode {
    texture: VideoTexture,
    material: VideoMaterial,
    vertices: [TexturedPoint2D; 4],
    dirty: DirtyState,
}

impl VideoNode {
    pub fn new(config: &Config) -> Self {
        Self {
            texture: VideoTexture::new(config),
            material: VideoMaterial,
            vertices: [TexturedPoint2D::default(); 4],
            dirty: DirtyState::default(),
        }
    }

    pub fn texture(&self) -> &VideoTexture {
        &self.texture
    }

    pub fn texture_mut(&mut self) -> &mut VideoTexture {
        &mut self.texture
    }

    pub fn material(&self) -> &VideoMaterial {
        &self.material
    }

    /// Vertices in strip order
    pub fn vertices(&self) -> &[TexturedPoint2D; 4] {
        &self.vertices
    }

    pub fn mark_material_dirty(&mut self) {
        self.dirty.material = true;
    }

    pub fn mark_geometry_dirty(&mut self) {
        self.dirty.geometry = true;
    }

    pub fn dirty(&self) -> DirtyState {
        self.dirty
    }

    /// Hand the dirty state to the renderer and clear it
    pub fn take_dirty(&mut self) -> DirtyState {
        std::mem::take(&mut self.dirty)
    }

    /// Material uniforms for the next draw
    pub fn material_update(&self, state: &RenderState, first_use: bool) -> MaterialUpdate {
        self.material.update_state(&self.texture, state, first_use)
    }

    /// Lay the quad over `rect`, rotating content by `orientation` degrees
    /// (a multiple of 90) and mirroring texture axes as requested.
    pub fn set_bounding_rect(
        &mut self,
        rect: Rect,
        orientation: i32,
        horizontal_mirror: bool,
        vertical_mirror: bool,
    ) {
        self.vertices = textured_quad(rect, orientation, horizontal_mirror, vertical_mirror);
    }

    /// Tear down the node's GPU resources on the render thread
    pub fn destroy(mut self, ctx: &mut dyn GraphicsContext) {
        self.texture.release(ctx);
    }
}

impl PreprocessNode for VideoNode {
    fn preprocess(&mut self, ctx: &mut dyn GraphicsContext) {
        if self.texture.update_texture(ctx) {
            self.mark_material_dirty();
        }
    }
}
