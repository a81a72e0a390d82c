// SPDX-License-Identifier: MPL-2.0

//! CPU implementation of [`GraphicsContext`]
//!
//! Imports tightly packed RGBA memory as external images, rasterizes textured
//! triangles into offscreen targets and reads them back. It is current only on
//! the thread that created it (or last called [`SoftwareContext::make_current`]),
//! which mirrors how a real context is bound to the render thread.

use super::{
    BlitVertex, Capability, DrawCall, ExternalImageId, Filtering, GraphicsContext, ProgramId,
    RenderTargetId, ShaderSource, TextureId, TextureSampling, Topology, Viewport,
};
use crate::errors::{VideoError, VideoResult};
use crate::media::MemoryHandle;
use crate::types::Size;
use image::{Rgba, RgbaImage};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

const EDGE_EPSILON: f32 = 1e-5;

/// Counters of the GPU work issued through a [`SoftwareContext`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    pub images_created: usize,
    pub images_destroyed: usize,
    pub textures_created: usize,
    pub textures_deleted: usize,
    pub binds: usize,
    pub draws: usize,
    pub readbacks: usize,
}

#[derive(Debug)]
struct SoftwareTexture {
    sampling: TextureSampling,
    image: Option<ExternalImageId>,
}

/// Software rasterizer behind the [`GraphicsContext`] seam
#[derive(Debug)]
pub struct SoftwareContext {
    owner: ThreadId,
    next_name: u32,
    images: HashMap<ExternalImageId, Arc<RgbaImage>>,
    textures: HashMap<TextureId, SoftwareTexture>,
    targets: HashMap<RenderTargetId, RgbaImage>,
    programs: HashMap<ProgramId, ShaderSource>,
    bound_target: Option<RenderTargetId>,
    viewport: Viewport,
    enabled: HashSet<Capability>,
    stats: ContextStats,
}

impl Default for SoftwareContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareContext {
    /// Create a context current on the calling thread
    pub fn new() -> Self {
        Self {
            owner: thread::current().id(),
            next_name: 1,
            images: HashMap::new(),
            textures: HashMap::new(),
            targets: HashMap::new(),
            programs: HashMap::new(),
            bound_target: None,
            viewport: Viewport::default(),
            enabled: HashSet::new(),
            stats: ContextStats::default(),
        }
    }

    /// Make the context current on the calling thread
    pub fn make_current(&mut self) {
        self.owner = thread::current().id();
    }

    pub fn stats(&self) -> ContextStats {
        self.stats
    }

    pub fn live_external_images(&self) -> usize {
        self.images.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_render_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn bound_render_target(&self) -> Option<RenderTargetId> {
        self.bound_target
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// External image currently attached to `texture`
    pub fn texture_binding(&self, texture: TextureId) -> Option<ExternalImageId> {
        self.textures.get(&texture).and_then(|t| t.image)
    }

    pub fn texture_sampling(&self, texture: TextureId) -> Option<TextureSampling> {
        self.textures.get(&texture).map(|t| t.sampling)
    }

    fn next_name(&mut self) -> u32 {
        let name = self.next_name;
        self.next_name += 1;
        name
    }
}

impl GraphicsContext for SoftwareContext {
    fn is_current(&self) -> bool {
        thread::current().id() == self.owner
    }

    fn create_external_image(
        &mut self,
        memory: &MemoryHandle,
        size: Size,
    ) -> Option<ExternalImageId> {
        if !size.is_valid() {
            debug!(%size, "Refusing to import memory with an empty size");
            return None;
        }
        let mut bytes = memory.memory().read_bytes()?;
        let expected = size.width as usize * size.height as usize * 4;
        if bytes.len() < expected {
            debug!(
                len = bytes.len(),
                expected,
                "Memory too small for an RGBA image of the requested size"
            );
            return None;
        }
        bytes.truncate(expected);
        let image = RgbaImage::from_raw(size.width, size.height, bytes)?;

        let id = ExternalImageId(self.next_name());
        self.images.insert(id, Arc::new(image));
        self.stats.images_created += 1;
        Some(id)
    }

    fn destroy_external_image(&mut self, image: ExternalImageId) {
        if self.images.remove(&image).is_some() {
            self.stats.images_destroyed += 1;
        }
        for texture in self.textures.values_mut() {
            if texture.image == Some(image) {
                texture.image = None;
            }
        }
    }

    fn create_texture(&mut self, sampling: TextureSampling) -> TextureId {
        let id = TextureId(self.next_name());
        self.textures.insert(
            id,
            SoftwareTexture {
                sampling,
                image: None,
            },
        );
        self.stats.textures_created += 1;
        id
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_some() {
            self.stats.textures_deleted += 1;
        }
    }

    fn bind_external_image(&mut self, texture: TextureId, image: ExternalImageId) {
        if !self.images.contains_key(&image) {
            warn!(?image, "Binding an unknown external image");
            return;
        }
        match self.textures.get_mut(&texture) {
            Some(entry) => {
                entry.image = Some(image);
                self.stats.binds += 1;
            }
            None => warn!(?texture, "Binding to an unknown texture"),
        }
    }

    fn is_enabled(&self, capability: Capability) -> bool {
        self.enabled.contains(&capability)
    }

    fn set_enabled(&mut self, capability: Capability, enabled: bool) {
        if enabled {
            self.enabled.insert(capability);
        } else {
            self.enabled.remove(&capability);
        }
    }

    fn create_render_target(&mut self, size: Size) -> VideoResult<RenderTargetId> {
        if !size.is_valid() {
            return Err(VideoError::Gpu(format!("invalid render target size {}", size)));
        }
        let id = RenderTargetId(self.next_name());
        self.targets
            .insert(id, RgbaImage::new(size.width, size.height));
        Ok(id)
    }

    fn delete_render_target(&mut self, target: RenderTargetId) {
        self.targets.remove(&target);
        if self.bound_target == Some(target) {
            self.bound_target = None;
        }
    }

    fn render_target_size(&self, target: RenderTargetId) -> Option<Size> {
        self.targets
            .get(&target)
            .map(|image| Size::new(image.width(), image.height()))
    }

    fn bind_render_target(&mut self, target: Option<RenderTargetId>) {
        match target {
            Some(id) if !self.targets.contains_key(&id) => {
                warn!(?id, "Binding an unknown render target");
            }
            _ => self.bound_target = target,
        }
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn create_program(&mut self, source: &ShaderSource) -> VideoResult<ProgramId> {
        if source.vertex.trim().is_empty() || source.fragment.trim().is_empty() {
            return Err(VideoError::Gpu("empty shader stage".to_string()));
        }
        let id = ProgramId(self.next_name());
        self.programs.insert(id, *source);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> VideoResult<()> {
        let target_id = self
            .bound_target
            .ok_or_else(|| VideoError::Gpu("no render target bound".to_string()))?;
        if !self.programs.contains_key(&call.program) {
            return Err(VideoError::Gpu(format!("unknown program {:?}", call.program)));
        }
        let texture = self
            .textures
            .get(&call.texture)
            .ok_or_else(|| VideoError::Gpu(format!("unknown texture {:?}", call.texture)))?;
        let filtering = texture.sampling.mag_filter;
        let source = texture
            .image
            .and_then(|image| self.images.get(&image))
            .cloned()
            .ok_or_else(|| VideoError::Gpu("texture has no external image bound".to_string()))?;

        let triangles = triangles(call.topology, call.vertices.len());
        let target = self
            .targets
            .get_mut(&target_id)
            .ok_or_else(|| VideoError::Gpu("render target vanished".to_string()))?;

        let viewport = self.viewport;
        for py in 0..viewport.height {
            for px in 0..viewport.width {
                let x = viewport.x + px as i32;
                let y = viewport.y + py as i32;
                if x < 0 || y < 0 || x as u32 >= target.width() || y as u32 >= target.height() {
                    continue;
                }
                let ndc = [
                    (px as f32 + 0.5) / viewport.width as f32 * 2.0 - 1.0,
                    1.0 - (py as f32 + 0.5) / viewport.height as f32 * 2.0,
                ];
                for [a, b, c] in &triangles {
                    let (va, vb, vc) = (&call.vertices[*a], &call.vertices[*b], &call.vertices[*c]);
                    if let Some(weights) = barycentric(va, vb, vc, ndc) {
                        let tex = interpolate(va, vb, vc, weights);
                        let tex = transform(&call.tex_matrix, tex);
                        target.put_pixel(x as u32, y as u32, sample(&source, tex, filtering));
                        break;
                    }
                }
            }
        }

        self.stats.draws += 1;
        Ok(())
    }

    fn read_render_target(&mut self, target: RenderTargetId) -> VideoResult<RgbaImage> {
        let image = self
            .targets
            .get(&target)
            .cloned()
            .ok_or_else(|| VideoError::Gpu(format!("unknown render target {:?}", target)))?;
        self.stats.readbacks += 1;
        Ok(image)
    }
}

fn triangles(topology: Topology, count: usize) -> Vec<[usize; 3]> {
    if count < 3 {
        return Vec::new();
    }
    match topology {
        Topology::TriangleFan => (1..count - 1).map(|i| [0, i, i + 1]).collect(),
        Topology::TriangleStrip => (0..count - 2).map(|i| [i, i + 1, i + 2]).collect(),
    }
}

fn barycentric(a: &BlitVertex, b: &BlitVertex, c: &BlitVertex, p: [f32; 2]) -> Option<[f32; 3]> {
    let [ax, ay] = a.position;
    let [bx, by] = b.position;
    let [cx, cy] = c.position;
    let det = (by - cy) * (ax - cx) + (cx - bx) * (ay - cy);
    if det.abs() < f32::EPSILON {
        return None;
    }
    let w1 = ((by - cy) * (p[0] - cx) + (cx - bx) * (p[1] - cy)) / det;
    let w2 = ((cy - ay) * (p[0] - cx) + (ax - cx) * (p[1] - cy)) / det;
    let w3 = 1.0 - w1 - w2;
    (w1 >= -EDGE_EPSILON && w2 >= -EDGE_EPSILON && w3 >= -EDGE_EPSILON).then_some([w1, w2, w3])
}

fn interpolate(a: &BlitVertex, b: &BlitVertex, c: &BlitVertex, w: [f32; 3]) -> [f32; 2] {
    [
        a.tex_coord[0] * w[0] + b.tex_coord[0] * w[1] + c.tex_coord[0] * w[2],
        a.tex_coord[1] * w[0] + b.tex_coord[1] * w[1] + c.tex_coord[1] * w[2],
    ]
}

fn transform(m: &[[f32; 4]; 4], [u, v]: [f32; 2]) -> [f32; 2] {
    [
        m[0][0] * u + m[1][0] * v + m[3][0],
        m[0][1] * u + m[1][1] * v + m[3][1],
    ]
}

fn sample(image: &RgbaImage, [u, v]: [f32; 2], filtering: Filtering) -> Rgba<u8> {
    let (width, height) = (image.width() as f32, image.height() as f32);
    let texel = |x: f32, y: f32| -> Rgba<u8> {
        let x = x.clamp(0.0, width - 1.0) as u32;
        let y = y.clamp(0.0, height - 1.0) as u32;
        *image.get_pixel(x, y)
    };
    match filtering {
        Filtering::Nearest => texel((u * width).floor(), (v * height).floor()),
        Filtering::Linear => {
            let fx = u * width - 0.5;
            let fy = v * height - 0.5;
            let (x0, y0) = (fx.floor(), fy.floor());
            let (tx, ty) = (fx - x0, fy - y0);
            let corners = [
                (texel(x0, y0), (1.0 - tx) * (1.0 - ty)),
                (texel(x0 + 1.0, y0), tx * (1.0 - ty)),
                (texel(x0, y0 + 1.0), (1.0 - tx) * ty),
                (texel(x0 + 1.0, y0 + 1.0), tx * ty),
            ];
            let mut out = [0u8; 4];
            for (channel, slot) in out.iter_mut().enumerate() {
                let value: f32 = corners
                    .iter()
                    .map(|(pixel, weight)| pixel.0[channel] as f32 * weight)
                    .sum();
                *slot = value.round().clamp(0.0, 255.0) as u8;
            }
            Rgba(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::IDENTITY_MATRIX;
    use crate::media::HostMemory;

    fn quadrant_memory() -> MemoryHandle {
        // 2x2: red, green / blue, white
        MemoryHandle::new(HostMemory::new(vec![
            255, 0, 0, 255, 0, 255, 0, 255, //
            0, 0, 255, 255, 255, 255, 255, 255,
        ]))
    }

    const FULL_SCREEN: [BlitVertex; 4] = [
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

    #[test]
    fn test_import_rejects_short_memory() {
        let mut ctx = SoftwareContext::new();
        let memory = MemoryHandle::new(HostMemory::new(vec![0u8; 7]));
        assert!(ctx.create_external_image(&memory, Size::new(2, 1)).is_none());
        assert_eq!(ctx.stats().images_created, 0);
    }

    #[test]
    fn test_full_screen_blit_copies_texels() {
        let mut ctx = SoftwareContext::new();
        let image = ctx
            .create_external_image(&quadrant_memory(), Size::new(2, 2))
            .unwrap();
        let texture = ctx.create_texture(TextureSampling::LINEAR_CLAMPED);
        ctx.bind_external_image(texture, image);

        let target = ctx.create_render_target(Size::new(2, 2)).unwrap();
        let program = ctx
            .create_program(&ShaderSource {
                vertex: "void main() {}",
                fragment: "void main() {}",
                attributes: ["position", "texcoord"],
                sampler: "frame",
                tex_matrix: None,
            })
            .unwrap();
        ctx.bind_render_target(Some(target));
        ctx.set_viewport(Viewport::full(Size::new(2, 2)));
        ctx.draw(&DrawCall {
            program,
            texture,
            vertices: &FULL_SCREEN,
            tex_matrix: IDENTITY_MATRIX,
            topology: Topology::TriangleFan,
        })
        .unwrap();

        let out = ctx.read_render_target(target).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(out.get_pixel(1, 0), &Rgba([0, 255, 0, 255]));
        assert_eq!(out.get_pixel(0, 1), &Rgba([0, 0, 255, 255]));
        assert_eq!(out.get_pixel(1, 1), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_draw_without_target_fails() {
        let mut ctx = SoftwareContext::new();
        let texture = ctx.create_texture(TextureSampling::LINEAR_CLAMPED);
        let result = ctx.draw(&DrawCall {
            program: ProgramId(99),
            texture,
            vertices: &FULL_SCREEN,
            tex_matrix: IDENTITY_MATRIX,
            topology: Topology::TriangleFan,
        });
        assert!(matches!(result, Err(VideoError::Gpu(_))));
    }

    #[test]
    fn test_not_current_on_other_thread() {
        let ctx = SoftwareContext::new();
        assert!(ctx.is_current());
        let current_elsewhere = std::thread::spawn(move || ctx.is_current()).join().unwrap();
        assert!(!current_elsewhere);
    }

    #[test]
    fn test_destroying_image_detaches_texture() {
        let mut ctx = SoftwareContext::new();
        let image = ctx
            .create_external_image(&quadrant_memory(), Size::new(2, 2))
            .unwrap();
        let texture = ctx.create_texture(TextureSampling::LINEAR_CLAMPED);
        ctx.bind_external_image(texture, image);
        ctx.destroy_external_image(image);
        assert_eq!(ctx.texture_binding(texture), None);
        assert_eq!(ctx.live_external_images(), 0);
    }
}
