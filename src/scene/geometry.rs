// SPDX-License-Identifier: MPL-2.0

//! Quad geometry for the video node
//!
//! The quad's screen position never changes with orientation. Rotation is done
//! by rotating which texture corner each vertex samples, mirroring by
//! reflecting texture coordinates about 0.5.

use crate::types::Rect;

/// Vertex with a 2D position and a texture coordinate
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TexturedPoint2D {
    pub x: f32,
    pub y: f32,
    pub tx: f32,
    pub ty: f32,
}

/// Texture corners clockwise from the top left
const CORNER_TX: [f32; 4] = [0.0, 1.0, 1.0, 0.0];
const CORNER_TY: [f32; 4] = [0.0, 0.0, 1.0, 1.0];

/// Corner index sampled by each vertex slot (top-left, bottom-left,
/// top-right, bottom-right) before rotation
const SLOT_CORNERS: [usize; 4] = [0, 3, 1, 2];

/// Rotation steps for an orientation in degrees. Negative and >= 360 values wrap.
pub fn rotation_steps(orientation: i32) -> usize {
    (orientation.rem_euclid(360) / 90) as usize
}

/// Which texture axes to mirror for a mirrored source whose stream is rotated by
/// `texture_orientation`: under 90/270 the axes swap meaning.
pub fn mirror_axes(mirror: bool, texture_orientation: i32) -> (bool, bool) {
    let transposed = texture_orientation.rem_euclid(180) != 0;
    (mirror && !transposed, mirror && transposed)
}

/// The four vertices of the video quad, in strip order
/// (top-left, bottom-left, top-right, bottom-right)
pub fn textured_quad(
    rect: Rect,
    orientation: i32,
    horizontal_mirror: bool,
    vertical_mirror: bool,
) -> [TexturedPoint2D; 4] {
    let offset = rotation_steps(orientation);
    let hm = if horizontal_mirror { 1.0 } else { 0.0 };
    let vm = if vertical_mirror { 1.0 } else { 0.0 };

    let positions = [
        (rect.left(), rect.top()),
        (rect.left(), rect.bottom()),
        (rect.right(), rect.top()),
        (rect.right(), rect.bottom()),
    ];

    let mut vertices = [TexturedPoint2D::default(); 4];
    for ((vertex, (x, y)), corner) in vertices.iter_mut().zip(positions).zip(SLOT_CORNERS) {
        let index = (corner + offset) % 4;
        *vertex = TexturedPoint2D {
            x: x as f32,
            y: y as f32,
            tx: (hm - CORNER_TX[index]).abs(),
            ty: (vm - CORNER_TY[index]).abs(),
        };
    }
    vertices
}
