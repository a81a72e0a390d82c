// SPDX-License-Identifier: MPL-2.0

//! Material sampling the external-image video texture
//!
//! The crop sub-rectangle is applied in the vertex stage as an affine remap of
//! the (already rotated and mirrored) vertex texture coordinates.

use crate::gpu::{ShaderSource, TextureId};
use crate::texture::VideoTexture;

const VERTEX_SHADER: &str = "\
uniform highp mat4 matrix;
uniform highp vec4 subrect;
attribute highp vec4 position;
attribute highp vec2 texcoord;
varying highp vec2 frag_tx;
void main(void)
{
    gl_Position = matrix * position;
    frag_tx = (texcoord * subrect.zw) + subrect.xy;
}
";

const FRAGMENT_SHADER: &str = "\
#extension GL_OES_EGL_image_external : require
uniform samplerExternalOES texture;
uniform lowp float opacity;
varying highp vec2 frag_tx;
void main(void)
{
    gl_FragColor = opacity * texture2D(texture, frag_tx.st);
}
";

pub const VIDEO_SHADER: ShaderSource = ShaderSource {
    vertex: VERTEX_SHADER,
    fragment: FRAGMENT_SHADER,
    attributes: ATTRIBUTE_NAMES,
    sampler: "texture",
    tex_matrix: None,
};

/// Vertex attribute names, in location order
pub const ATTRIBUTE_NAMES: [&str; 2] = ["position", "texcoord"];

/// Renderer state handed to the material before a draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderState {
    /// Combined model-view-projection matrix, column-major
    pub combined_matrix: [[f32; 4]; 4],
    pub opacity: f32,
    pub matrix_dirty: bool,
    pub opacity_dirty: bool,
}

/// Uniform and texture updates the renderer must apply for a draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialUpdate {
    pub matrix: Option<[[f32; 4]; 4]>,
    pub opacity: Option<f32>,
    /// Sampler unit, set the first time the shader is used
    pub texture_unit: Option<i32>,
    pub subrect: [f32; 4],
    /// Texture to bind to unit 0
    pub texture: Option<TextureId>,
}

/// The video material. It does not own the texture: the node owns both and
/// hands the texture in when the renderer asks for state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoMaterial;

impl VideoMaterial {
    pub fn shader(&self) -> ShaderSource {
        VIDEO_SHADER
    }

    /// Uniform updates for drawing `texture` with `state`. `first_use` is set when
    /// no material was bound to this shader before.
    pub fn update_state(
        &self,
        texture: &VideoTexture,
        state: &RenderState,
        first_use: bool,
    ) -> MaterialUpdate {
        MaterialUpdate {
            matrix: state.matrix_dirty.then_some(state.combined_matrix),
            opacity: state.opacity_dirty.then_some(state.opacity),
            texture_unit: first_use.then_some(0),
            subrect: texture.sub_rect().to_uniform(),
            texture: texture.texture_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gpu::IDENTITY_MATRIX;

    #[test]
    fn test_update_state_only_sends_dirty_uniforms() {
        let texture = VideoTexture::new(&Config::default());
        let state = RenderState {
            combined_matrix: IDENTITY_MATRIX,
            opacity: 0.5,
            matrix_dirty: false,
            opacity_dirty: true,
        };

        let update = VideoMaterial.update_state(&texture, &state, false);
        assert_eq!(update.matrix, None);
        assert_eq!(update.opacity, Some(0.5));
        assert_eq!(update.texture_unit, None);
        assert_eq!(update.subrect, [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(update.texture, None);

        let update = VideoMaterial.update_state(&texture, &state, true);
        assert_eq!(update.texture_unit, Some(0));
    }

    #[test]
    fn test_shader_applies_subrect_in_vertex_stage() {
        assert!(VIDEO_SHADER.vertex.contains("texcoord * subrect.zw"));
        assert!(VIDEO_SHADER.fragment.contains("samplerExternalOES"));
    }
}
