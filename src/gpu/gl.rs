// SPDX-License-Identifier: MPL-2.0

//! OpenGL ES implementation of [`GraphicsContext`]
//!
//! Native memory is imported zero-copy: dmabuf-backed memory is wrapped in an
//! `EGLImageKHR` and attached to a `GL_TEXTURE_EXTERNAL_OES` texture with
//! `glEGLImageTargetTexture2DOES`. Memory without a dmabuf cannot be imported.
//!
//! libEGL is loaded at runtime, so the crate builds and the software path runs
//! on machines without a GPU stack.

use super::{
    Capability, DrawCall, ExternalImageId, Filtering, GraphicsContext, ProgramId,
    RenderTargetId, ShaderSource, TextureId, TextureSampling, Topology, Viewport, Wrap,
};
use crate::errors::{VideoError, VideoResult};
use crate::media::MemoryHandle;
use crate::types::Size;
use glow::HasContext;
use image::RgbaImage;
use khronos_egl as egl;
use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr;
use tracing::{debug, error, info, warn};

const TEXTURE_EXTERNAL_OES: u32 = 0x8D65;

const EGL_LINUX_DMA_BUF_EXT: u32 = 0x3270;
const EGL_LINUX_DRM_FOURCC_EXT: i32 = 0x3271;
const EGL_DMA_BUF_PLANE0_FD_EXT: i32 = 0x3272;
const EGL_DMA_BUF_PLANE0_OFFSET_EXT: i32 = 0x3273;
const EGL_DMA_BUF_PLANE0_PITCH_EXT: i32 = 0x3274;

/// R, G, B, A bytes in memory order
const DRM_FORMAT_ABGR8888: u32 = u32::from_le_bytes(*b"AB24");

type CreateImageKhr =
    unsafe extern "system" fn(*mut c_void, *mut c_void, u32, *mut c_void, *const i32) -> *mut c_void;
type DestroyImageKhr = unsafe extern "system" fn(*mut c_void, *mut c_void) -> u32;
type ImageTargetTexture2dOes = unsafe extern "system" fn(u32, *mut c_void);

type Egl = egl::DynamicInstance<egl::EGL1_4>;

/// EGL image extension entry points
struct ImageExtension {
    create_image: CreateImageKhr,
    destroy_image: DestroyImageKhr,
    target_texture: ImageTargetTexture2dOes,
}

impl ImageExtension {
    fn load(egl: &Egl) -> VideoResult<Self> {
        let lookup = |name: &str| {
            egl.get_proc_address(name)
                .ok_or_else(|| VideoError::Gpu(format!("{} unavailable", name)))
        };
        let create_image = lookup("eglCreateImageKHR")?;
        let destroy_image = lookup("eglDestroyImageKHR")?;
        let target_texture = lookup("glEGLImageTargetTexture2DOES")?;
        Ok(Self {
            create_image: unsafe {
                std::mem::transmute::<extern "system" fn(), CreateImageKhr>(create_image)
            },
            destroy_image: unsafe {
                std::mem::transmute::<extern "system" fn(), DestroyImageKhr>(destroy_image)
            },
            target_texture: unsafe {
                std::mem::transmute::<extern "system" fn(), ImageTargetTexture2dOes>(
                    target_texture,
                )
            },
        })
    }
}

/// EGL objects created by [`GlContext::headless`], destroyed with the context
struct OwnedSurface {
    context: egl::Context,
    surface: egl::Surface,
}

#[derive(Debug, Clone, Copy)]
struct GlRenderTarget {
    framebuffer: glow::NativeFramebuffer,
    texture: glow::NativeTexture,
    size: Size,
}

#[derive(Debug, Clone)]
struct GlProgram {
    program: glow::NativeProgram,
    sampler: Option<glow::NativeUniformLocation>,
    tex_matrix: Option<glow::NativeUniformLocation>,
}

/// GLES 2 context behind the [`GraphicsContext`] seam
pub struct GlContext {
    egl: Egl,
    gl: glow::Context,
    display: egl::Display,
    context: egl::Context,
    owned: Option<OwnedSurface>,
    images_ext: ImageExtension,
    next_name: u32,
    images: HashMap<ExternalImageId, *mut c_void>,
    textures: HashMap<TextureId, glow::NativeTexture>,
    targets: HashMap<RenderTargetId, GlRenderTarget>,
    programs: HashMap<ProgramId, GlProgram>,
    vertex_buffer: Option<glow::NativeBuffer>,
    bound_target: Option<RenderTargetId>,
}

impl std::fmt::Debug for GlContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlContext")
            .field("images", &self.images.len())
            .field("textures", &self.textures.len())
            .field("targets", &self.targets.len())
            .field("programs", &self.programs.len())
            .finish()
    }
}

fn load_egl() -> VideoResult<Egl> {
    unsafe { Egl::load_required() }
        .map_err(|e| VideoError::NoGraphicsContext(format!("libEGL not loadable: {:?}", e)))
}

fn egl_error(what: &str, e: egl::Error) -> VideoError {
    VideoError::Gpu(format!("{} failed: {}", what, e))
}

impl GlContext {
    /// Wrap the EGL context current on the calling thread (the scene graph's)
    pub fn from_current() -> VideoResult<Self> {
        let egl = load_egl()?;
        let display = egl.get_current_display().ok_or_else(|| {
            VideoError::NoGraphicsContext("no EGL display current on this thread".to_string())
        })?;
        let context = egl.get_current_context().ok_or_else(|| {
            VideoError::NoGraphicsContext("no EGL context current on this thread".to_string())
        })?;
        Self::with_context(egl, display, context, None)
    }

    /// Create a private GLES 2 context on a 1x1 pbuffer and make it current.
    /// Used when there is no window, all drawing goes to offscreen targets.
    pub fn headless() -> VideoResult<Self> {
        let egl = load_egl()?;
        let display = unsafe { egl.get_display(egl::DEFAULT_DISPLAY) }.ok_or_else(|| {
            VideoError::NoGraphicsContext("no default EGL display".to_string())
        })?;
        let (major, minor) = egl
            .initialize(display)
            .map_err(|e| egl_error("eglInitialize", e))?;
        egl.bind_api(egl::OPENGL_ES_API)
            .map_err(|e| egl_error("eglBindAPI", e))?;

        let config_attributes = [
            egl::RED_SIZE,
            8,
            egl::GREEN_SIZE,
            8,
            egl::BLUE_SIZE,
            8,
            egl::ALPHA_SIZE,
            8,
            egl::RENDERABLE_TYPE,
            egl::OPENGL_ES2_BIT,
            egl::SURFACE_TYPE,
            egl::PBUFFER_BIT,
            egl::NONE,
        ];
        let config = egl
            .choose_first_config(display, &config_attributes)
            .map_err(|e| egl_error("eglChooseConfig", e))?
            .ok_or_else(|| VideoError::Gpu("no RGBA8 GLES 2 pbuffer config".to_string()))?;
        let context = egl
            .create_context(
                display,
                config,
                None,
                &[egl::CONTEXT_CLIENT_VERSION, 2, egl::NONE],
            )
            .map_err(|e| egl_error("eglCreateContext", e))?;
        let surface = match egl.create_pbuffer_surface(
            display,
            config,
            &[egl::WIDTH, 1, egl::HEIGHT, 1, egl::NONE],
        ) {
            Ok(surface) => surface,
            Err(e) => {
                let _ = egl.destroy_context(display, context);
                return Err(egl_error("eglCreatePbufferSurface", e));
            }
        };
        if let Err(e) = egl.make_current(display, Some(surface), Some(surface), Some(context)) {
            let _ = egl.destroy_surface(display, surface);
            let _ = egl.destroy_context(display, context);
            return Err(egl_error("eglMakeCurrent", e));
        }

        info!(major, minor, "Created headless EGL context");
        Self::with_context(egl, display, context, Some(OwnedSurface { context, surface }))
    }

    fn with_context(
        egl: Egl,
        display: egl::Display,
        context: egl::Context,
        owned: Option<OwnedSurface>,
    ) -> VideoResult<Self> {
        let images_ext = ImageExtension::load(&egl)?;
        let gl = unsafe {
            glow::Context::from_loader_function(|name| {
                egl.get_proc_address(name)
                    .map_or(ptr::null(), |f| f as *const c_void)
            })
        };
        debug!(
            version = ?gl.version(),
            "Loaded GL entry points"
        );

        Ok(Self {
            egl,
            gl,
            display,
            context,
            owned,
            images_ext,
            next_name: 1,
            images: HashMap::new(),
            textures: HashMap::new(),
            targets: HashMap::new(),
            programs: HashMap::new(),
            vertex_buffer: None,
            bound_target: None,
        })
    }

    fn next_name(&mut self) -> u32 {
        let name = self.next_name;
        self.next_name += 1;
        name
    }

    fn apply_sampling(&self, target: u32, sampling: TextureSampling) {
        let filter = |filtering: Filtering| match filtering {
            Filtering::Nearest => glow::NEAREST as i32,
            Filtering::Linear => glow::LINEAR as i32,
        };
        let wrap = |wrap: Wrap| match wrap {
            Wrap::Repeat => glow::REPEAT as i32,
            Wrap::ClampToEdge => glow::CLAMP_TO_EDGE as i32,
        };
        unsafe {
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, filter(sampling.min_filter));
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, filter(sampling.mag_filter));
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_WRAP_S, wrap(sampling.wrap_s));
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_WRAP_T, wrap(sampling.wrap_t));
        }
    }

    fn framebuffer_for(&self, target: Option<RenderTargetId>) -> Option<glow::NativeFramebuffer> {
        target
            .and_then(|id| self.targets.get(&id))
            .map(|target| target.framebuffer)
    }

    fn vertex_buffer(&mut self) -> VideoResult<glow::NativeBuffer> {
        if let Some(buffer) = self.vertex_buffer {
            return Ok(buffer);
        }
        let buffer = unsafe { self.gl.create_buffer() }
            .map_err(|e| VideoError::Gpu(format!("create_buffer failed: {}", e)))?;
        self.vertex_buffer = Some(buffer);
        Ok(buffer)
    }
}

fn gl_capability(capability: Capability) -> u32 {
    match capability {
        Capability::Blend => glow::BLEND,
        Capability::DepthTest => glow::DEPTH_TEST,
        Capability::StencilTest => glow::STENCIL_TEST,
        Capability::ScissorTest => glow::SCISSOR_TEST,
    }
}

fn compile_shader(gl: &glow::Context, kind: u32, source: &str) -> VideoResult<glow::NativeShader> {
    unsafe {
        let shader = gl
            .create_shader(kind)
            .map_err(|e| VideoError::Gpu(format!("create_shader failed: {}", e)))?;
        gl.shader_source(shader, source);
        gl.compile_shader(shader);
        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            return Err(VideoError::Gpu(format!("shader compilation failed: {}", log)));
        }
        Ok(shader)
    }
}

impl GraphicsContext for GlContext {
    fn is_current(&self) -> bool {
        self.egl
            .get_current_context()
            .is_some_and(|current| current.as_ptr() == self.context.as_ptr())
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
        let Some(plane) = memory.memory().dmabuf() else {
            debug!(memory = ?memory.id(), "Memory is not dmabuf-backed, cannot import");
            return None;
        };
        let (Ok(width), Ok(height), Ok(offset)) = (
            i32::try_from(size.width),
            i32::try_from(size.height),
            i32::try_from(plane.offset),
        ) else {
            return None;
        };

        let attributes = [
            egl::WIDTH,
            width,
            egl::HEIGHT,
            height,
            EGL_LINUX_DRM_FOURCC_EXT,
            DRM_FORMAT_ABGR8888 as i32,
            EGL_DMA_BUF_PLANE0_FD_EXT,
            plane.fd,
            EGL_DMA_BUF_PLANE0_OFFSET_EXT,
            offset,
            EGL_DMA_BUF_PLANE0_PITCH_EXT,
            width * 4,
            egl::NONE,
        ];
        let image = unsafe {
            (self.images_ext.create_image)(
                self.display.as_ptr(),
                ptr::null_mut(),
                EGL_LINUX_DMA_BUF_EXT,
                ptr::null_mut(),
                attributes.as_ptr(),
            )
        };
        if image.is_null() {
            warn!(error = ?self.egl.get_error(), "eglCreateImageKHR failed");
            return None;
        }

        let id = ExternalImageId(self.next_name());
        self.images.insert(id, image);
        Some(id)
    }

    fn destroy_external_image(&mut self, image: ExternalImageId) {
        if let Some(handle) = self.images.remove(&image) {
            unsafe { (self.images_ext.destroy_image)(self.display.as_ptr(), handle) };
        }
    }

    fn create_texture(&mut self, sampling: TextureSampling) -> TextureId {
        let id = TextureId(self.next_name());
        match unsafe { self.gl.create_texture() } {
            Ok(texture) => {
                unsafe { self.gl.bind_texture(TEXTURE_EXTERNAL_OES, Some(texture)) };
                self.apply_sampling(TEXTURE_EXTERNAL_OES, sampling);
                unsafe { self.gl.bind_texture(TEXTURE_EXTERNAL_OES, None) };
                self.textures.insert(id, texture);
            }
            Err(e) => error!(error = %e, "Failed to create texture"),
        }
        id
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(texture) = self.textures.remove(&texture) {
            unsafe { self.gl.delete_texture(texture) };
        }
    }

    fn bind_external_image(&mut self, texture: TextureId, image: ExternalImageId) {
        let (Some(&native), Some(&handle)) = (self.textures.get(&texture), self.images.get(&image))
        else {
            warn!(?texture, ?image, "Binding an unknown texture or external image");
            return;
        };
        unsafe {
            self.gl.bind_texture(TEXTURE_EXTERNAL_OES, Some(native));
            (self.images_ext.target_texture)(TEXTURE_EXTERNAL_OES, handle);
        }
    }

    fn is_enabled(&self, capability: Capability) -> bool {
        unsafe { self.gl.is_enabled(gl_capability(capability)) }
    }

    fn set_enabled(&mut self, capability: Capability, enabled: bool) {
        let capability = gl_capability(capability);
        unsafe {
            if enabled {
                self.gl.enable(capability);
            } else {
                self.gl.disable(capability);
            }
        }
    }

    fn create_render_target(&mut self, size: Size) -> VideoResult<RenderTargetId> {
        let (Ok(width), Ok(height)) = (i32::try_from(size.width), i32::try_from(size.height))
        else {
            return Err(VideoError::Gpu(format!("invalid render target size {}", size)));
        };
        if !size.is_valid() {
            return Err(VideoError::Gpu(format!("invalid render target size {}", size)));
        }

        let gl = &self.gl;
        let target = unsafe {
            let framebuffer = gl
                .create_framebuffer()
                .map_err(|e| VideoError::Gpu(format!("create_framebuffer failed: {}", e)))?;
            let texture = match gl.create_texture() {
                Ok(texture) => texture,
                Err(e) => {
                    gl.delete_framebuffer(framebuffer);
                    return Err(VideoError::Gpu(format!("create_texture failed: {}", e)));
                }
            };

            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA as i32,
                width,
                height,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(None),
            );

            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(texture),
                0,
            );
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, self.framebuffer_for(self.bound_target));
            gl.bind_texture(glow::TEXTURE_2D, None);

            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.delete_framebuffer(framebuffer);
                gl.delete_texture(texture);
                return Err(VideoError::Gpu(format!(
                    "framebuffer incomplete: 0x{:x}",
                    status
                )));
            }
            GlRenderTarget {
                framebuffer,
                texture,
                size,
            }
        };

        let id = RenderTargetId(self.next_name());
        self.targets.insert(id, target);
        Ok(id)
    }

    fn delete_render_target(&mut self, target: RenderTargetId) {
        let Some(removed) = self.targets.remove(&target) else {
            return;
        };
        if self.bound_target == Some(target) {
            self.bind_render_target(None);
        }
        unsafe {
            self.gl.delete_framebuffer(removed.framebuffer);
            self.gl.delete_texture(removed.texture);
        }
    }

    fn render_target_size(&self, target: RenderTargetId) -> Option<Size> {
        self.targets.get(&target).map(|target| target.size)
    }

    fn bind_render_target(&mut self, target: Option<RenderTargetId>) {
        if let Some(id) = target {
            if !self.targets.contains_key(&id) {
                warn!(?id, "Binding an unknown render target");
                return;
            }
        }
        self.bound_target = target;
        unsafe {
            self.gl
                .bind_framebuffer(glow::FRAMEBUFFER, self.framebuffer_for(target))
        };
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        unsafe {
            self.gl.viewport(
                viewport.x,
                viewport.y,
                viewport.width as i32,
                viewport.height as i32,
            )
        };
    }

    fn create_program(&mut self, source: &ShaderSource) -> VideoResult<ProgramId> {
        let gl = &self.gl;
        let vertex = compile_shader(gl, glow::VERTEX_SHADER, source.vertex)?;
        let fragment = match compile_shader(gl, glow::FRAGMENT_SHADER, source.fragment) {
            Ok(fragment) => fragment,
            Err(e) => {
                unsafe { gl.delete_shader(vertex) };
                return Err(e);
            }
        };

        let program = unsafe {
            let program = match gl.create_program() {
                Ok(program) => program,
                Err(e) => {
                    gl.delete_shader(vertex);
                    gl.delete_shader(fragment);
                    return Err(VideoError::Gpu(format!("create_program failed: {}", e)));
                }
            };
            gl.attach_shader(program, vertex);
            gl.attach_shader(program, fragment);
            for (location, name) in source.attributes.iter().enumerate() {
                gl.bind_attrib_location(program, location as u32, name);
            }
            gl.link_program(program);
            gl.detach_shader(program, vertex);
            gl.detach_shader(program, fragment);
            gl.delete_shader(vertex);
            gl.delete_shader(fragment);

            if !gl.get_program_link_status(program) {
                let log = gl.get_program_info_log(program);
                gl.delete_program(program);
                return Err(VideoError::Gpu(format!("program link failed: {}", log)));
            }
            GlProgram {
                program,
                sampler: gl.get_uniform_location(program, source.sampler),
                tex_matrix: source
                    .tex_matrix
                    .and_then(|name| gl.get_uniform_location(program, name)),
            }
        };

        let id = ProgramId(self.next_name());
        self.programs.insert(id, program);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        if let Some(program) = self.programs.remove(&program) {
            unsafe { self.gl.delete_program(program.program) };
        }
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> VideoResult<()> {
        if self.bound_target.is_none() {
            return Err(VideoError::Gpu("no render target bound".to_string()));
        }
        let program = self
            .programs
            .get(&call.program)
            .cloned()
            .ok_or_else(|| VideoError::Gpu(format!("unknown program {:?}", call.program)))?;
        let texture = self
            .textures
            .get(&call.texture)
            .copied()
            .ok_or_else(|| VideoError::Gpu(format!("unknown texture {:?}", call.texture)))?;
        let buffer = self.vertex_buffer()?;

        let mode = match call.topology {
            Topology::TriangleFan => glow::TRIANGLE_FAN,
            Topology::TriangleStrip => glow::TRIANGLE_STRIP,
        };
        let stride = std::mem::size_of::<super::BlitVertex>() as i32;
        let tex_coord_offset = std::mem::offset_of!(super::BlitVertex, tex_coord) as i32;
        let matrix: Vec<f32> = call.tex_matrix.iter().flatten().copied().collect();

        let gl = &self.gl;
        unsafe {
            gl.use_program(Some(program.program));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            gl.buffer_data_u8_slice(
                glow::ARRAY_BUFFER,
                bytemuck::cast_slice(call.vertices),
                glow::STREAM_DRAW,
            );
            gl.enable_vertex_attrib_array(0);
            gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, stride, 0);
            gl.enable_vertex_attrib_array(1);
            gl.vertex_attrib_pointer_f32(1, 2, glow::FLOAT, false, stride, tex_coord_offset);

            gl.active_texture(glow::TEXTURE0);
            gl.bind_texture(TEXTURE_EXTERNAL_OES, Some(texture));
            gl.uniform_1_i32(program.sampler.as_ref(), 0);
            if let Some(location) = program.tex_matrix.as_ref() {
                gl.uniform_matrix_4_f32_slice(Some(location), false, &matrix);
            }

            gl.draw_arrays(mode, 0, call.vertices.len() as i32);

            gl.disable_vertex_attrib_array(0);
            gl.disable_vertex_attrib_array(1);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            gl.bind_texture(TEXTURE_EXTERNAL_OES, None);
            gl.use_program(None);
        }

        match unsafe { gl.get_error() } {
            glow::NO_ERROR => Ok(()),
            code => Err(VideoError::Gpu(format!("draw failed: GL error 0x{:x}", code))),
        }
    }

    fn read_render_target(&mut self, target: RenderTargetId) -> VideoResult<RgbaImage> {
        let render_target = self
            .targets
            .get(&target)
            .copied()
            .ok_or_else(|| VideoError::Gpu(format!("unknown render target {:?}", target)))?;
        let size = render_target.size;
        let mut pixels = vec![0u8; size.width as usize * size.height as usize * 4];

        let gl = &self.gl;
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(render_target.framebuffer));
            gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
            gl.read_pixels(
                0,
                0,
                size.width as i32,
                size.height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(Some(pixels.as_mut_slice())),
            );
            gl.bind_framebuffer(glow::FRAMEBUFFER, self.framebuffer_for(self.bound_target));
        }

        let mut image = RgbaImage::from_raw(size.width, size.height, pixels)
            .ok_or_else(|| VideoError::Gpu("read-back size mismatch".to_string()))?;
        // GL returns the bottom row first
        image::imageops::flip_vertical_in_place(&mut image);
        Ok(image)
    }
}

impl Drop for GlContext {
    fn drop(&mut self) {
        if !self.is_current() {
            if !self.images.is_empty() || !self.textures.is_empty() || !self.targets.is_empty() {
                warn!("GL context dropped off its thread, leaking GPU resources");
            }
            return;
        }

        let images: Vec<ExternalImageId> = self.images.keys().copied().collect();
        for image in images {
            self.destroy_external_image(image);
        }
        let textures: Vec<TextureId> = self.textures.keys().copied().collect();
        for texture in textures {
            self.delete_texture(texture);
        }
        let targets: Vec<RenderTargetId> = self.targets.keys().copied().collect();
        for target in targets {
            self.delete_render_target(target);
        }
        let programs: Vec<ProgramId> = self.programs.keys().copied().collect();
        for program in programs {
            self.delete_program(program);
        }
        if let Some(buffer) = self.vertex_buffer.take() {
            unsafe { self.gl.delete_buffer(buffer) };
        }

        if let Some(owned) = self.owned.take() {
            if let Err(e) = self.egl.make_current(self.display, None, None, None) {
                warn!(error = %e, "Failed to release headless EGL context");
            }
            let _ = self.egl.destroy_surface(self.display, owned.surface);
            let _ = self.egl.destroy_context(self.display, owned.context);
        }
    }
}
