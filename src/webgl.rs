use std::rc::Rc;

use js_sys::{Float32Array, Object, Reflect, Uint16Array};
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{
    HtmlCanvasElement, WebGlBuffer, WebGlFramebuffer, WebGlProgram,
    WebGlRenderingContext as Gl, WebGlShader, WebGlTexture, WebGlUniformLocation,
};

use crate::coords::{
    CoordinateArena, ModelCoordinates, SHEET_TEXTURE_HEIGHT, SHEET_TEXTURE_WIDTH,
    TextureCoordinates,
};
use crate::error::RenderError;
use crate::resources::GpuResource;
use crate::texture::Texture;

// The indices are GL_UNSIGNED_SHORT, so at most 65536 vertices (16384
// rectangles) could ever be batched; 512 is plenty for one frame.
pub const RECTANGLE_CAPACITY: usize = 512;

// Each vertex carries position x, position y and one packed alpha + texture
// coordinates float.
pub const FLOATS_PER_POSITION: usize = 2;
pub const FLOATS_PER_ALPHA_TEXTURE_COORDINATES: usize = 1;
pub const FLOATS_PER_VERTEX: usize = FLOATS_PER_POSITION + FLOATS_PER_ALPHA_TEXTURE_COORDINATES;
pub const BYTES_PER_VERTEX: usize = 4 * FLOATS_PER_VERTEX;
pub const FLOATS_PER_RECTANGLE: usize = 4 * FLOATS_PER_VERTEX;
pub const BYTES_PER_RECTANGLE: usize = 4 * FLOATS_PER_RECTANGLE;

const BUFFER_INDEX_POSITION: i32 = 0;
const BUFFER_INDEX_ALPHA_TEXTURE_COORDINATES: i32 = (4 * FLOATS_PER_POSITION) as i32;

// 0.001953125 = 1 / 512 (8 bits + 1 alpha bit)
// 0.0078125 = 1 / 128 (sheet texture width and height)
// Both versions must decode the packed attribute identically so rendering is
// bit-for-bit the same across capability tiers.
const VERTEX_SHADER_SOURCE_V2: &str = r#"#version 300 es
precision highp float;
in vec2 aPosition;
in float aAlphaTextureCoordinates;
flat out lowp float vAlpha;
out lowp vec2 vTextureCoordinates;
uniform vec2 uViewConstants;
const vec2 uViewOffsets = vec2(-1.0, 1.0);
void main() {
	gl_Position = vec4(aPosition * uViewConstants + uViewOffsets, 0.0, 1.0);
	vAlpha = mod(aAlphaTextureCoordinates, 2.0);
	vTextureCoordinates = floor(vec2(
		aAlphaTextureCoordinates * 0.001953125,
		mod(aAlphaTextureCoordinates * 0.5, 256.0)
	)) * 0.0078125;
}"#;

const VERTEX_SHADER_SOURCE: &str = r#"#version 100
precision highp float;
attribute vec2 aPosition;
attribute float aAlphaTextureCoordinates;
varying lowp float vAlpha;
varying lowp vec2 vTextureCoordinates;
uniform vec2 uViewConstants;
const vec2 uViewOffsets = vec2(-1.0, 1.0);
void main() {
	gl_Position = vec4(aPosition * uViewConstants + uViewOffsets, 0.0, 1.0);
	vAlpha = mod(aAlphaTextureCoordinates, 2.0);
	vTextureCoordinates = floor(vec2(
		aAlphaTextureCoordinates * 0.001953125,
		mod(aAlphaTextureCoordinates * 0.5, 256.0)
	)) * 0.0078125;
}"#;

// color * vAlpha keeps the output premultiplied, so the default blending and
// the intermediate framebuffer compose correctly.
const FRAGMENT_SHADER_SOURCE_V2: &str = r#"#version 300 es
precision lowp float;
flat in float vAlpha;
in vec2 vTextureCoordinates;
out vec4 color;
uniform sampler2D uTexture;
void main() {
	color = texture(uTexture, vTextureCoordinates) * vAlpha;
}"#;

const FRAGMENT_SHADER_SOURCE: &str = r#"#version 100
precision lowp float;
varying float vAlpha;
varying vec2 vTextureCoordinates;
uniform sampler2D uTexture;
void main() {
	gl_FragColor = texture2D(uTexture, vTextureCoordinates) * vAlpha;
}"#;

pub(crate) fn gl_error_name(error: u32) -> &'static str {
    match error {
        Gl::NO_ERROR => "NO_ERROR",
        Gl::INVALID_ENUM => "INVALID_ENUM",
        Gl::INVALID_VALUE => "INVALID_VALUE",
        Gl::INVALID_OPERATION => "INVALID_OPERATION",
        Gl::OUT_OF_MEMORY => "OUT_OF_MEMORY",
        Gl::INVALID_FRAMEBUFFER_OPERATION => "INVALID_FRAMEBUFFER_OPERATION",
        Gl::CONTEXT_LOST_WEBGL => "CONTEXT_LOST_WEBGL",
        _ => "UNKNOWN_ERROR",
    }
}

pub(crate) fn clear_gl_errors(gl: &Gl) {
    let mut max = 3;
    while max > 0 && gl.get_error() != Gl::NO_ERROR {
        max -= 1;
    }
}

pub(crate) fn check_gl(gl: &Gl, label: &'static str) -> Result<(), RenderError> {
    let code = gl.get_error();
    if code == Gl::NO_ERROR {
        Ok(())
    } else {
        Err(RenderError::Gl {
            label,
            name: gl_error_name(code),
            code,
        })
    }
}

// Vertices per rectangle:
// 0   2
//
// 1   3
//
// First triangle 0 1 2, second triangle 2 1 3.
pub fn rectangle_indices(capacity: usize) -> Vec<u16> {
    let mut indices = Vec::with_capacity(6 * capacity);
    for rectangle in 0..capacity {
        let vertex = (4 * rectangle) as u16;
        indices.extend_from_slice(&[
            vertex,
            vertex + 1,
            vertex + 2,
            vertex + 2,
            vertex + 1,
            vertex + 3,
        ]);
    }
    indices
}

fn write_rectangle(
    vertices: &mut [f32],
    model: &[f32; 4],
    alpha: f32,
    texel: &[f32; 4],
    view_x: f32,
    view_y: f32,
) {
    let left = model[0] + view_x;
    let top = model[1] + view_y;
    let right = model[2] + view_x;
    let bottom = model[3] + view_y;

    vertices[0] = left;
    vertices[1] = top;
    vertices[2] = texel[0] + alpha;

    vertices[3] = left;
    vertices[4] = bottom;
    vertices[5] = texel[1] + alpha;

    vertices[6] = right;
    vertices[7] = top;
    vertices[8] = texel[2] + alpha;

    vertices[9] = right;
    vertices[10] = bottom;
    vertices[11] = texel[3] + alpha;
}

fn write_rectangle_scale(
    vertices: &mut [f32],
    model: &[f32; 4],
    alpha: f32,
    texel: &[f32; 4],
    scale: f32,
    view_x: f32,
    view_y: f32,
) {
    let scaled = [
        model[0] * scale,
        model[1] * scale,
        model[2] * scale,
        model[3] * scale,
    ];
    write_rectangle(vertices, &scaled, alpha, texel, view_x, view_y);
}

// Positive y points downwards in the model space but upwards in GL clip
// space, so the sign of sin is inverted relative to the usual rotation.
fn write_rectangle_rotate(
    vertices: &mut [f32],
    model: &[f32; 4],
    alpha: f32,
    texel: &[f32; 4],
    radians: f32,
    view_x: f32,
    view_y: f32,
) {
    let cos = radians.cos();
    let sin = radians.sin();
    let [left, top, right, bottom] = *model;

    vertices[0] = (cos * left) + (sin * top) + view_x;
    vertices[1] = (cos * top) - (sin * left) + view_y;
    vertices[2] = texel[0] + alpha;

    vertices[3] = (cos * left) + (sin * bottom) + view_x;
    vertices[4] = (cos * bottom) - (sin * left) + view_y;
    vertices[5] = texel[1] + alpha;

    vertices[6] = (cos * right) + (sin * top) + view_x;
    vertices[7] = (cos * top) - (sin * right) + view_y;
    vertices[8] = texel[2] + alpha;

    vertices[9] = (cos * right) + (sin * bottom) + view_x;
    vertices[10] = (cos * bottom) - (sin * right) + view_y;
    vertices[11] = texel[3] + alpha;
}

fn write_rectangle_scale_rotate(
    vertices: &mut [f32],
    model: &[f32; 4],
    alpha: f32,
    texel: &[f32; 4],
    scale: f32,
    radians: f32,
    view_x: f32,
    view_y: f32,
) {
    let scaled = [
        model[0] * scale,
        model[1] * scale,
        model[2] * scale,
        model[3] * scale,
    ];
    write_rectangle_rotate(vertices, &scaled, alpha, texel, radians, view_x, view_y);
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FramebufferSizing {
    pub pot_width: u32,
    pub pot_height: u32,
    pub texture_width: u32,
    pub texture_height: u32,
    pub view_width: i32,
    pub view_height: i32,
}

// A few WebGL 1 devices reject non-power-of-two framebuffer textures, so the
// backing store is rounded up and the usable rectangle is expressed in the
// sheet texel range the vertex shaders decode against.
fn framebuffer_sizing(desired_width: i32, desired_height: i32) -> FramebufferSizing {
    let pot_width = (desired_width.max(1) as u32).next_power_of_two();
    let pot_height = (desired_height.max(1) as u32).next_power_of_two();

    let texture_width = (desired_width.max(1) as u32 * SHEET_TEXTURE_WIDTH).div_ceil(pot_width);
    let texture_height = (desired_height.max(1) as u32 * SHEET_TEXTURE_HEIGHT).div_ceil(pot_height);

    FramebufferSizing {
        pot_width,
        pot_height,
        texture_width,
        texture_height,
        view_width: ((texture_width * pot_width) / SHEET_TEXTURE_WIDTH) as i32,
        view_height: ((texture_height * pot_height) / SHEET_TEXTURE_HEIGHT) as i32,
    }
}

/// The usable framebuffer rectangle in sheet texels, handed back from
/// `recreate` so the caller can store it in its texture-coordinate slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FramebufferLayout {
    pub texture_width: u32,
    pub texture_height: u32,
}

struct GlObjects {
    gl: Gl,
    version: u32,
    program: WebGlProgram,
    vertex_shader: WebGlShader,
    fragment_shader: WebGlShader,
    vertex_buffer: WebGlBuffer,
    index_buffer: WebGlBuffer,
    framebuffer: WebGlFramebuffer,
    framebuffer_texture: Rc<Texture>,
    uniform_view_constants: WebGlUniformLocation,
}

/// The batched renderer: owns the context, the shader pair, the vertex and
/// index buffers and a capacity-bounded staging buffer. Draw calls append
/// rectangles and flush on texture change or overflow; `begin_frame` detects
/// context loss and tears down so the caller can schedule a recreation.
pub struct WebGl {
    capacity: usize,
    vertices: Option<Box<[f32]>>,
    rectangle_count: usize,
    current_texture: Option<WebGlTexture>,
    generation: u32,
    flush_count: u32,
    flushed_rectangles: u32,
    view_width: i32,
    view_height: i32,
    framebuffer_view_width: i32,
    framebuffer_view_height: i32,
    objects: Option<GlObjects>,
    destroyed: bool,
}

fn context_options() -> Result<JsValue, RenderError> {
    let options = Object::new();
    Reflect::set(&options, &JsValue::from_str("alpha"), &JsValue::FALSE)?;
    Reflect::set(&options, &JsValue::from_str("depth"), &JsValue::FALSE)?;
    Reflect::set(&options, &JsValue::from_str("stencil"), &JsValue::FALSE)?;
    Reflect::set(&options, &JsValue::from_str("antialias"), &JsValue::FALSE)?;
    Reflect::set(
        &options,
        &JsValue::from_str("premultipliedAlpha"),
        &JsValue::TRUE,
    )?;
    Ok(options.into())
}

fn acquire_context(canvas: &HtmlCanvasElement) -> Result<(Gl, u32), RenderError> {
    let options = context_options()?;

    for (name, version) in [("webgl2", 2), ("webgl", 1), ("experimental-webgl", 1)] {
        let Ok(Some(context)) = canvas.get_context_with_context_options(name, &options) else {
            continue;
        };
        // A WebGL2 context object exposes the whole WebGL1 interface, so
        // both tiers are driven through the WebGL1 bindings and only the
        // shader sources differ.
        return Ok((context.unchecked_into::<Gl>(), version));
    }

    Err(RenderError::ContextUnavailable)
}

fn compile_shader(gl: &Gl, shader_type: u32, source: &str) -> Result<WebGlShader, RenderError> {
    let kind = if shader_type == Gl::VERTEX_SHADER {
        "vertex"
    } else {
        "fragment"
    };

    let shader = gl
        .create_shader(shader_type)
        .ok_or_else(|| RenderError::GpuAllocation(format!("unable to create {} shader", kind)))?;
    gl.shader_source(&shader, source);
    gl.compile_shader(&shader);

    if gl
        .get_shader_parameter(&shader, Gl::COMPILE_STATUS)
        .as_bool()
        .unwrap_or(false)
    {
        Ok(shader)
    } else {
        let log = gl
            .get_shader_info_log(&shader)
            .unwrap_or_else(|| "unknown shader error".to_string());
        Err(RenderError::ShaderCompile { kind, log })
    }
}

impl WebGl {
    pub fn new() -> WebGl {
        WebGl::with_capacity(RECTANGLE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> WebGl {
        assert!(capacity >= 1 && capacity <= 16384, "invalid batch capacity");
        WebGl {
            capacity,
            vertices: None,
            rectangle_count: 0,
            current_texture: None,
            generation: 0,
            flush_count: 0,
            flushed_rectangles: 0,
            view_width: 0,
            view_height: 0,
            framebuffer_view_width: 0,
            framebuffer_view_height: 0,
            objects: None,
            destroyed: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ready(&self) -> bool {
        self.objects.is_some()
    }

    pub fn context(&self) -> Option<&Gl> {
        self.objects.as_ref().map(|objects| &objects.gl)
    }

    pub fn context_version(&self) -> u32 {
        self.objects.as_ref().map_or(0, |objects| objects.version)
    }

    pub fn framebuffer_texture(&self) -> Option<Rc<Texture>> {
        self.objects
            .as_ref()
            .map(|objects| Rc::clone(&objects.framebuffer_texture))
    }

    /// Bumped on every successful `recreate`; lets callers tell a fresh
    /// shader/buffer set from the one they saw before a context loss.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn pending_rectangles(&self) -> usize {
        self.rectangle_count
    }

    pub fn flush_count(&self) -> u32 {
        self.flush_count
    }

    pub fn flushed_rectangles(&self) -> u32 {
        self.flushed_rectangles
    }

    /// Base address of the staging buffer, for the native step/render engine
    /// that writes whole batches directly (`BYTES_PER_RECTANGLE` stride).
    /// Rust callers go through the draw methods instead.
    pub fn staging_base_ptr(&mut self) -> Option<*mut f32> {
        self.vertices.as_mut().map(|vertices| vertices.as_mut_ptr())
    }

    pub fn check_recreate(&self, canvas: &HtmlCanvasElement) -> bool {
        match &self.objects {
            Some(objects) => {
                objects.gl.is_context_lost()
                    || canvas.width() as i32 != self.view_width
                    || canvas.height() as i32 != self.view_height
            }
            None => true,
        }
    }

    pub fn recreate(
        &mut self,
        canvas: &HtmlCanvasElement,
        desired_framebuffer_width: i32,
        desired_framebuffer_height: i32,
    ) -> Result<FramebufferLayout, RenderError> {
        if self.destroyed {
            return Err(RenderError::Destroyed);
        }

        let width = canvas.width() as i32;
        let height = canvas.height() as i32;

        self.destroy_objects(true);

        let (gl, version) = acquire_context(canvas)?;
        clear_gl_errors(&gl);

        self.view_width = width;
        self.view_height = height;

        let program = gl
            .create_program()
            .ok_or_else(|| RenderError::GpuAllocation("unable to create program".to_string()))?;

        let vertex_shader = compile_shader(
            &gl,
            Gl::VERTEX_SHADER,
            if version == 2 {
                VERTEX_SHADER_SOURCE_V2
            } else {
                VERTEX_SHADER_SOURCE
            },
        )?;
        let fragment_shader = compile_shader(
            &gl,
            Gl::FRAGMENT_SHADER,
            if version == 2 {
                FRAGMENT_SHADER_SOURCE_V2
            } else {
                FRAGMENT_SHADER_SOURCE
            },
        )?;

        gl.attach_shader(&program, &vertex_shader);
        gl.attach_shader(&program, &fragment_shader);
        gl.link_program(&program);

        if !gl
            .get_program_parameter(&program, Gl::LINK_STATUS)
            .as_bool()
            .unwrap_or(false)
        {
            let log = gl
                .get_program_info_log(&program)
                .unwrap_or_else(|| "unknown program error".to_string());
            return Err(RenderError::ProgramLink(log));
        }

        gl.use_program(Some(&program));
        check_gl(&gl, "linkProgram")?;

        let uniform_view_constants = gl
            .get_uniform_location(&program, "uViewConstants")
            .ok_or_else(|| {
                RenderError::GpuAllocation("missing uViewConstants uniform".to_string())
            })?;

        gl.active_texture(Gl::TEXTURE0);
        gl.uniform1i(gl.get_uniform_location(&program, "uTexture").as_ref(), 0);
        check_gl(&gl, "uniform setup")?;

        gl.disable(Gl::DEPTH_TEST);
        gl.disable(Gl::CULL_FACE);
        gl.disable(Gl::DITHER);
        gl.disable(Gl::SCISSOR_TEST);
        gl.disable(Gl::POLYGON_OFFSET_FILL);
        gl.disable(Gl::SAMPLE_ALPHA_TO_COVERAGE);
        gl.disable(Gl::SAMPLE_COVERAGE);
        gl.disable(Gl::STENCIL_TEST);
        gl.enable(Gl::BLEND);

        // Premultiplying on upload keeps blending correct through the
        // intermediate framebuffer; see the fragment shader.
        gl.pixel_storei(Gl::UNPACK_PREMULTIPLY_ALPHA_WEBGL, 1);
        gl.blend_func(Gl::ONE, Gl::ONE_MINUS_SRC_ALPHA);
        check_gl(&gl, "pipeline state")?;

        let vertex_buffer = gl.create_buffer().ok_or_else(|| {
            RenderError::GpuAllocation("unable to create vertex buffer".to_string())
        })?;
        let index_buffer = gl.create_buffer().ok_or_else(|| {
            RenderError::GpuAllocation("unable to create index buffer".to_string())
        })?;

        let capacity = self.capacity;
        let vertices = self
            .vertices
            .get_or_insert_with(|| vec![0.0; capacity * FLOATS_PER_RECTANGLE].into_boxed_slice());

        let indices = rectangle_indices(self.capacity);
        gl.bind_buffer(Gl::ELEMENT_ARRAY_BUFFER, Some(&index_buffer));
        gl.buffer_data_with_array_buffer_view(
            Gl::ELEMENT_ARRAY_BUFFER,
            &Uint16Array::from(indices.as_slice()),
            Gl::STATIC_DRAW,
        );

        gl.bind_buffer(Gl::ARRAY_BUFFER, Some(&vertex_buffer));
        // bufferData once at full size; flushes use bufferSubData with
        // whatever prefix is pending.
        gl.buffer_data_with_array_buffer_view(
            Gl::ARRAY_BUFFER,
            &Float32Array::from(&vertices[..]),
            Gl::DYNAMIC_DRAW,
        );
        check_gl(&gl, "buffer allocation")?;

        let sizing = framebuffer_sizing(desired_framebuffer_width, desired_framebuffer_height);
        self.framebuffer_view_width = sizing.view_width;
        self.framebuffer_view_height = sizing.view_height;

        let framebuffer_texture = Rc::new(Texture::for_render_target(
            &gl,
            sizing.pot_width as i32,
            sizing.pot_height as i32,
        )?);

        let framebuffer = gl.create_framebuffer().ok_or_else(|| {
            RenderError::GpuAllocation("unable to create framebuffer".to_string())
        })?;
        gl.bind_framebuffer(Gl::FRAMEBUFFER, Some(&framebuffer));
        gl.framebuffer_texture_2d(
            Gl::FRAMEBUFFER,
            Gl::COLOR_ATTACHMENT0,
            Gl::TEXTURE_2D,
            framebuffer_texture.handle().as_ref(),
            0,
        );
        check_gl(&gl, "framebuffer setup")?;

        let attribute_position = gl.get_attrib_location(&program, "aPosition");
        let attribute_alpha = gl.get_attrib_location(&program, "aAlphaTextureCoordinates");
        if attribute_position < 0 || attribute_alpha < 0 {
            return Err(RenderError::GpuAllocation(
                "missing vertex attributes".to_string(),
            ));
        }

        gl.enable_vertex_attrib_array(attribute_position as u32);
        gl.enable_vertex_attrib_array(attribute_alpha as u32);
        gl.vertex_attrib_pointer_with_i32(
            attribute_position as u32,
            FLOATS_PER_POSITION as i32,
            Gl::FLOAT,
            false,
            BYTES_PER_VERTEX as i32,
            BUFFER_INDEX_POSITION,
        );
        gl.vertex_attrib_pointer_with_i32(
            attribute_alpha as u32,
            FLOATS_PER_ALPHA_TEXTURE_COORDINATES as i32,
            Gl::FLOAT,
            false,
            BYTES_PER_VERTEX as i32,
            BUFFER_INDEX_ALPHA_TEXTURE_COORDINATES,
        );

        self.objects = Some(GlObjects {
            gl,
            version,
            program,
            vertex_shader,
            fragment_shader,
            vertex_buffer,
            index_buffer,
            framebuffer,
            framebuffer_texture,
            uniform_view_constants,
        });
        self.generation = self.generation.wrapping_add(1);

        self.use_framebuffer(false);

        Ok(FramebufferLayout {
            texture_width: sizing.texture_width,
            texture_height: sizing.texture_height,
        })
    }

    fn destroy_objects(&mut self, partial: bool) {
        if let Some(objects) = self.objects.take() {
            let gl = &objects.gl;
            gl.bind_framebuffer(Gl::FRAMEBUFFER, None);
            objects.framebuffer_texture.destroy();
            gl.delete_framebuffer(Some(&objects.framebuffer));
            gl.delete_program(Some(&objects.program));
            gl.delete_shader(Some(&objects.vertex_shader));
            gl.delete_shader(Some(&objects.fragment_shader));
            gl.delete_buffer(Some(&objects.vertex_buffer));
            gl.delete_buffer(Some(&objects.index_buffer));
        }

        self.rectangle_count = 0;
        self.current_texture = None;
        self.view_width = 0;
        self.view_height = 0;
        self.framebuffer_view_width = 0;
        self.framebuffer_view_height = 0;

        if !partial {
            self.vertices = None;
        }
    }

    /// Partial destroy keeps the staging allocation so a quick recreation
    /// after a context loss avoids the realloc; full destroy is terminal.
    pub fn destroy(&mut self, partial: bool) {
        self.destroy_objects(partial);
        if !partial {
            self.destroyed = true;
        }
    }

    /// Poll for context loss, then bind and clear the offscreen framebuffer.
    /// Returns false when there is nothing to draw against this frame; the
    /// caller is expected to schedule a recreation and retry.
    pub fn begin_frame(&mut self) -> bool {
        let lost = match &self.objects {
            Some(objects) => objects.gl.is_context_lost(),
            None => return false,
        };
        if lost {
            self.destroy_objects(true);
            return false;
        }

        self.use_framebuffer(true);
        if let Some(objects) = &self.objects {
            objects.gl.clear(Gl::COLOR_BUFFER_BIT);
        }
        true
    }

    pub fn clear_color(&self, red: f32, green: f32, blue: f32, alpha: f32) {
        if let Some(objects) = &self.objects {
            objects.gl.clear_color(red, green, blue, alpha);
        }
    }

    pub fn set_sum_composition(&self) {
        if let Some(objects) = &self.objects {
            objects.gl.blend_func(Gl::ONE, Gl::ONE);
        }
    }

    pub fn set_default_composition(&self) {
        if let Some(objects) = &self.objects {
            objects.gl.blend_func(Gl::ONE, Gl::ONE_MINUS_SRC_ALPHA);
        }
    }

    /// Switch between the offscreen framebuffer and the visible surface.
    /// Callers must flush before switching targets mid-frame.
    pub fn use_framebuffer(&mut self, use_offscreen: bool) {
        debug_assert!(self.objects.is_some(), "use_framebuffer without a context");
        let Some(objects) = &self.objects else {
            return;
        };
        let gl = &objects.gl;

        let (width, height) = if use_offscreen {
            gl.bind_framebuffer(Gl::FRAMEBUFFER, Some(&objects.framebuffer));
            (self.framebuffer_view_width, self.framebuffer_view_height)
        } else {
            gl.bind_framebuffer(Gl::FRAMEBUFFER, None);
            (self.view_width, self.view_height)
        };

        gl.uniform2f(
            Some(&objects.uniform_view_constants),
            2.0 / width as f32,
            -2.0 / height as f32,
        );
        gl.viewport(0, 0, width, height);
    }

    /// Flush pending batched draws and make `texture` current without
    /// appending geometry; the native engine then writes rectangles straight
    /// into the staging buffer and reports them through `draw_native`.
    pub fn prepare_native_draw(&mut self, texture: &Texture) {
        self.flush();
        self.current_texture = texture.handle();
    }

    /// Adopt `rectangle_count` rectangles pre-written into the staging
    /// buffer, then flush them.
    pub fn draw_native(&mut self, rectangle_count: usize) {
        debug_assert!(
            rectangle_count <= self.capacity,
            "native draw past the batch capacity"
        );
        self.rectangle_count = rectangle_count.min(self.capacity);
        self.flush();
    }

    fn begin_rectangle(&mut self, texture: &Texture) -> Option<&mut [f32]> {
        let handle = texture.handle();
        debug_assert!(handle.is_some(), "draw with an unloaded texture");
        debug_assert!(self.objects.is_some(), "draw without a context");
        if handle.is_none() || self.objects.is_none() {
            return None;
        }

        if self.current_texture != handle || self.rectangle_count >= self.capacity {
            self.flush();
            self.current_texture = handle;
        }

        let offset = self.rectangle_count * FLOATS_PER_RECTANGLE;
        self.rectangle_count += 1;
        let vertices = self.vertices.as_mut()?;
        Some(&mut vertices[offset..offset + FLOATS_PER_RECTANGLE])
    }

    pub fn draw(
        &mut self,
        texture: &Texture,
        coords: &CoordinateArena,
        model: ModelCoordinates,
        alpha: f32,
        texture_coordinates: TextureCoordinates,
        view_x: f32,
        view_y: f32,
    ) {
        let model = coords.model(model);
        let texel = coords.texture(texture_coordinates);
        if let Some(vertices) = self.begin_rectangle(texture) {
            write_rectangle(vertices, &model, alpha, &texel, view_x, view_y);
        }
    }

    pub fn draw_scale(
        &mut self,
        texture: &Texture,
        coords: &CoordinateArena,
        model: ModelCoordinates,
        alpha: f32,
        texture_coordinates: TextureCoordinates,
        scale: f32,
        view_x: f32,
        view_y: f32,
    ) {
        let model = coords.model(model);
        let texel = coords.texture(texture_coordinates);
        if let Some(vertices) = self.begin_rectangle(texture) {
            write_rectangle_scale(vertices, &model, alpha, &texel, scale, view_x, view_y);
        }
    }

    pub fn draw_rotate(
        &mut self,
        texture: &Texture,
        coords: &CoordinateArena,
        model: ModelCoordinates,
        alpha: f32,
        texture_coordinates: TextureCoordinates,
        radians: f32,
        view_x: f32,
        view_y: f32,
    ) {
        let model = coords.model(model);
        let texel = coords.texture(texture_coordinates);
        if let Some(vertices) = self.begin_rectangle(texture) {
            write_rectangle_rotate(vertices, &model, alpha, &texel, radians, view_x, view_y);
        }
    }

    pub fn draw_scale_rotate(
        &mut self,
        texture: &Texture,
        coords: &CoordinateArena,
        model: ModelCoordinates,
        alpha: f32,
        texture_coordinates: TextureCoordinates,
        scale: f32,
        radians: f32,
        view_x: f32,
        view_y: f32,
    ) {
        let model = coords.model(model);
        let texel = coords.texture(texture_coordinates);
        if let Some(vertices) = self.begin_rectangle(texture) {
            write_rectangle_scale_rotate(
                vertices, &model, alpha, &texel, scale, radians, view_x, view_y,
            );
        }
    }

    /// Upload and draw everything batched so far. A no-op with nothing
    /// pending.
    pub fn flush(&mut self) {
        if self.rectangle_count == 0 {
            return;
        }
        let rectangle_count = self.rectangle_count;
        self.rectangle_count = 0;

        debug_assert!(self.objects.is_some(), "flush without a context");
        let (Some(objects), Some(vertices)) = (&self.objects, &self.vertices) else {
            return;
        };
        let gl = &objects.gl;

        gl.buffer_sub_data_with_i32_and_array_buffer_view(
            Gl::ARRAY_BUFFER,
            0,
            &Float32Array::from(&vertices[..FLOATS_PER_RECTANGLE * rectangle_count]),
        );

        gl.bind_texture(Gl::TEXTURE_2D, self.current_texture.as_ref());

        // Two triangles per rectangle, three indices each.
        gl.draw_elements_with_i32(
            Gl::TRIANGLES,
            (6 * rectangle_count) as i32,
            Gl::UNSIGNED_SHORT,
            0,
        );

        self.flush_count = self.flush_count.wrapping_add(1);
        self.flushed_rectangles = self.flushed_rectangles.wrapping_add(rectangle_count as u32);
    }
}

impl Default for WebGl {
    fn default() -> WebGl {
        WebGl::new()
    }
}
