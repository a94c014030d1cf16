//! Graphics device layer
//!
//! Owns the shader programs, the per-(program, blend) pipelines, the shared
//! quad index buffer, and the GPU upload cache for textures and palettes.
//! Everything here runs on the render thread through macroquad's raw
//! miniquad context, fetched the same way the rest of the engine reaches
//! low-level GL state.

use std::collections::HashMap;

use macroquad::miniquad::{
    Bindings, BlendFactor, BlendState, BlendValue, BufferId, BufferSource, BufferType, Equation,
    Pipeline, PipelineParams, ShaderId, ShaderMeta, ShaderSource, TextureId, UniformBlockLayout,
    UniformDesc, UniformType, UniformsSource, VertexAttribute, VertexFormat,
};
use macroquad::prelude::{get_internal_gl, FilterMode, Mat4, Texture2D};

use super::quad_buffer::QuadBuffer;
use super::types::{BlendMode, DisplayKey, Program};
use super::{Palette, Texture};

/// Largest batch the u16 index buffer can address
const MAX_QUADS: usize = u16::MAX as usize / 4;

#[derive(Debug)]
pub enum GfxError {
    Shader(String),
}

impl std::fmt::Display for GfxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GfxError::Shader(msg) => write!(f, "shader compilation failed: {}", msg),
        }
    }
}

impl std::error::Error for GfxError {}

#[repr(C)]
struct Uniforms {
    mvp: Mat4,
}

pub struct Gfx {
    shaders: HashMap<Program, ShaderId>,
    pipelines: HashMap<(Program, BlendMode), Pipeline>,
    indices: Option<BufferId>,
    index_capacity: usize,
    uploads: HashMap<u64, Texture2D>,
    white: Texture2D,
    projection: Mat4,
}

impl Gfx {
    pub fn new() -> Result<Self, GfxError> {
        let mut shaders = HashMap::new();
        {
            let mut gl = unsafe { get_internal_gl() };
            let ctx = &mut *gl.quad_context;
            for program in [Program::Sprites, Program::Indexed, Program::Colors] {
                let source = ShaderSource::Glsl {
                    vertex: vertex_source(program),
                    fragment: fragment_source(program),
                };
                let shader = ctx
                    .new_shader(source, shader_meta(program))
                    .map_err(|e| GfxError::Shader(format!("{program:?}: {e}")))?;
                shaders.insert(program, shader);
            }
        }
        let white = Texture2D::from_rgba8(1, 1, &[255, 255, 255, 255]);
        white.set_filter(FilterMode::Nearest);
        Ok(Self {
            shaders,
            pipelines: HashMap::new(),
            indices: None,
            index_capacity: 0,
            uploads: HashMap::new(),
            white,
            projection: Mat4::IDENTITY,
        })
    }

    /// Flush macroquad's own batched draws so raw draw calls land in order
    pub fn begin_frame(&mut self) {
        let mut gl = unsafe { get_internal_gl() };
        gl.flush();
    }

    pub fn set_projection(&mut self, projection: Mat4) {
        self.projection = projection;
    }

    /// Bind blend/program/texture/palette from the list's identity and draw
    pub fn draw_list(
        &mut self,
        key: &DisplayKey,
        texture: Option<&Texture>,
        palette: Option<&Palette>,
        buffer: &QuadBuffer,
        quads: usize,
    ) {
        let Some(vertex_buffer) = buffer.vertex_buffer() else {
            return;
        };
        // Texture uploads may create macroquad textures, so resolve them
        // before borrowing the raw context.
        let images = match key.program {
            Program::Sprites => vec![self.resolve_texture(texture)],
            Program::Indexed => vec![
                self.resolve_texture(texture),
                self.resolve_texture(palette.map(|p| p.texture())),
            ],
            Program::Colors => Vec::new(),
        };
        self.ensure_indices(quads);
        let pipeline = self.pipeline(key.program, key.blend_mode);
        let Some(index_buffer) = self.indices else {
            return;
        };
        let mut gl = unsafe { get_internal_gl() };
        let ctx = &mut *gl.quad_context;
        ctx.apply_pipeline(&pipeline);
        ctx.apply_bindings(&Bindings {
            vertex_buffers: vec![vertex_buffer],
            index_buffer,
            images,
        });
        ctx.apply_uniforms(UniformsSource::table(&Uniforms {
            mvp: self.projection,
        }));
        ctx.draw(0, (quads.min(MAX_QUADS) * 6) as i32, 1);
    }

    /// GPU handle for a texture resource, uploading decoded pixels on first
    /// use. Missing or failed resources degrade to the white fallback.
    fn resolve_texture(&mut self, texture: Option<&Texture>) -> TextureId {
        let Some(texture) = texture else {
            return self.white.raw_miniquad_id();
        };
        if let Some(gpu) = self.uploads.get(&texture.id()) {
            return gpu.raw_miniquad_id();
        }
        let gpu = match texture.take_pixels() {
            Some(image) => {
                let gpu = Texture2D::from_rgba8(image.width, image.height, &image.pixels);
                gpu.set_filter(FilterMode::Nearest);
                gpu
            }
            None => self.white.clone(),
        };
        let id = gpu.raw_miniquad_id();
        self.uploads.insert(texture.id(), gpu);
        id
    }

    fn pipeline(&mut self, program: Program, blend_mode: BlendMode) -> Pipeline {
        if let Some(pipeline) = self.pipelines.get(&(program, blend_mode)) {
            return *pipeline;
        }
        let shader = self.shaders[&program];
        let mut gl = unsafe { get_internal_gl() };
        let ctx = &mut *gl.quad_context;
        let pipeline = ctx.new_pipeline(
            &[macroquad::miniquad::BufferLayout::default()],
            &attributes(program),
            shader,
            PipelineParams {
                color_blend: blend_state(blend_mode),
                ..Default::default()
            },
        );
        self.pipelines.insert((program, blend_mode), pipeline);
        pipeline
    }

    /// Grow the shared index buffer to cover `quads` quads
    fn ensure_indices(&mut self, quads: usize) {
        let quads = quads.min(MAX_QUADS);
        if quads <= self.index_capacity && self.indices.is_some() {
            return;
        }
        let capacity = quads.next_power_of_two().clamp(256, MAX_QUADS);
        let mut indices: Vec<u16> = Vec::with_capacity(capacity * 6);
        for quad in 0..capacity {
            let base = (quad * 4) as u16;
            indices.extend_from_slice(&[base, base + 1, base + 2, base + 1, base + 3, base + 2]);
        }
        let mut gl = unsafe { get_internal_gl() };
        let ctx = &mut *gl.quad_context;
        if let Some(id) = self.indices.take() {
            ctx.delete_buffer(id);
        }
        self.indices = Some(ctx.new_buffer(
            BufferType::IndexBuffer,
            macroquad::miniquad::BufferUsage::Immutable,
            BufferSource::slice(&indices),
        ));
        self.index_capacity = capacity;
    }
}

fn attributes(program: Program) -> Vec<VertexAttribute> {
    match program {
        Program::Sprites | Program::Indexed => vec![
            VertexAttribute::new("in_position", VertexFormat::Float2),
            VertexAttribute::new("in_uvs", VertexFormat::Float3),
            VertexAttribute::new("in_alpha", VertexFormat::Float1),
        ],
        Program::Colors => vec![
            VertexAttribute::new("in_position", VertexFormat::Float2),
            VertexAttribute::new("in_color", VertexFormat::Float4),
        ],
    }
}

fn blend_state(blend_mode: BlendMode) -> Option<BlendState> {
    match blend_mode {
        BlendMode::None => None,
        BlendMode::Alpha => Some(BlendState::new(
            Equation::Add,
            BlendFactor::Value(BlendValue::SourceAlpha),
            BlendFactor::OneMinusValue(BlendValue::SourceAlpha),
        )),
        BlendMode::Add => Some(BlendState::new(
            Equation::Add,
            BlendFactor::Value(BlendValue::SourceAlpha),
            BlendFactor::One,
        )),
        BlendMode::Multiply => Some(BlendState::new(
            Equation::Add,
            BlendFactor::Zero,
            BlendFactor::Value(BlendValue::SourceColor),
        )),
    }
}

fn shader_meta(program: Program) -> ShaderMeta {
    let images = match program {
        Program::Sprites => vec!["u_texture".to_string()],
        Program::Indexed => vec!["u_texture".to_string(), "u_palette".to_string()],
        Program::Colors => Vec::new(),
    };
    ShaderMeta {
        images,
        uniforms: UniformBlockLayout {
            uniforms: vec![UniformDesc::new("mvp", UniformType::Mat4)],
        },
    }
}

fn vertex_source(program: Program) -> &'static str {
    match program {
        Program::Sprites | Program::Indexed => MAJOR_VERTEX,
        Program::Colors => BLANK_VERTEX,
    }
}

fn fragment_source(program: Program) -> &'static str {
    match program {
        Program::Sprites => SPRITES_FRAGMENT,
        Program::Indexed => INDEXED_FRAGMENT,
        Program::Colors => COLORS_FRAGMENT,
    }
}

const MAJOR_VERTEX: &str = r#"#version 100
attribute vec2 in_position;
attribute vec3 in_uvs;
attribute float in_alpha;
varying lowp vec2 uvs;
varying lowp float table;
varying lowp float alpha;
uniform mat4 mvp;
void main() {
    gl_Position = mvp * vec4(in_position, 0.0, 1.0);
    uvs = in_uvs.xy;
    table = in_uvs.z;
    alpha = in_alpha;
}
"#;

const SPRITES_FRAGMENT: &str = r#"#version 100
varying lowp vec2 uvs;
varying lowp float table;
varying lowp float alpha;
uniform sampler2D u_texture;
void main() {
    lowp vec4 color = texture2D(u_texture, uvs);
    gl_FragColor = vec4(color.rgb, color.a * alpha);
}
"#;

const INDEXED_FRAGMENT: &str = r#"#version 100
varying lowp vec2 uvs;
varying lowp float table;
varying lowp float alpha;
uniform sampler2D u_texture;
uniform sampler2D u_palette;
void main() {
    lowp vec4 index = texture2D(u_texture, uvs);
    lowp vec4 color = texture2D(u_palette, vec2(index.r, table));
    gl_FragColor = vec4(color.rgb, color.a * alpha);
}
"#;

const BLANK_VERTEX: &str = r#"#version 100
attribute vec2 in_position;
attribute vec4 in_color;
varying lowp vec4 color;
uniform mat4 mvp;
void main() {
    gl_Position = mvp * vec4(in_position, 0.0, 1.0);
    color = in_color;
}
"#;

const COLORS_FRAGMENT: &str = r#"#version 100
varying lowp vec4 color;
void main() {
    gl_FragColor = color;
}
"#;
