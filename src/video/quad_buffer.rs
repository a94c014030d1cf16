//! GPU-side quad buffer
//!
//! Each display list owns one vertex buffer created lazily at flush time and
//! grown only when the CPU pool outruns its capacity. Index data is shared
//! across every list (see `Gfx`), since all quads triangulate the same way.

use macroquad::miniquad::{BufferId, BufferSource, BufferType};
use macroquad::prelude::get_internal_gl;

use super::quad_pool::{QuadPool, QUAD};
use super::types::BufferUsage;
use super::vertex::VertexKind;

#[derive(Debug)]
pub struct QuadBuffer {
    kind: VertexKind,
    usage: BufferUsage,
    vertices: Option<BufferId>,
    capacity: usize,
}

impl QuadBuffer {
    pub fn new(kind: VertexKind, usage: BufferUsage) -> Self {
        Self {
            kind,
            usage,
            vertices: None,
            capacity: 0,
        }
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Capacity in quads
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn vertex_buffer(&self) -> Option<BufferId> {
        self.vertices
    }

    /// Push the first `quads` quads of the pool to the GPU, (re)allocating
    /// the buffer when the pool has outgrown it. Immutable buffers cannot be
    /// updated in place, so they are recreated with their data instead.
    pub fn upload(&mut self, pool: &QuadPool, quads: usize) {
        debug_assert_eq!(pool.kind(), self.kind);
        let mut gl = unsafe { get_internal_gl() };
        let ctx = &mut *gl.quad_context;
        let grow = quads > self.capacity || self.vertices.is_none();
        if self.usage == BufferUsage::Immutable {
            if let Some(id) = self.vertices.take() {
                ctx.delete_buffer(id);
            }
            let source = match pool {
                QuadPool::Major(v) => BufferSource::slice(&v[..quads * QUAD]),
                QuadPool::Blank(v) => BufferSource::slice(&v[..quads * QUAD]),
            };
            self.vertices = Some(ctx.new_buffer(
                BufferType::VertexBuffer,
                self.usage.to_miniquad(),
                source,
            ));
            self.capacity = quads;
            return;
        }
        if grow {
            if let Some(id) = self.vertices.take() {
                ctx.delete_buffer(id);
            }
            let source = match self.kind {
                VertexKind::Major => BufferSource::empty::<super::vertex::VtxMajor>(quads * QUAD),
                VertexKind::Blank => BufferSource::empty::<super::vertex::VtxBlank>(quads * QUAD),
            };
            self.vertices = Some(ctx.new_buffer(
                BufferType::VertexBuffer,
                self.usage.to_miniquad(),
                source,
            ));
            self.capacity = quads;
        }
        if let Some(id) = self.vertices {
            match pool {
                QuadPool::Major(v) => {
                    ctx.buffer_update(id, BufferSource::slice(&v[..quads * QUAD]))
                }
                QuadPool::Blank(v) => {
                    ctx.buffer_update(id, BufferSource::slice(&v[..quads * QUAD]))
                }
            }
        }
    }

    /// Release the GPU buffer (used when lists are recycled mid-session;
    /// buffers still alive at process exit go down with the context)
    pub fn destroy(&mut self) {
        if let Some(id) = self.vertices.take() {
            let mut gl = unsafe { get_internal_gl() };
            gl.quad_context.delete_buffer(id);
        }
        self.capacity = 0;
    }
}
