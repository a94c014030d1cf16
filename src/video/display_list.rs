//! Display list
//!
//! A batch of quads sharing one draw-call state key. Geometry is rebuilt
//! through the `begin`/`write`/`end` builder only when something actually
//! changed; unchanged content is replayed with `skip`, leaving last frame's
//! upload untouched. `flush` is the only place GPU state is mutated.

use std::sync::Arc;

use macroquad::prelude::Vec2;

use super::gfx::Gfx;
use super::quad_buffer::QuadBuffer;
use super::quad_pool::QuadPool;
use super::types::DisplayKey;
use super::vertex::{mirror_uvs, Mirroring};
use super::{Palette, Texture};
use crate::util::{timestamp, Rect};

/// Quad count for the common single-sprite write
pub const SINGLE_QUAD: usize = 1;

pub struct DisplayList {
    key: DisplayKey,
    texture: Option<Arc<Texture>>,
    palette: Option<Arc<Palette>>,
    visible: bool,
    amend: bool,
    timestamp: i64,
    current: usize,
    account: usize,
    pool: QuadPool,
    buffer: QuadBuffer,
}

impl DisplayList {
    pub fn new(
        key: DisplayKey,
        texture: Option<Arc<Texture>>,
        palette: Option<Arc<Palette>>,
    ) -> Self {
        let kind = key.program.vertex_kind();
        Self {
            key,
            texture,
            palette,
            visible: false,
            amend: false,
            timestamp: 0,
            current: 0,
            account: 0,
            pool: QuadPool::with_kind(kind),
            buffer: QuadBuffer::new(kind, key.usage),
        }
    }

    pub fn key(&self) -> &DisplayKey {
        &self.key
    }

    /// Reserve `count` quads for the writers, growing the pool if needed.
    /// Previously written offsets stay valid until the next flush.
    pub fn begin(&mut self, count: usize) -> &mut Self {
        if self.current + count > self.pool.quad_count() {
            self.pool.reserve_quads(self.current + count);
        }
        self.account = count;
        self
    }

    /// Write a textured quad at the reserved position: raster dimensions in
    /// local space, UV corners from `texture_rect`, palette row in `table`,
    /// then the requested UV mirroring.
    pub fn vtx_major_write(
        &mut self,
        texture_rect: Rect,
        raster_dimensions: Vec2,
        table: f32,
        alpha: f32,
        mirroring: Mirroring,
    ) -> &mut Self {
        if self.account == 0 {
            println!("Warning! Quad write without a begin!");
            return self;
        }
        let Some(vtx) = self.pool.major_quad_mut(self.current) else {
            println!("Warning! Major quad write against a blank display list!");
            return self;
        };
        vtx[0].position = Vec2::ZERO;
        vtx[0].uvcoords = texture_rect.left_top();
        vtx[1].position = Vec2::new(0.0, raster_dimensions.y);
        vtx[1].uvcoords = texture_rect.left_bottom();
        vtx[2].position = Vec2::new(raster_dimensions.x, 0.0);
        vtx[2].uvcoords = texture_rect.right_top();
        vtx[3].position = raster_dimensions;
        vtx[3].uvcoords = texture_rect.right_bottom();
        for v in vtx.iter_mut() {
            v.table = table;
            v.alpha = alpha;
        }
        mirror_uvs(vtx, mirroring);
        self
    }

    /// Write an untextured flat-color quad at the reserved position
    pub fn vtx_blank_write(
        &mut self,
        raster_rect: Rect,
        color: macroquad::prelude::Vec4,
    ) -> &mut Self {
        if self.account == 0 {
            println!("Warning! Quad write without a begin!");
            return self;
        }
        let Some(vtx) = self.pool.blank_quad_mut(self.current) else {
            println!("Warning! Blank quad write against a textured display list!");
            return self;
        };
        vtx[0].position = Vec2::ZERO;
        vtx[1].position = Vec2::new(0.0, raster_rect.h);
        vtx[2].position = Vec2::new(raster_rect.w, 0.0);
        vtx[3].position = raster_rect.dimensions();
        for v in vtx.iter_mut() {
            v.color = color;
        }
        // The raster rect's own origin is applied by a transform write,
        // matching the textured path.
        self
    }

    /// Rotate the just-written range about a pivot, then translate and
    /// scale. Zero rotation collapses to the scale/translate path without
    /// touching trig, which is a performance contract for the per-sprite
    /// hot loop, not a nicety.
    pub fn vtx_transform_write(
        &mut self,
        position: Vec2,
        scale: Vec2,
        pivot: Vec2,
        angle: f32,
    ) -> &mut Self {
        if angle == 0.0 {
            return self.vtx_blit_write(position, scale);
        }
        let (sin, cos) = angle.sin_cos();
        let left_top = position + scale * self.pool.position(self.current, 0);
        self.pool
            .for_positions_mut(self.current, self.account, |p| {
                let beg = (position + scale * *p) - left_top - pivot;
                let end = Vec2::new(beg.x * cos - beg.y * sin, beg.x * sin + beg.y * cos);
                *p = end + left_top + pivot;
            });
        self
    }

    /// Scale and translate the just-written range
    pub fn vtx_blit_write(&mut self, position: Vec2, scale: Vec2) -> &mut Self {
        self.pool
            .for_positions_mut(self.current, self.account, |p| {
                *p = *p * scale + position;
            });
        self
    }

    /// Translate the just-written range
    pub fn vtx_offset_write(&mut self, position: Vec2) -> &mut Self {
        self.vtx_blit_write(position, Vec2::ONE)
    }

    /// Commit the reserved range and mark the list dirty for upload
    pub fn end(&mut self) {
        self.amend = true;
        self.current += self.account;
        self.account = 0;
    }

    /// Advance past `count` quads without dirtying the list. Only legal when
    /// the caller guarantees the content is byte-identical to last frame.
    pub fn skip(&mut self, count: usize) {
        self.current += count;
        self.account = 0;
    }

    /// CPU half of flush: latch visibility, consume the amend bit, reset the
    /// write cursor. Returns (visible, quads, needs_upload).
    fn settle(&mut self) -> (bool, usize, bool) {
        self.visible = self.current != 0;
        let quads = self.current;
        let upload = self.visible && self.amend;
        if upload {
            self.amend = false;
        }
        self.current = 0;
        self.account = 0;
        (self.visible, quads, upload)
    }

    /// Upload dirty content and issue the draw call. An empty list draws
    /// nothing and reports not visible.
    pub fn flush(&mut self, gfx: &mut Gfx) {
        let (visible, quads, upload) = self.settle();
        if visible {
            if upload {
                self.buffer.upload(&self.pool, quads);
            }
            gfx.draw_list(
                &self.key,
                self.texture.as_deref(),
                self.palette.as_deref(),
                &self.buffer,
                quads,
            );
        }
    }

    /// Pin this list against key-based reuse. Returns the nonzero ownership
    /// token, or 0 when the list is already captured.
    pub fn capture(&mut self) -> i64 {
        if !self.persists() {
            self.timestamp = timestamp();
            return self.timestamp;
        }
        0
    }

    /// Release a captured list back into normal reuse
    pub fn release(&mut self) -> bool {
        if self.persists() {
            self.timestamp = 0;
            return true;
        }
        false
    }

    pub fn matches_key(&self, key: &DisplayKey) -> bool {
        self.key == *key
    }

    pub fn matches_timestamp(&self, timestamp: i64) -> bool {
        self.timestamp == timestamp
    }

    /// Did the last flush draw anything?
    pub fn rendered(&self) -> bool {
        self.visible
    }

    pub fn persists(&self) -> bool {
        self.timestamp != 0
    }

    pub fn amended(&self) -> bool {
        self.amend
    }

    /// Quads written so far this frame
    pub fn written(&self) -> usize {
        self.current
    }

    /// Drop the GPU buffer when the list is recycled mid-session
    pub fn destroy(&mut self) {
        self.buffer.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::types::{BlendMode, BufferUsage, Layer, Program};

    fn sprite_list() -> DisplayList {
        DisplayList::new(
            DisplayKey {
                layer: Layer::ACTORS,
                blend_mode: BlendMode::Alpha,
                usage: BufferUsage::Dynamic,
                texture: 1,
                palette: 0,
                program: Program::Sprites,
            },
            None,
            None,
        )
    }

    fn blank_list() -> DisplayList {
        DisplayList::new(
            DisplayKey {
                layer: Layer::HEADS_UP,
                blend_mode: BlendMode::Alpha,
                usage: BufferUsage::Dynamic,
                texture: 0,
                palette: 0,
                program: Program::Colors,
            },
            None,
            None,
        )
    }

    fn write_one(list: &mut DisplayList) {
        list.begin(SINGLE_QUAD)
            .vtx_major_write(
                Rect::new(0.0, 0.0, 1.0, 1.0),
                Vec2::new(16.0, 16.0),
                0.0,
                1.0,
                Mirroring::None,
            )
            .vtx_offset_write(Vec2::new(8.0, 8.0))
            .end();
    }

    #[test]
    fn test_pool_length_is_sum_of_begins() {
        let mut list = sprite_list();
        write_one(&mut list);
        write_one(&mut list);
        list.begin(3).end();
        assert_eq!(list.written(), 5);
        assert_eq!(list.pool.quad_count(), 5);
    }

    #[test]
    fn test_end_marks_amend_skip_does_not() {
        let mut list = sprite_list();
        write_one(&mut list);
        assert!(list.amended());
        list.settle();
        assert!(!list.amended());
        list.skip(SINGLE_QUAD);
        assert!(!list.amended());
        assert_eq!(list.written(), 1);
    }

    #[test]
    fn test_settle_empty_list_is_not_visible() {
        let mut list = sprite_list();
        let (visible, quads, upload) = list.settle();
        assert!(!visible);
        assert_eq!(quads, 0);
        assert!(!upload);
        assert!(!list.rendered());
    }

    #[test]
    fn test_settle_resets_cursor_and_consumes_amend() {
        let mut list = sprite_list();
        write_one(&mut list);
        let (visible, quads, upload) = list.settle();
        assert!(visible && upload);
        assert_eq!(quads, 1);
        assert_eq!(list.written(), 0);
        // Replaying the same frame via skip keeps the list clean.
        list.skip(SINGLE_QUAD);
        let (visible, quads, upload) = list.settle();
        assert!(visible);
        assert_eq!(quads, 1);
        assert!(!upload);
    }

    #[test]
    fn test_write_without_begin_is_a_noop() {
        let mut list = sprite_list();
        list.vtx_major_write(
            Rect::new(0.0, 0.0, 1.0, 1.0),
            Vec2::new(16.0, 16.0),
            0.0,
            1.0,
            Mirroring::None,
        );
        assert_eq!(list.written(), 0);
        assert!(!list.amended());
    }

    #[test]
    fn test_layout_mismatch_write_is_a_noop() {
        let mut list = blank_list();
        list.begin(SINGLE_QUAD).vtx_major_write(
            Rect::new(0.0, 0.0, 1.0, 1.0),
            Vec2::new(16.0, 16.0),
            0.0,
            1.0,
            Mirroring::None,
        );
        // The reservation stands, only the write was rejected.
        assert_eq!(list.pool.position(0, 3), Vec2::ZERO);
    }

    #[test]
    fn test_offset_write_translates_all_four_vertices() {
        let mut list = sprite_list();
        write_one(&mut list);
        assert_eq!(list.pool.position(0, 0), Vec2::new(8.0, 8.0));
        assert_eq!(list.pool.position(0, 3), Vec2::new(24.0, 24.0));
    }

    #[test]
    fn test_zero_rotation_matches_blit() {
        let mut rotated = sprite_list();
        rotated
            .begin(SINGLE_QUAD)
            .vtx_major_write(
                Rect::new(0.0, 0.0, 1.0, 1.0),
                Vec2::new(10.0, 10.0),
                0.0,
                1.0,
                Mirroring::None,
            )
            .vtx_transform_write(Vec2::new(3.0, 4.0), Vec2::new(2.0, 2.0), Vec2::ZERO, 0.0)
            .end();
        let mut blitted = sprite_list();
        blitted
            .begin(SINGLE_QUAD)
            .vtx_major_write(
                Rect::new(0.0, 0.0, 1.0, 1.0),
                Vec2::new(10.0, 10.0),
                0.0,
                1.0,
                Mirroring::None,
            )
            .vtx_blit_write(Vec2::new(3.0, 4.0), Vec2::new(2.0, 2.0))
            .end();
        for vertex in 0..4 {
            assert_eq!(
                rotated.pool.position(0, vertex),
                blitted.pool.position(0, vertex)
            );
        }
    }

    #[test]
    fn test_half_turn_rotation_flips_about_pivot() {
        let mut list = sprite_list();
        list.begin(SINGLE_QUAD)
            .vtx_major_write(
                Rect::new(0.0, 0.0, 1.0, 1.0),
                Vec2::new(10.0, 10.0),
                0.0,
                1.0,
                Mirroring::None,
            )
            .vtx_transform_write(
                Vec2::ZERO,
                Vec2::ONE,
                Vec2::new(5.0, 5.0),
                std::f32::consts::PI,
            )
            .end();
        // A half turn about the quad center swaps opposite corners.
        let p0 = list.pool.position(0, 0);
        let p3 = list.pool.position(0, 3);
        assert!((p0 - Vec2::new(10.0, 10.0)).length() < 1e-4);
        assert!((p3 - Vec2::ZERO).length() < 1e-4);
    }

    #[test]
    fn test_capture_release_tokens() {
        let mut list = sprite_list();
        assert!(!list.persists());
        let token = list.capture();
        assert_ne!(token, 0);
        assert!(list.persists());
        assert!(list.matches_timestamp(token));
        // Second capture is refused while the first owner holds the list.
        assert_eq!(list.capture(), 0);
        assert!(list.release());
        assert!(!list.release());
        assert!(!list.persists());
    }

    #[test]
    fn test_blank_write_fills_color() {
        let mut list = blank_list();
        list.begin(SINGLE_QUAD)
            .vtx_blank_write(
                Rect::new(0.0, 0.0, 320.0, 180.0),
                macroquad::prelude::Vec4::new(0.0, 0.0, 0.0, 0.5),
            )
            .vtx_offset_write(Vec2::ZERO)
            .end();
        assert_eq!(list.written(), 1);
        let vtx = list.pool.blank_quad_mut(0).unwrap();
        assert_eq!(vtx[3].position, Vec2::new(320.0, 180.0));
        assert_eq!(vtx[0].color.w, 0.5);
    }
}
