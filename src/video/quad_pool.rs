//! CPU-side quad pool
//!
//! Scratch vertex storage for one display list. Grows monotonically within a
//! frame and is never shrunk, so offsets handed out by `begin` stay valid
//! until the next flush and last frame's bytes survive for `skip` replays.

use macroquad::prelude::Vec2;

use super::vertex::{VertexKind, VtxBlank, VtxMajor};

/// Vertices per quad
pub const QUAD: usize = 4;

#[derive(Debug)]
pub enum QuadPool {
    Major(Vec<VtxMajor>),
    Blank(Vec<VtxBlank>),
}

impl QuadPool {
    pub fn with_kind(kind: VertexKind) -> Self {
        match kind {
            VertexKind::Major => Self::Major(Vec::new()),
            VertexKind::Blank => Self::Blank(Vec::new()),
        }
    }

    pub fn kind(&self) -> VertexKind {
        match self {
            Self::Major(_) => VertexKind::Major,
            Self::Blank(_) => VertexKind::Blank,
        }
    }

    /// Pool length in quads
    pub fn quad_count(&self) -> usize {
        match self {
            Self::Major(v) => v.len() / QUAD,
            Self::Blank(v) => v.len() / QUAD,
        }
    }

    /// Grow to hold at least `quads` quads. Never shrinks.
    pub fn reserve_quads(&mut self, quads: usize) {
        let vertices = quads * QUAD;
        match self {
            Self::Major(v) => {
                if vertices > v.len() {
                    v.resize(vertices, VtxMajor::default());
                }
            }
            Self::Blank(v) => {
                if vertices > v.len() {
                    v.resize(vertices, VtxBlank::default());
                }
            }
        }
    }

    /// The four major-layout vertices of one quad, or `None` on a layout
    /// mismatch (a caller error that the writers log and ignore)
    pub fn major_quad_mut(&mut self, quad: usize) -> Option<&mut [VtxMajor; 4]> {
        match self {
            Self::Major(v) => {
                let base = quad * QUAD;
                v.get_mut(base..base + QUAD)
                    .and_then(|slice| slice.try_into().ok())
            }
            Self::Blank(_) => None,
        }
    }

    /// The four blank-layout vertices of one quad
    pub fn blank_quad_mut(&mut self, quad: usize) -> Option<&mut [VtxBlank; 4]> {
        match self {
            Self::Blank(v) => {
                let base = quad * QUAD;
                v.get_mut(base..base + QUAD)
                    .and_then(|slice| slice.try_into().ok())
            }
            Self::Major(_) => None,
        }
    }

    /// Run a closure over every vertex position in a quad range, for the
    /// layout-independent transform writers
    pub fn for_positions_mut(
        &mut self,
        first_quad: usize,
        quads: usize,
        mut f: impl FnMut(&mut Vec2),
    ) {
        let base = first_quad * QUAD;
        let count = quads * QUAD;
        match self {
            Self::Major(v) => {
                for vtx in v.iter_mut().skip(base).take(count) {
                    f(&mut vtx.position);
                }
            }
            Self::Blank(v) => {
                for vtx in v.iter_mut().skip(base).take(count) {
                    f(&mut vtx.position);
                }
            }
        }
    }

    /// Read a vertex position without caring about the layout
    pub fn position(&self, quad: usize, vertex: usize) -> Vec2 {
        let index = quad * QUAD + vertex;
        match self {
            Self::Major(v) => v.get(index).map(|vtx| vtx.position).unwrap_or_default(),
            Self::Blank(v) => v.get(index).map(|vtx| vtx.position).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_grows_and_never_shrinks() {
        let mut pool = QuadPool::with_kind(VertexKind::Major);
        assert_eq!(pool.quad_count(), 0);
        pool.reserve_quads(3);
        assert_eq!(pool.quad_count(), 3);
        pool.reserve_quads(1);
        assert_eq!(pool.quad_count(), 3);
        pool.reserve_quads(8);
        assert_eq!(pool.quad_count(), 8);
    }

    #[test]
    fn test_quad_access_is_four_vertices() {
        let mut pool = QuadPool::with_kind(VertexKind::Major);
        pool.reserve_quads(2);
        let quad = pool.major_quad_mut(1).unwrap();
        assert_eq!(quad.len(), 4);
        assert!(pool.major_quad_mut(2).is_none());
    }

    #[test]
    fn test_layout_mismatch_returns_none() {
        let mut pool = QuadPool::with_kind(VertexKind::Blank);
        pool.reserve_quads(1);
        assert!(pool.major_quad_mut(0).is_none());
        assert!(pool.blank_quad_mut(0).is_some());
    }

    #[test]
    fn test_for_positions_walks_range_only() {
        let mut pool = QuadPool::with_kind(VertexKind::Blank);
        pool.reserve_quads(3);
        pool.for_positions_mut(1, 1, |p| *p = Vec2::new(5.0, 5.0));
        assert_eq!(pool.position(0, 0), Vec2::ZERO);
        assert_eq!(pool.position(1, 0), Vec2::new(5.0, 5.0));
        assert_eq!(pool.position(1, 3), Vec2::new(5.0, 5.0));
        assert_eq!(pool.position(2, 0), Vec2::ZERO);
    }
}
