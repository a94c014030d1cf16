//! Vertex layouts for the quad renderer
//!
//! Two layouts cover everything the engine draws: "major" vertices carry
//! position + UV + palette table row + alpha for textured sprites, "blank"
//! vertices carry position + flat color for untextured quads (cursors,
//! fades, highlights). Quads are written as 4 vertices in the order
//! left-top, left-bottom, right-top, right-bottom.

use macroquad::prelude::{Vec2, Vec4};

/// Discriminant tying a pool, a GPU buffer, and a program to one layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexKind {
    Major,
    Blank,
}

/// Textured / palette-indexed sprite vertex.
/// `uvcoords` and `table` are consumed as one Float3 attribute so the
/// palette row rides along with the texture coordinates.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VtxMajor {
    pub position: Vec2,
    pub uvcoords: Vec2,
    pub table: f32,
    pub alpha: f32,
}

/// Untextured flat-color vertex
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VtxBlank {
    pub position: Vec2,
    pub color: Vec4,
}

/// UV mirroring applied when a quad is written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mirroring {
    #[default]
    None,
    Horizontal,
    Vertical,
    Both,
}

impl Mirroring {
    /// Toggle the horizontal component, used when a facing or a reflected
    /// sequence flips a sprite
    pub fn flipped_horizontal(self) -> Self {
        match self {
            Self::None => Self::Horizontal,
            Self::Horizontal => Self::None,
            Self::Vertical => Self::Both,
            Self::Both => Self::Vertical,
        }
    }
}

/// Swap UV components across the diagonal vertex pairs (0,3) and (1,2).
/// Horizontal swaps u, vertical swaps v, both swaps whole coordinates.
/// Applying the same mirroring twice restores the original assignment.
pub fn mirror_uvs(vtx: &mut [VtxMajor; 4], mirroring: Mirroring) {
    match mirroring {
        Mirroring::None => {}
        Mirroring::Horizontal => {
            std::mem::swap(&mut vtx[0].uvcoords.x, &mut vtx[3].uvcoords.x);
            std::mem::swap(&mut vtx[1].uvcoords.x, &mut vtx[2].uvcoords.x);
        }
        Mirroring::Vertical => {
            std::mem::swap(&mut vtx[0].uvcoords.y, &mut vtx[3].uvcoords.y);
            std::mem::swap(&mut vtx[1].uvcoords.y, &mut vtx[2].uvcoords.y);
        }
        Mirroring::Both => {
            std::mem::swap(&mut vtx[0].uvcoords, &mut vtx[3].uvcoords);
            std::mem::swap(&mut vtx[1].uvcoords, &mut vtx[2].uvcoords);
        }
    }
}
