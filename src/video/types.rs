//! Draw-state types shared across the video module
//!
//! A display list's identity is the six-field `DisplayKey`; its derived
//! lexicographic ordering (layer first, then blend mode, buffer usage,
//! texture, palette, program) is the renderer's draw order and the
//! invariant that keeps state changes between consecutive draws to a
//! minimum.

use serde::{Deserialize, Serialize};

/// Draw layer. Plain integer ordering with a couple of named values;
/// `INVISIBLE` sprites are culled before they ever reach a display list.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Layer(pub i32);

impl Layer {
    pub const BACKGROUND: Layer = Layer(0);
    pub const TILES: Layer = Layer(1);
    pub const ACTORS: Layer = Layer(2);
    pub const FOREGROUND: Layer = Layer(3);
    pub const HEADS_UP: Layer = Layer(4);
    pub const FADE: Layer = Layer(5);
    pub const INVISIBLE: Layer = Layer(i32::MAX);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum BlendMode {
    None,
    #[default]
    Alpha,
    Add,
    Multiply,
}

/// GPU buffer usage hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum BufferUsage {
    Immutable,
    #[default]
    Dynamic,
    Stream,
}

impl BufferUsage {
    pub fn to_miniquad(self) -> macroquad::miniquad::BufferUsage {
        match self {
            Self::Immutable => macroquad::miniquad::BufferUsage::Immutable,
            Self::Dynamic => macroquad::miniquad::BufferUsage::Dynamic,
            Self::Stream => macroquad::miniquad::BufferUsage::Stream,
        }
    }
}

/// Shader program selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Program {
    /// Plain textured sprites (major layout)
    Sprites,
    /// Palette-indexed sprites (major layout, index texture + palette rows)
    Indexed,
    /// Untextured flat-color quads (blank layout)
    Colors,
}

impl Program {
    pub fn vertex_kind(self) -> super::vertex::VertexKind {
        match self {
            Self::Sprites | Self::Indexed => super::vertex::VertexKind::Major,
            Self::Colors => super::vertex::VertexKind::Blank,
        }
    }
}

/// Display list identity. Two lists are interchangeable iff every field
/// matches; the derived `Ord` is the renderer's total draw order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DisplayKey {
    pub layer: Layer,
    pub blend_mode: BlendMode,
    pub usage: BufferUsage,
    pub texture: u64,
    pub palette: u64,
    pub program: Program,
}
