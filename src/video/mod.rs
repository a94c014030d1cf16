//! Deferred quad renderer
//!
//! Display lists batch quads by draw-call state key, vertex pools are
//! rebuilt or replayed per frame depending on the amend/skip dirty
//! protocol, and GPU buffers are touched only at flush time.

mod animation;
mod display_list;
mod gfx;
mod quad_buffer;
mod quad_pool;
mod renderer;
mod texture;
mod types;
mod vertex;

pub use animation::{Animation, AnimationFile};
pub use display_list::{DisplayList, SINGLE_QUAD};
pub use gfx::{Gfx, GfxError};
pub use quad_buffer::QuadBuffer;
pub use quad_pool::QuadPool;
pub use renderer::{Renderer, SCREEN_HEIGHT, SCREEN_WIDTH};
pub use texture::{DecodedImage, Palette, Texture};
pub use types::{BlendMode, BufferUsage, DisplayKey, Layer, Program};
pub use vertex::{Mirroring, VertexKind, VtxBlank, VtxMajor};
