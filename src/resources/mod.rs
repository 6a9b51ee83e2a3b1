//! GPU resource layer
//!
//! Buffers, vertex layouts, textures, framebuffers and renderbuffers. Every
//! wrapper is created and destroyed explicitly through the render context and
//! binds itself immediately before the operation that needs it.

mod buffer;
mod framebuffer;
mod mesh;
mod texture;
mod vertex_layout;

pub use buffer::*;
pub use framebuffer::*;
pub use mesh::*;
pub use texture::*;
pub use vertex_layout::*;
