//! Render Engine - a scene-rendering engine over a bind-before-use GPU layer
//!
//! This engine supports two backends:
//! - **wgpu**: Cross-platform GPU rendering into a winit window
//! - **headless**: In-memory command recording, used by tests and tools
//!
//! # Features
//! - Explicitly owned GPU resources (buffers, vertex layouts, textures, framebuffers)
//! - WGSL programs with uniform and texture-unit caches
//! - Arena scene graph with world-matrix propagation
//! - Cameras with orbit, arcball and first-person controllers
//! - Ping-pong post-processing pipeline (tonemapping, blur, bright-pass)
//! - Double-buffered GPU-resident simulations such as particle systems

pub mod backend;
pub mod context;
pub mod engine;
pub mod error;
pub mod postprocess;
pub mod program;
pub mod resources;
pub mod scene;
pub mod simulation;
pub mod window;

pub use backend::{GraphicsBackend, HeadlessBackend, WgpuBackend};
pub use context::{ContextConfig, RenderContext};
pub use engine::{BackendType, Engine, EngineConfig};
pub use error::{RenderError, RenderResult};
pub use window::Window;

/// Install `env_logger` with an `info` default filter; `RUST_LOG` overrides.
/// Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
