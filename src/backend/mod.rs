//! Backend abstraction layer
//!
//! Provides the bind-before-use command model that the wgpu and headless
//! backends implement, plus the WGSL front end both share.

pub mod headless;
pub mod reflect;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use headless::{
    identity_kernel, BackendStats, ClearRecord, DrawRecord, DrawTarget, FeedbackKernel,
    HeadlessBackend, KernelInvocation, TextureBinding,
};
pub use reflect::{ProgramKind, ProgramReflection};
pub use traits::*;
pub use types::*;
pub use wgpu_backend::WgpuBackend;
