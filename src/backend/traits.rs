//! Core backend abstraction traits
//!
//! The backend exposes a bind-before-use command model: resources are created
//! up front, then bound to modal slots (one framebuffer, one program, one
//! vertex layout, one texture per unit) immediately before the draw that
//! consumes them. Both the wgpu backend and the headless backend implement it.

use std::any::Any;
use std::fmt;

use thiserror::Error;

use crate::backend::reflect::ProgramReflection;
use crate::backend::types::*;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create framebuffer: {0}")]
    FramebufferCreationFailed(String),
    #[error("Failed to create vertex layout: {0}")]
    VertexLayoutCreationFailed(String),
    #[error("{stage:?} shader failed to compile:\n{log}")]
    ShaderCompilationFailed { stage: ShaderStage, log: String },
    #[error("Program failed to link: {0}")]
    ProgramLinkFailed(String),
    #[error("Invalid {0} handle {1}")]
    InvalidHandle(ResourceKind, u64),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Kind of GPU object a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Renderbuffer,
    Framebuffer,
    VertexLayout,
    Shader,
    Program,
    Feedback,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Buffer => "buffer",
            ResourceKind::Texture => "texture",
            ResourceKind::Renderbuffer => "renderbuffer",
            ResourceKind::Framebuffer => "framebuffer",
            ResourceKind::VertexLayout => "vertex layout",
            ResourceKind::Shader => "shader",
            ResourceKind::Program => "program",
            ResourceKind::Feedback => "feedback target",
        };
        f.write_str(name)
    }
}

macro_rules! define_handles {
    ($($(#[$meta:meta])* $name:ident => $kind:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub(crate) u64);

            impl $name {
                pub const KIND: ResourceKind = ResourceKind::$kind;

                /// Raw backend id
                pub fn id(&self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

define_handles! {
    /// Handle to a GPU buffer
    BufferHandle => Buffer,
    /// Handle to a GPU texture (2D, cube or 3D)
    TextureHandle => Texture,
    /// Handle to depth/stencil storage that is never sampled
    RenderbufferHandle => Renderbuffer,
    /// Handle to an off-screen render target
    FramebufferHandle => Framebuffer,
    /// Handle to a vertex layout object
    VertexLayoutHandle => VertexLayout,
    /// Handle to a compiled shader stage
    ShaderHandle => Shader,
    /// Handle to a linked program
    ProgramHandle => Program,
    /// Handle to a transform-feedback capture target
    FeedbackHandle => Feedback,
}

/// Renderbuffer descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderbufferDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

/// Depth attachment of a framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthAttachment {
    Texture(TextureHandle),
    Renderbuffer(RenderbufferHandle),
}

/// Framebuffer descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub color_attachments: Vec<TextureHandle>,
    pub depth_attachment: Option<DepthAttachment>,
}

/// Vertex layout descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexLayoutDescriptor {
    pub label: Option<String>,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayoutDescriptor {
    /// Buffers referenced by any attribute, deduplicated
    pub fn buffers(&self) -> Vec<BufferHandle> {
        let mut buffers: Vec<BufferHandle> = self.attributes.iter().map(|a| a.buffer).collect();
        buffers.sort();
        buffers.dedup();
        buffers
    }
}

/// Main graphics backend trait
///
/// Object safe so the render context can own any backend as
/// `Box<dyn GraphicsBackend>`. Modal binds take `Option` where unbinding is
/// meaningful.
pub trait GraphicsBackend: Any {
    /// Human readable backend name
    fn name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Get the actual surface size (may be clamped by device limits)
    fn surface_size(&self) -> (u32, u32);

    /// Resize the default (screen) target
    fn resize_surface(&mut self, width: u32, height: u32);

    /// Color format of the screen target
    fn surface_format(&self) -> TextureFormat;

    /// Begin a new frame
    fn begin_frame(&mut self) -> BackendResult<()>;

    /// Submit recorded work and present the frame
    fn end_frame(&mut self) -> BackendResult<()>;

    // Buffers

    /// Create a buffer, optionally with initial contents
    fn create_buffer(
        &mut self,
        desc: &BufferDescriptor,
        data: Option<&[u8]>,
    ) -> BackendResult<BufferHandle>;

    /// Bind a buffer to the slot for its kind, or clear the slot
    fn bind_buffer(&mut self, kind: BufferKind, buffer: Option<BufferHandle>);

    /// Write data into the buffer currently bound for `kind`
    fn write_buffer(&mut self, kind: BufferKind, offset: u64, data: &[u8]) -> BackendResult<()>;

    /// Read back the full contents of a buffer
    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    // Textures and render targets

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Replace the full image of a texture. Cube data is six faces back to back.
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()>;

    /// Reallocate the texture at a new size; prior contents are not preserved
    fn resize_texture(&mut self, texture: TextureHandle, width: u32, height: u32)
        -> BackendResult<()>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    fn create_renderbuffer(
        &mut self,
        desc: &RenderbufferDescriptor,
    ) -> BackendResult<RenderbufferHandle>;

    fn resize_renderbuffer(
        &mut self,
        renderbuffer: RenderbufferHandle,
        width: u32,
        height: u32,
    ) -> BackendResult<()>;

    fn destroy_renderbuffer(&mut self, renderbuffer: RenderbufferHandle);

    fn create_framebuffer(
        &mut self,
        desc: &FramebufferDescriptor,
    ) -> BackendResult<FramebufferHandle>;

    /// Update the declared size of a framebuffer after its attachments were resized
    fn resize_framebuffer(
        &mut self,
        framebuffer: FramebufferHandle,
        width: u32,
        height: u32,
    ) -> BackendResult<()>;

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    // Vertex layouts

    fn create_vertex_layout(
        &mut self,
        desc: &VertexLayoutDescriptor,
    ) -> BackendResult<VertexLayoutHandle>;

    fn destroy_vertex_layout(&mut self, layout: VertexLayoutHandle);

    // Programs

    /// Compile one shader stage
    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        label: &str,
        source: &str,
    ) -> BackendResult<ShaderHandle>;

    /// Link compiled stages into a program. `varyings` names the outputs
    /// captured by transform feedback, in buffer order.
    fn link_program(
        &mut self,
        label: &str,
        shaders: &[ShaderHandle],
        varyings: &[String],
    ) -> BackendResult<(ProgramHandle, ProgramReflection)>;

    fn destroy_shader(&mut self, shader: ShaderHandle);

    fn destroy_program(&mut self, program: ProgramHandle);

    // Global pipeline state

    fn set_depth_test(&mut self, enabled: bool);

    fn set_cull_mode(&mut self, mode: CullMode);

    fn set_blend(&mut self, blend: Option<BlendState>);

    /// Discard primitives before rasterization (feedback-only passes)
    fn set_rasterizer_discard(&mut self, enabled: bool);

    fn set_viewport(&mut self, x: u32, y: u32, width: u32, height: u32);

    /// Bind an off-screen target, or the screen when `None`
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);

    /// Clear the bound target
    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) -> BackendResult<()>;

    fn use_program(&mut self, program: Option<ProgramHandle>);

    /// Set a named uniform on a program
    fn set_uniform(
        &mut self,
        program: ProgramHandle,
        name: &str,
        value: &UniformValue,
    ) -> BackendResult<()>;

    /// Point a program's texture sampler at a texture unit
    fn set_texture_unit(&mut self, program: ProgramHandle, name: &str, unit: u32)
        -> BackendResult<()>;

    /// Select the unit that subsequent `bind_texture` calls affect
    fn active_texture(&mut self, unit: u32);

    fn bind_texture(&mut self, texture: Option<TextureHandle>);

    fn bind_vertex_layout(&mut self, layout: Option<VertexLayoutHandle>);

    fn bind_index_buffer(&mut self, buffer: Option<(BufferHandle, IndexFormat)>);

    // Draws

    /// Draw non-indexed primitives with the current bindings
    fn draw(
        &mut self,
        topology: PrimitiveTopology,
        first: u32,
        count: u32,
        instances: u32,
    ) -> BackendResult<()>;

    /// Draw indexed primitives with the current bindings
    fn draw_indexed(
        &mut self,
        topology: PrimitiveTopology,
        first: u32,
        count: u32,
        instances: u32,
    ) -> BackendResult<()>;

    // Transform feedback

    /// Create a capture target writing into `buffers`, one per varying
    fn create_feedback(&mut self, buffers: &[BufferHandle]) -> BackendResult<FeedbackHandle>;

    fn begin_feedback(
        &mut self,
        feedback: FeedbackHandle,
        topology: PrimitiveTopology,
    ) -> BackendResult<()>;

    fn end_feedback(&mut self) -> BackendResult<()>;

    fn destroy_feedback(&mut self, feedback: FeedbackHandle);
}
