//! Render context
//!
//! The single owner of the backend and of the global pipeline state. Every
//! resource wrapper and every engine component takes `&mut RenderContext`
//! and binds what it needs immediately before use; the context forwards
//! every call and never elides a bind, so no component can depend on state
//! another one left behind.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::backend::*;
use crate::error::{RenderError, RenderResult};

/// Configuration for a render context
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Name used in log output
    pub label: String,
    /// Panic on use of a stale handle instead of returning an error
    pub strict_bindings: bool,
    /// Texture units available to one program
    pub max_texture_units: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            label: "render-context".to_string(),
            strict_bindings: cfg!(debug_assertions),
            max_texture_units: 16,
        }
    }
}

impl ContextConfig {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_strict_bindings(mut self, strict: bool) -> Self {
        self.strict_bindings = strict;
        self
    }

    pub fn with_max_texture_units(mut self, units: u32) -> Self {
        self.max_texture_units = units;
        self
    }
}

/// Mirror of the global device state, as last set through the context
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub depth_test: bool,
    pub cull_mode: CullMode,
    pub blend: Option<BlendState>,
    pub rasterizer_discard: bool,
    pub viewport: (u32, u32, u32, u32),
    pub framebuffer: Option<FramebufferHandle>,
    pub program: Option<ProgramHandle>,
    pub active_texture_unit: u32,
    pub textures: BTreeMap<u32, TextureHandle>,
    pub buffers: HashMap<BufferKind, BufferHandle>,
    pub vertex_layout: Option<VertexLayoutHandle>,
    pub index_buffer: Option<(BufferHandle, IndexFormat)>,
    pub feedback: Option<FeedbackHandle>,
}

/// The device context: owns the backend and its global toggles
pub struct RenderContext {
    backend: Box<dyn GraphicsBackend>,
    config: ContextConfig,
    state: PipelineState,
    live: HashMap<ResourceKind, HashSet<u64>>,
    layout_buffers: HashMap<VertexLayoutHandle, Vec<BufferHandle>>,
    frame_index: u64,
}

impl RenderContext {
    pub fn new(backend: Box<dyn GraphicsBackend>, config: ContextConfig) -> Self {
        let (width, height) = backend.surface_size();
        log::info!(
            "Render context `{}` created on {} backend ({}x{})",
            config.label,
            backend.name(),
            width,
            height
        );
        Self {
            backend,
            config,
            state: PipelineState {
                viewport: (0, 0, width, height),
                ..Default::default()
            },
            live: HashMap::new(),
            layout_buffers: HashMap::new(),
            frame_index: 0,
        }
    }

    /// Context on the headless backend with the default configuration
    pub fn headless(width: u32, height: u32) -> Self {
        Self::new(
            Box::new(HeadlessBackend::new(width, height)),
            ContextConfig::default(),
        )
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Downcast to a concrete backend
    pub fn backend<B: GraphicsBackend>(&self) -> Option<&B> {
        self.backend.as_any().downcast_ref::<B>()
    }

    pub fn backend_mut<B: GraphicsBackend>(&mut self) -> Option<&mut B> {
        self.backend.as_any_mut().downcast_mut::<B>()
    }

    // Frames

    pub fn begin_frame(&mut self) -> RenderResult<()> {
        self.backend.begin_frame()?;
        Ok(())
    }

    pub fn end_frame(&mut self) -> RenderResult<()> {
        self.backend.end_frame()?;
        self.frame_index += 1;
        Ok(())
    }

    /// Number of completed frames
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn resize_surface(&mut self, width: u32, height: u32) {
        log::debug!("Resizing surface to {}x{}", width, height);
        self.backend.resize_surface(width, height);
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.backend.surface_size()
    }

    pub fn surface_format(&self) -> TextureFormat {
        self.backend.surface_format()
    }

    // Handle registry

    pub fn is_live(&self, kind: ResourceKind, id: u64) -> bool {
        self.live.get(&kind).is_some_and(|set| set.contains(&id))
    }

    fn register(&mut self, kind: ResourceKind, id: u64) {
        self.live.entry(kind).or_default().insert(id);
    }

    fn retire(&mut self, kind: ResourceKind, id: u64) -> RenderResult<()> {
        self.ensure_live(kind, id)?;
        if let Some(set) = self.live.get_mut(&kind) {
            set.remove(&id);
        }
        Ok(())
    }

    fn ensure_live(&self, kind: ResourceKind, id: u64) -> RenderResult<()> {
        if self.is_live(kind, id) {
            return Ok(());
        }
        if self.config.strict_bindings {
            panic!("use of stale or unknown {kind} handle {id}");
        }
        log::warn!("Rejected use of stale or unknown {} handle {}", kind, id);
        Err(RenderError::InvalidBinding { kind, id })
    }

    // Buffers

    pub fn create_buffer(
        &mut self,
        desc: &BufferDescriptor,
        data: Option<&[u8]>,
    ) -> RenderResult<BufferHandle> {
        let handle = self
            .backend
            .create_buffer(desc, data)
            .map_err(|e| RenderError::from_creation(ResourceKind::Buffer, e))?;
        log::debug!("Created buffer {:?} ({} bytes)", desc.label, desc.size);
        self.register(ResourceKind::Buffer, handle.0);
        Ok(handle)
    }

    pub fn bind_buffer(&mut self, kind: BufferKind, buffer: Option<BufferHandle>) -> RenderResult<()> {
        if let Some(buffer) = buffer {
            self.ensure_live(ResourceKind::Buffer, buffer.0)?;
            self.state.buffers.insert(kind, buffer);
        } else {
            self.state.buffers.remove(&kind);
        }
        self.backend.bind_buffer(kind, buffer);
        Ok(())
    }

    /// Write into the buffer bound for `kind`
    pub fn write_buffer(&mut self, kind: BufferKind, offset: u64, data: &[u8]) -> RenderResult<()> {
        let buffer = self.state.buffers.get(&kind).copied().ok_or_else(|| {
            RenderError::InvalidOperation(format!("no {:?} buffer bound for write", kind))
        })?;
        self.ensure_live(ResourceKind::Buffer, buffer.0)?;
        self.backend
            .write_buffer(kind, offset, data)
            .map_err(RenderError::from_backend)
    }

    pub fn read_buffer(&mut self, buffer: BufferHandle) -> RenderResult<Vec<u8>> {
        self.ensure_live(ResourceKind::Buffer, buffer.0)?;
        self.backend
            .read_buffer(buffer)
            .map_err(RenderError::from_backend)
    }

    pub fn destroy_buffer(&mut self, buffer: BufferHandle) -> RenderResult<()> {
        self.retire(ResourceKind::Buffer, buffer.0)?;
        self.state.buffers.retain(|_, b| *b != buffer);
        if matches!(self.state.index_buffer, Some((b, _)) if b == buffer) {
            self.state.index_buffer = None;
        }
        self.backend.destroy_buffer(buffer);
        log::debug!("Destroyed buffer {}", buffer.0);
        Ok(())
    }

    // Textures, renderbuffers and framebuffers

    pub fn create_texture(&mut self, desc: &TextureDescriptor) -> RenderResult<TextureHandle> {
        let handle = self
            .backend
            .create_texture(desc)
            .map_err(|e| RenderError::from_creation(ResourceKind::Texture, e))?;
        log::debug!(
            "Created {:?} texture {:?} ({}x{})",
            desc.kind,
            desc.label,
            desc.width,
            desc.height
        );
        self.register(ResourceKind::Texture, handle.0);
        Ok(handle)
    }

    pub fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> RenderResult<()> {
        self.ensure_live(ResourceKind::Texture, texture.0)?;
        self.backend
            .write_texture(texture, data)
            .map_err(RenderError::from_backend)
    }

    pub fn resize_texture(&mut self, texture: TextureHandle, width: u32, height: u32) -> RenderResult<()> {
        self.ensure_live(ResourceKind::Texture, texture.0)?;
        self.backend
            .resize_texture(texture, width, height)
            .map_err(RenderError::from_backend)
    }

    pub fn destroy_texture(&mut self, texture: TextureHandle) -> RenderResult<()> {
        self.retire(ResourceKind::Texture, texture.0)?;
        self.state.textures.retain(|_, t| *t != texture);
        self.backend.destroy_texture(texture);
        Ok(())
    }

    pub fn create_renderbuffer(
        &mut self,
        desc: &RenderbufferDescriptor,
    ) -> RenderResult<RenderbufferHandle> {
        let handle = self
            .backend
            .create_renderbuffer(desc)
            .map_err(|e| RenderError::from_creation(ResourceKind::Renderbuffer, e))?;
        self.register(ResourceKind::Renderbuffer, handle.0);
        Ok(handle)
    }

    pub fn resize_renderbuffer(
        &mut self,
        renderbuffer: RenderbufferHandle,
        width: u32,
        height: u32,
    ) -> RenderResult<()> {
        self.ensure_live(ResourceKind::Renderbuffer, renderbuffer.0)?;
        self.backend
            .resize_renderbuffer(renderbuffer, width, height)
            .map_err(RenderError::from_backend)
    }

    pub fn destroy_renderbuffer(&mut self, renderbuffer: RenderbufferHandle) -> RenderResult<()> {
        self.retire(ResourceKind::Renderbuffer, renderbuffer.0)?;
        self.backend.destroy_renderbuffer(renderbuffer);
        Ok(())
    }

    pub fn create_framebuffer(
        &mut self,
        desc: &FramebufferDescriptor,
    ) -> RenderResult<FramebufferHandle> {
        for color in &desc.color_attachments {
            self.ensure_live(ResourceKind::Texture, color.0)?;
        }
        match desc.depth_attachment {
            Some(DepthAttachment::Texture(t)) => self.ensure_live(ResourceKind::Texture, t.0)?,
            Some(DepthAttachment::Renderbuffer(r)) => {
                self.ensure_live(ResourceKind::Renderbuffer, r.0)?
            }
            None => {}
        }
        let handle = self
            .backend
            .create_framebuffer(desc)
            .map_err(|e| RenderError::from_creation(ResourceKind::Framebuffer, e))?;
        log::debug!(
            "Created framebuffer {:?} ({}x{}, {} color attachments)",
            desc.label,
            desc.width,
            desc.height,
            desc.color_attachments.len()
        );
        self.register(ResourceKind::Framebuffer, handle.0);
        Ok(handle)
    }

    pub fn resize_framebuffer(
        &mut self,
        framebuffer: FramebufferHandle,
        width: u32,
        height: u32,
    ) -> RenderResult<()> {
        self.ensure_live(ResourceKind::Framebuffer, framebuffer.0)?;
        self.backend
            .resize_framebuffer(framebuffer, width, height)
            .map_err(RenderError::from_backend)
    }

    pub fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) -> RenderResult<()> {
        self.retire(ResourceKind::Framebuffer, framebuffer.0)?;
        if self.state.framebuffer == Some(framebuffer) {
            self.state.framebuffer = None;
        }
        self.backend.destroy_framebuffer(framebuffer);
        Ok(())
    }

    // Vertex layouts

    pub fn create_vertex_layout(
        &mut self,
        desc: &VertexLayoutDescriptor,
    ) -> RenderResult<VertexLayoutHandle> {
        let buffers = desc.buffers();
        for buffer in &buffers {
            self.ensure_live(ResourceKind::Buffer, buffer.0)?;
        }
        let handle = self
            .backend
            .create_vertex_layout(desc)
            .map_err(|e| RenderError::from_creation(ResourceKind::VertexLayout, e))?;
        self.register(ResourceKind::VertexLayout, handle.0);
        self.layout_buffers.insert(handle, buffers);
        Ok(handle)
    }

    pub fn destroy_vertex_layout(&mut self, layout: VertexLayoutHandle) -> RenderResult<()> {
        self.retire(ResourceKind::VertexLayout, layout.0)?;
        self.layout_buffers.remove(&layout);
        if self.state.vertex_layout == Some(layout) {
            self.state.vertex_layout = None;
        }
        self.backend.destroy_vertex_layout(layout);
        Ok(())
    }

    /// Bind a vertex layout; fails if the layout or any buffer it reads was destroyed
    pub fn bind_vertex_layout(&mut self, layout: Option<VertexLayoutHandle>) -> RenderResult<()> {
        if let Some(layout) = layout {
            self.ensure_live(ResourceKind::VertexLayout, layout.0)?;
            if let Some(buffers) = self.layout_buffers.get(&layout) {
                for buffer in buffers {
                    self.ensure_live(ResourceKind::Buffer, buffer.0)?;
                }
            }
        }
        self.state.vertex_layout = layout;
        self.backend.bind_vertex_layout(layout);
        Ok(())
    }

    pub fn bind_index_buffer(
        &mut self,
        buffer: Option<(BufferHandle, IndexFormat)>,
    ) -> RenderResult<()> {
        if let Some((buffer, _)) = buffer {
            self.ensure_live(ResourceKind::Buffer, buffer.0)?;
        }
        self.state.index_buffer = buffer;
        self.backend.bind_index_buffer(buffer);
        Ok(())
    }

    // Programs

    pub fn compile_shader(
        &mut self,
        stage: ShaderStage,
        label: &str,
        source: &str,
    ) -> RenderResult<ShaderHandle> {
        let handle = self
            .backend
            .compile_shader(stage, label, source)
            .map_err(|e| match e {
                BackendError::ShaderCompilationFailed { stage, log } => RenderError::ShaderCompile {
                    label: label.to_string(),
                    stage,
                    log,
                },
                other => RenderError::from_creation(ResourceKind::Shader, other),
            })?;
        self.register(ResourceKind::Shader, handle.0);
        Ok(handle)
    }

    pub fn link_program(
        &mut self,
        label: &str,
        shaders: &[ShaderHandle],
        varyings: &[String],
    ) -> RenderResult<(ProgramHandle, ProgramReflection)> {
        for shader in shaders {
            self.ensure_live(ResourceKind::Shader, shader.0)?;
        }
        let (handle, reflection) = self
            .backend
            .link_program(label, shaders, varyings)
            .map_err(|e| match e {
                BackendError::ProgramLinkFailed(log) => RenderError::ProgramLink {
                    label: label.to_string(),
                    log,
                },
                other => RenderError::from_creation(ResourceKind::Program, other),
            })?;
        log::debug!(
            "Linked program `{}` ({} uniforms, {} textures)",
            label,
            reflection.uniforms.len(),
            reflection.textures.len()
        );
        self.register(ResourceKind::Program, handle.0);
        Ok((handle, reflection))
    }

    pub fn destroy_shader(&mut self, shader: ShaderHandle) -> RenderResult<()> {
        self.retire(ResourceKind::Shader, shader.0)?;
        self.backend.destroy_shader(shader);
        Ok(())
    }

    pub fn destroy_program(&mut self, program: ProgramHandle) -> RenderResult<()> {
        self.retire(ResourceKind::Program, program.0)?;
        if self.state.program == Some(program) {
            self.state.program = None;
        }
        self.backend.destroy_program(program);
        Ok(())
    }

    pub fn use_program(&mut self, program: Option<ProgramHandle>) -> RenderResult<()> {
        if let Some(program) = program {
            self.ensure_live(ResourceKind::Program, program.0)?;
        }
        self.state.program = program;
        self.backend.use_program(program);
        Ok(())
    }

    pub fn set_uniform(
        &mut self,
        program: ProgramHandle,
        name: &str,
        value: &UniformValue,
    ) -> RenderResult<()> {
        self.ensure_live(ResourceKind::Program, program.0)?;
        log::trace!("Uniform `{}` = {:?}", name, value);
        self.backend
            .set_uniform(program, name, value)
            .map_err(RenderError::from_backend)
    }

    pub fn set_texture_unit(&mut self, program: ProgramHandle, name: &str, unit: u32) -> RenderResult<()> {
        self.ensure_live(ResourceKind::Program, program.0)?;
        self.check_unit(unit)?;
        self.backend
            .set_texture_unit(program, name, unit)
            .map_err(RenderError::from_backend)
    }

    fn check_unit(&self, unit: u32) -> RenderResult<()> {
        if unit >= self.config.max_texture_units {
            return Err(RenderError::InvalidOperation(format!(
                "texture unit {} exceeds the {} available units",
                unit, self.config.max_texture_units
            )));
        }
        Ok(())
    }

    pub fn active_texture(&mut self, unit: u32) -> RenderResult<()> {
        self.check_unit(unit)?;
        self.state.active_texture_unit = unit;
        self.backend.active_texture(unit);
        Ok(())
    }

    /// Bind a texture to the active unit
    pub fn bind_texture(&mut self, texture: Option<TextureHandle>) -> RenderResult<()> {
        let unit = self.state.active_texture_unit;
        match texture {
            Some(texture) => {
                self.ensure_live(ResourceKind::Texture, texture.0)?;
                self.state.textures.insert(unit, texture);
            }
            None => {
                self.state.textures.remove(&unit);
            }
        }
        self.backend.bind_texture(texture);
        Ok(())
    }

    // Global toggles

    pub fn set_depth_test(&mut self, enabled: bool) {
        self.state.depth_test = enabled;
        self.backend.set_depth_test(enabled);
    }

    pub fn set_cull_mode(&mut self, mode: CullMode) {
        self.state.cull_mode = mode;
        self.backend.set_cull_mode(mode);
    }

    pub fn set_blend(&mut self, blend: Option<BlendState>) {
        self.state.blend = blend;
        self.backend.set_blend(blend);
    }

    pub fn set_rasterizer_discard(&mut self, enabled: bool) {
        self.state.rasterizer_discard = enabled;
        self.backend.set_rasterizer_discard(enabled);
    }

    pub fn set_viewport(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.state.viewport = (x, y, width, height);
        self.backend.set_viewport(x, y, width, height);
    }

    /// Bind an off-screen target, or the screen when `None`
    pub fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) -> RenderResult<()> {
        if let Some(framebuffer) = framebuffer {
            self.ensure_live(ResourceKind::Framebuffer, framebuffer.0)?;
        }
        self.state.framebuffer = framebuffer;
        self.backend.bind_framebuffer(framebuffer);
        Ok(())
    }

    /// Clear the bound target
    pub fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) -> RenderResult<()> {
        self.backend
            .clear(color, depth)
            .map_err(RenderError::from_backend)
    }

    // Draws

    pub fn draw(
        &mut self,
        topology: PrimitiveTopology,
        first: u32,
        count: u32,
        instances: u32,
    ) -> RenderResult<()> {
        self.ensure_draw_bindings()?;
        self.backend
            .draw(topology, first, count, instances)
            .map_err(RenderError::from_backend)
    }

    pub fn draw_indexed(
        &mut self,
        topology: PrimitiveTopology,
        first: u32,
        count: u32,
        instances: u32,
    ) -> RenderResult<()> {
        self.ensure_draw_bindings()?;
        if let Some((buffer, _)) = self.state.index_buffer {
            self.ensure_live(ResourceKind::Buffer, buffer.0)?;
        }
        self.backend
            .draw_indexed(topology, first, count, instances)
            .map_err(RenderError::from_backend)
    }

    fn ensure_draw_bindings(&self) -> RenderResult<()> {
        if let Some(program) = self.state.program {
            self.ensure_live(ResourceKind::Program, program.0)?;
        }
        if let Some(framebuffer) = self.state.framebuffer {
            self.ensure_live(ResourceKind::Framebuffer, framebuffer.0)?;
        }
        if let Some(layout) = self.state.vertex_layout {
            self.ensure_live(ResourceKind::VertexLayout, layout.0)?;
            if let Some(buffers) = self.layout_buffers.get(&layout) {
                for buffer in buffers {
                    self.ensure_live(ResourceKind::Buffer, buffer.0)?;
                }
            }
        }
        Ok(())
    }

    // Transform feedback

    pub fn create_feedback(&mut self, buffers: &[BufferHandle]) -> RenderResult<FeedbackHandle> {
        for buffer in buffers {
            self.ensure_live(ResourceKind::Buffer, buffer.0)?;
        }
        let handle = self
            .backend
            .create_feedback(buffers)
            .map_err(|e| RenderError::from_creation(ResourceKind::Feedback, e))?;
        self.register(ResourceKind::Feedback, handle.0);
        Ok(handle)
    }

    pub fn begin_feedback(
        &mut self,
        feedback: FeedbackHandle,
        topology: PrimitiveTopology,
    ) -> RenderResult<()> {
        self.ensure_live(ResourceKind::Feedback, feedback.0)?;
        self.backend
            .begin_feedback(feedback, topology)
            .map_err(RenderError::from_backend)?;
        self.state.feedback = Some(feedback);
        Ok(())
    }

    pub fn end_feedback(&mut self) -> RenderResult<()> {
        self.state.feedback = None;
        self.backend.end_feedback().map_err(RenderError::from_backend)
    }

    pub fn destroy_feedback(&mut self, feedback: FeedbackHandle) -> RenderResult<()> {
        self.retire(ResourceKind::Feedback, feedback.0)?;
        self.backend.destroy_feedback(feedback);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lenient() -> RenderContext {
        RenderContext::new(
            Box::new(HeadlessBackend::new(64, 64)),
            ContextConfig::default().with_strict_bindings(false),
        )
    }

    fn vertex_buffer(ctx: &mut RenderContext) -> BufferHandle {
        ctx.create_buffer(
            &BufferDescriptor {
                label: None,
                size: 64,
                kind: BufferKind::Vertex,
                hint: UsageHint::Static,
            },
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_stale_buffer_binding_is_rejected() {
        let mut ctx = lenient();
        let buffer = vertex_buffer(&mut ctx);
        ctx.destroy_buffer(buffer).unwrap();
        let err = ctx.bind_buffer(BufferKind::Vertex, Some(buffer)).unwrap_err();
        assert!(matches!(
            err,
            RenderError::InvalidBinding {
                kind: ResourceKind::Buffer,
                ..
            }
        ));
        assert!(ctx.destroy_buffer(buffer).is_err());
    }

    #[test]
    #[should_panic(expected = "stale or unknown buffer")]
    fn test_strict_bindings_panic() {
        let mut ctx = RenderContext::new(
            Box::new(HeadlessBackend::new(8, 8)),
            ContextConfig::default().with_strict_bindings(true),
        );
        let buffer = vertex_buffer(&mut ctx);
        ctx.destroy_buffer(buffer).unwrap();
        let _ = ctx.bind_buffer(BufferKind::Vertex, Some(buffer));
    }

    #[test]
    fn test_layout_with_destroyed_buffer_cannot_bind() {
        let mut ctx = lenient();
        let buffer = vertex_buffer(&mut ctx);
        let layout = ctx
            .create_vertex_layout(&VertexLayoutDescriptor {
                label: None,
                attributes: vec![VertexAttribute {
                    location: 0,
                    buffer,
                    components: 4,
                    component_type: ComponentType::F32,
                    normalized: false,
                    stride: 16,
                    offset: 0,
                    divisor: 0,
                }],
            })
            .unwrap();
        ctx.bind_vertex_layout(Some(layout)).unwrap();
        ctx.destroy_buffer(buffer).unwrap();
        assert!(ctx.bind_vertex_layout(Some(layout)).is_err());
    }

    #[test]
    fn test_state_mirror_and_downcast() {
        let mut ctx = lenient();
        ctx.set_depth_test(true);
        ctx.set_cull_mode(CullMode::Back);
        assert!(ctx.state().depth_test);
        let backend = ctx.backend::<HeadlessBackend>().unwrap();
        assert!(backend.depth_test_enabled());
        assert_eq!(backend.cull_mode(), CullMode::Back);
    }

    #[test]
    fn test_texture_unit_limit() {
        let mut ctx = RenderContext::new(
            Box::new(HeadlessBackend::new(8, 8)),
            ContextConfig::default().with_max_texture_units(2),
        );
        assert!(ctx.active_texture(1).is_ok());
        assert!(ctx.active_texture(2).is_err());
    }
}
