//! Headless backend
//!
//! Tracks every resource in host memory and records every draw instead of
//! rasterizing. Used for tests and for tooling that runs without an adapter.
//! Transform feedback is emulated on the CPU: each feedback program runs a
//! registered kernel (identity by default) over the bound input buffers.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};

use crate::backend::reflect::{self, ProgramKind, ProgramReflection, ShaderModuleInfo};
use crate::backend::traits::*;
use crate::backend::types::*;

/// Buffer writes must be aligned like on real devices
const WRITE_ALIGNMENT: u64 = 4;

/// Where a recorded draw landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawTarget {
    Screen,
    Framebuffer(FramebufferHandle),
}

/// A texture as seen by one draw
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureBinding {
    pub name: String,
    pub unit: Option<u32>,
    pub texture: Option<TextureHandle>,
}

/// One recorded draw call
#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub program: ProgramHandle,
    pub program_label: String,
    pub target: DrawTarget,
    pub topology: PrimitiveTopology,
    pub first: u32,
    pub count: u32,
    pub instances: u32,
    pub indexed: bool,
    pub feedback: bool,
    pub depth_test: bool,
    pub cull_mode: CullMode,
    pub rasterizer_discard: bool,
    pub vertex_layout: Option<VertexLayoutHandle>,
    pub textures: Vec<TextureBinding>,
    pub uniforms: HashMap<String, UniformValue>,
}

impl DrawRecord {
    /// Texture bound to the named sampler at draw time
    pub fn texture(&self, name: &str) -> Option<TextureHandle> {
        self.textures
            .iter()
            .find(|t| t.name == name)
            .and_then(|t| t.texture)
    }
}

/// A recorded clear
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearRecord {
    pub target: DrawTarget,
    pub color: Option<[f32; 4]>,
    pub depth: Option<f32>,
}

/// Counters of state changes that reach the device
#[derive(Debug, Clone, Default)]
pub struct BackendStats {
    pub uniform_writes: u64,
    pub uniform_writes_by_name: HashMap<(ProgramHandle, String), u64>,
    pub texture_binds: u64,
    pub buffer_writes: u64,
    pub draws: u64,
    pub feedback_draws: u64,
    pub framebuffer_binds: u64,
}

impl BackendStats {
    pub fn uniform_writes_for(&self, program: ProgramHandle, name: &str) -> u64 {
        self.uniform_writes_by_name
            .get(&(program, name.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

/// Inputs of one emulated feedback dispatch
pub struct KernelInvocation<'a> {
    /// Number of elements processed
    pub count: u32,
    /// One flat array per feedback input, in binding order
    pub inputs: &'a [Vec<f32>],
    /// Components per element of each input
    pub input_components: &'a [u32],
    /// Components per element of each output
    pub output_components: &'a [u32],
    pub uniforms: &'a HashMap<String, UniformValue>,
}

/// CPU stand-in for a feedback program: returns one flat array per varying
pub type FeedbackKernel = Box<dyn Fn(&KernelInvocation<'_>) -> Vec<Vec<f32>>>;

/// Copies input `i` into output `i`
pub fn identity_kernel(invocation: &KernelInvocation<'_>) -> Vec<Vec<f32>> {
    invocation
        .output_components
        .iter()
        .enumerate()
        .map(|(i, components)| {
            let len = (invocation.count * components) as usize;
            let mut out = invocation.inputs.get(i).cloned().unwrap_or_default();
            out.resize(len, 0.0);
            out
        })
        .collect()
}

struct BufferState {
    desc: BufferDescriptor,
    data: Vec<u8>,
}

struct TextureState {
    desc: TextureDescriptor,
    data: Vec<u8>,
}

struct ProgramState {
    label: String,
    reflection: ProgramReflection,
    uniforms: HashMap<String, UniformValue>,
    texture_units: HashMap<String, u32>,
}

#[derive(Default)]
struct BoundState {
    buffers: HashMap<BufferKind, BufferHandle>,
    framebuffer: Option<FramebufferHandle>,
    program: Option<ProgramHandle>,
    active_unit: u32,
    units: BTreeMap<u32, TextureHandle>,
    vertex_layout: Option<VertexLayoutHandle>,
    index_buffer: Option<(BufferHandle, IndexFormat)>,
    depth_test: bool,
    cull_mode: CullMode,
    blend: Option<BlendState>,
    rasterizer_discard: bool,
    viewport: (u32, u32, u32, u32),
    feedback: Option<(FeedbackHandle, PrimitiveTopology)>,
}

/// In-memory backend that records instead of rendering
pub struct HeadlessBackend {
    next_id: u64,
    surface_size: (u32, u32),
    frame_count: u64,
    in_frame: bool,
    buffers: HashMap<u64, BufferState>,
    textures: HashMap<u64, TextureState>,
    renderbuffers: HashMap<u64, RenderbufferDescriptor>,
    framebuffers: HashMap<u64, FramebufferDescriptor>,
    vertex_layouts: HashMap<u64, VertexLayoutDescriptor>,
    shaders: HashMap<u64, ShaderModuleInfo>,
    programs: HashMap<u64, ProgramState>,
    feedbacks: HashMap<u64, Vec<BufferHandle>>,
    kernels: HashMap<ProgramHandle, FeedbackKernel>,
    state: BoundState,
    draws: Vec<DrawRecord>,
    clears: Vec<ClearRecord>,
    stats: BackendStats,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        log::info!("Headless backend created ({}x{})", width, height);
        Self {
            next_id: 1,
            surface_size: (width.max(1), height.max(1)),
            frame_count: 0,
            in_frame: false,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            framebuffers: HashMap::new(),
            vertex_layouts: HashMap::new(),
            shaders: HashMap::new(),
            programs: HashMap::new(),
            feedbacks: HashMap::new(),
            kernels: HashMap::new(),
            state: BoundState {
                viewport: (0, 0, width.max(1), height.max(1)),
                ..Default::default()
            },
            draws: Vec::new(),
            clears: Vec::new(),
            stats: BackendStats::default(),
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // Inspection

    /// Draws recorded since creation or the last `take_draws`
    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn take_draws(&mut self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.draws)
    }

    pub fn clears(&self) -> &[ClearRecord] {
        &self.clears
    }

    pub fn stats(&self) -> &BackendStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = BackendStats::default();
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|b| b.data.as_slice())
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0).map(|t| &t.desc)
    }

    pub fn texture_data(&self, texture: TextureHandle) -> Option<&[u8]> {
        self.textures.get(&texture.0).map(|t| t.data.as_slice())
    }

    pub fn renderbuffer_descriptor(
        &self,
        renderbuffer: RenderbufferHandle,
    ) -> Option<&RenderbufferDescriptor> {
        self.renderbuffers.get(&renderbuffer.0)
    }

    pub fn framebuffer_descriptor(
        &self,
        framebuffer: FramebufferHandle,
    ) -> Option<&FramebufferDescriptor> {
        self.framebuffers.get(&framebuffer.0)
    }

    /// Number of live objects of a kind
    pub fn live_count(&self, kind: ResourceKind) -> usize {
        match kind {
            ResourceKind::Buffer => self.buffers.len(),
            ResourceKind::Texture => self.textures.len(),
            ResourceKind::Renderbuffer => self.renderbuffers.len(),
            ResourceKind::Framebuffer => self.framebuffers.len(),
            ResourceKind::VertexLayout => self.vertex_layouts.len(),
            ResourceKind::Shader => self.shaders.len(),
            ResourceKind::Program => self.programs.len(),
            ResourceKind::Feedback => self.feedbacks.len(),
        }
    }

    pub fn program_uniform(&self, program: ProgramHandle, name: &str) -> Option<UniformValue> {
        self.programs.get(&program.0)?.uniforms.get(name).copied()
    }

    pub fn bound_framebuffer(&self) -> Option<FramebufferHandle> {
        self.state.framebuffer
    }

    pub fn depth_test_enabled(&self) -> bool {
        self.state.depth_test
    }

    pub fn cull_mode(&self) -> CullMode {
        self.state.cull_mode
    }

    pub fn rasterizer_discard(&self) -> bool {
        self.state.rasterizer_discard
    }

    pub fn viewport(&self) -> (u32, u32, u32, u32) {
        self.state.viewport
    }

    /// Replace the CPU emulation of a feedback program
    pub fn register_kernel<F>(&mut self, program: ProgramHandle, kernel: F)
    where
        F: Fn(&KernelInvocation<'_>) -> Vec<Vec<f32>> + 'static,
    {
        self.kernels.insert(program, Box::new(kernel));
    }

    // Validation helpers

    fn check_buffer(&self, buffer: BufferHandle) -> BackendResult<&BufferState> {
        self.buffers
            .get(&buffer.0)
            .ok_or(BackendError::InvalidHandle(ResourceKind::Buffer, buffer.0))
    }

    fn attachment_size(&self, attachment: DepthAttachment) -> BackendResult<(u32, u32)> {
        match attachment {
            DepthAttachment::Texture(texture) => self
                .textures
                .get(&texture.0)
                .map(|t| (t.desc.width, t.desc.height))
                .ok_or(BackendError::InvalidHandle(ResourceKind::Texture, texture.0)),
            DepthAttachment::Renderbuffer(rb) => self
                .renderbuffers
                .get(&rb.0)
                .map(|r| (r.width, r.height))
                .ok_or(BackendError::InvalidHandle(ResourceKind::Renderbuffer, rb.0)),
        }
    }

    fn check_framebuffer_complete(&self, desc: &FramebufferDescriptor) -> BackendResult<()> {
        let expected = (desc.width, desc.height);
        for color in &desc.color_attachments {
            let size = self.attachment_size(DepthAttachment::Texture(*color))?;
            if size != expected {
                return Err(BackendError::InvalidOperation(format!(
                    "framebuffer {:?} is {}x{} but color attachment is {}x{}",
                    desc.label, expected.0, expected.1, size.0, size.1
                )));
            }
        }
        if let Some(depth) = desc.depth_attachment {
            let size = self.attachment_size(depth)?;
            if size != expected {
                return Err(BackendError::InvalidOperation(format!(
                    "framebuffer {:?} is {}x{} but depth attachment is {}x{}",
                    desc.label, expected.0, expected.1, size.0, size.1
                )));
            }
        }
        Ok(())
    }

    fn current_target(&self) -> BackendResult<DrawTarget> {
        match self.state.framebuffer {
            None => Ok(DrawTarget::Screen),
            Some(fb) => {
                let desc = self
                    .framebuffers
                    .get(&fb.0)
                    .ok_or(BackendError::InvalidHandle(ResourceKind::Framebuffer, fb.0))?;
                self.check_framebuffer_complete(desc)?;
                Ok(DrawTarget::Framebuffer(fb))
            }
        }
    }

    fn record_draw(
        &mut self,
        topology: PrimitiveTopology,
        first: u32,
        count: u32,
        instances: u32,
        indexed: bool,
    ) -> BackendResult<()> {
        let program_handle = self
            .state
            .program
            .ok_or_else(|| BackendError::InvalidOperation("draw without a program".into()))?;
        let program = self
            .programs
            .get(&program_handle.0)
            .ok_or(BackendError::InvalidHandle(ResourceKind::Program, program_handle.0))?;

        let feedback = self.state.feedback.is_some();
        match (program.reflection.kind, feedback) {
            (ProgramKind::Feedback, false) => {
                return Err(BackendError::InvalidOperation(format!(
                    "feedback program `{}` drawn outside a feedback capture",
                    program.label
                )))
            }
            (ProgramKind::Render, true) => {
                return Err(BackendError::InvalidOperation(format!(
                    "render program `{}` drawn inside a feedback capture",
                    program.label
                )))
            }
            _ => {}
        }

        let required: Vec<u32> = match program.reflection.kind {
            ProgramKind::Render => program
                .reflection
                .vertex_inputs
                .iter()
                .map(|i| i.location)
                .collect(),
            ProgramKind::Feedback => program
                .reflection
                .feedback_inputs
                .iter()
                .map(|i| i.binding)
                .collect(),
        };
        if !required.is_empty() {
            let layout_handle = self.state.vertex_layout.ok_or_else(|| {
                BackendError::InvalidOperation(format!(
                    "program `{}` reads vertex attributes but no layout is bound",
                    program.label
                ))
            })?;
            let layout = self
                .vertex_layouts
                .get(&layout_handle.0)
                .ok_or(BackendError::InvalidHandle(ResourceKind::VertexLayout, layout_handle.0))?;
            for location in required {
                let attribute = layout
                    .attributes
                    .iter()
                    .find(|a| a.location == location)
                    .ok_or_else(|| {
                        BackendError::InvalidOperation(format!(
                            "layout {:?} has no attribute at location {}",
                            layout.label, location
                        ))
                    })?;
                self.check_buffer(attribute.buffer)?;
            }
        }

        if indexed {
            let (index, _) = self.state.index_buffer.ok_or_else(|| {
                BackendError::InvalidOperation("indexed draw without an index buffer".into())
            })?;
            self.check_buffer(index)?;
        }

        let target = self.current_target()?;

        let textures = program
            .reflection
            .textures
            .iter()
            .map(|t| {
                let unit = program.texture_units.get(&t.name).copied();
                TextureBinding {
                    name: t.name.clone(),
                    unit,
                    texture: unit.and_then(|u| self.state.units.get(&u).copied()),
                }
            })
            .collect();

        let record = DrawRecord {
            program: program_handle,
            program_label: program.label.clone(),
            target,
            topology,
            first,
            count,
            instances,
            indexed,
            feedback,
            depth_test: self.state.depth_test,
            cull_mode: self.state.cull_mode,
            rasterizer_discard: self.state.rasterizer_discard,
            vertex_layout: self.state.vertex_layout,
            textures,
            uniforms: program.uniforms.clone(),
        };
        log::trace!(
            "HeadlessBackend: draw `{}` {:?} count={} instances={} -> {:?}",
            record.program_label,
            topology,
            count,
            instances,
            target
        );

        self.stats.draws += 1;
        self.draws.push(record);

        if feedback {
            self.run_feedback(program_handle, first, count)?;
        }
        Ok(())
    }

    fn run_feedback(&mut self, program: ProgramHandle, first: u32, count: u32) -> BackendResult<()> {
        let (feedback, _) = self
            .state
            .feedback
            .ok_or_else(|| BackendError::InvalidOperation("no active feedback".into()))?;
        let outputs = self
            .feedbacks
            .get(&feedback.0)
            .cloned()
            .ok_or(BackendError::InvalidHandle(ResourceKind::Feedback, feedback.0))?;
        let state = self
            .programs
            .get(&program.0)
            .ok_or(BackendError::InvalidHandle(ResourceKind::Program, program.0))?;
        let layout = self
            .state
            .vertex_layout
            .and_then(|l| self.vertex_layouts.get(&l.0));

        let mut inputs = Vec::new();
        let mut input_components = Vec::new();
        for input in &state.reflection.feedback_inputs {
            let attribute = layout
                .and_then(|l| l.attributes.iter().find(|a| a.location == input.binding))
                .ok_or_else(|| {
                    BackendError::InvalidOperation(format!(
                        "feedback input `{}` has no bound attribute",
                        input.name
                    ))
                })?;
            let data = &self.check_buffer(attribute.buffer)?.data;
            let start = (attribute.offset + first as u64 * attribute.stride) as usize;
            let len = (count * input.components) as usize * 4;
            let end = (start + len).min(data.len());
            let mut values: Vec<f32> = data[start.min(end)..end]
                .chunks_exact(4)
                .map(bytemuck::pod_read_unaligned::<f32>)
                .collect();
            values.resize(len / 4, 0.0);
            inputs.push(values);
            input_components.push(input.components);
        }
        let output_components: Vec<u32> = state
            .reflection
            .feedback_outputs
            .iter()
            .map(|o| o.components)
            .collect();

        let invocation = KernelInvocation {
            count,
            inputs: &inputs,
            input_components: &input_components,
            output_components: &output_components,
            uniforms: &state.uniforms,
        };
        let results = match self.kernels.get(&program) {
            Some(kernel) => kernel(&invocation),
            None => identity_kernel(&invocation),
        };

        for (buffer, values) in outputs.iter().zip(results) {
            let target = self
                .buffers
                .get_mut(&buffer.0)
                .ok_or(BackendError::InvalidHandle(ResourceKind::Buffer, buffer.0))?;
            let bytes: &[u8] = bytemuck::cast_slice(&values);
            let len = bytes.len().min(target.data.len());
            target.data[..len].copy_from_slice(&bytes[..len]);
        }
        self.stats.feedback_draws += 1;
        Ok(())
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "Headless"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn surface_size(&self) -> (u32, u32) {
        self.surface_size
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.surface_size = (width.max(1), height.max(1));
    }

    fn surface_format(&self) -> TextureFormat {
        TextureFormat::Bgra8UnormSrgb
    }

    fn begin_frame(&mut self) -> BackendResult<()> {
        if self.in_frame {
            return Err(BackendError::InvalidOperation(
                "begin_frame called twice without end_frame".into(),
            ));
        }
        self.in_frame = true;
        Ok(())
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if !self.in_frame {
            return Err(BackendError::InvalidOperation(
                "end_frame called without begin_frame".into(),
            ));
        }
        self.in_frame = false;
        self.frame_count += 1;
        Ok(())
    }

    fn create_buffer(
        &mut self,
        desc: &BufferDescriptor,
        data: Option<&[u8]>,
    ) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?}: zero-sized buffer",
                desc.label
            )));
        }
        let mut contents = vec![0u8; desc.size as usize];
        if let Some(data) = data {
            if data.len() as u64 > desc.size {
                return Err(BackendError::BufferCreationFailed(format!(
                    "{:?}: {} bytes of data for a {} byte buffer",
                    desc.label,
                    data.len(),
                    desc.size
                )));
            }
            contents[..data.len()].copy_from_slice(data);
        }
        let id = self.allocate_id();
        log::trace!(
            "HeadlessBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        self.buffers.insert(
            id,
            BufferState {
                desc: desc.clone(),
                data: contents,
            },
        );
        Ok(BufferHandle(id))
    }

    fn bind_buffer(&mut self, kind: BufferKind, buffer: Option<BufferHandle>) {
        match buffer {
            Some(buffer) => {
                self.state.buffers.insert(kind, buffer);
            }
            None => {
                self.state.buffers.remove(&kind);
            }
        }
    }

    fn write_buffer(&mut self, kind: BufferKind, offset: u64, data: &[u8]) -> BackendResult<()> {
        let buffer = *self.state.buffers.get(&kind).ok_or_else(|| {
            BackendError::InvalidOperation(format!("no {:?} buffer bound for write", kind))
        })?;
        let state = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::InvalidHandle(ResourceKind::Buffer, buffer.0))?;
        let end = offset + data.len() as u64;
        if end > state.desc.size {
            return Err(BackendError::InvalidOperation(format!(
                "write of {} bytes at {} overflows {:?} ({} bytes)",
                data.len(),
                offset,
                state.desc.label,
                state.desc.size
            )));
        }
        if offset % WRITE_ALIGNMENT != 0 || data.len() as u64 % WRITE_ALIGNMENT != 0 {
            return Err(BackendError::InvalidOperation(format!(
                "write of {} bytes at {} into {:?} is not 4-byte aligned",
                data.len(),
                offset,
                state.desc.label
            )));
        }
        state.data[offset as usize..end as usize].copy_from_slice(data);
        self.stats.buffer_writes += 1;
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>> {
        Ok(self.check_buffer(buffer)?.data.clone())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        log::trace!("HeadlessBackend: destroying buffer {}", buffer.0);
        self.buffers.remove(&buffer.0);
        self.state.buffers.retain(|_, b| *b != buffer);
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: zero-sized texture",
                desc.label
            )));
        }
        if desc.kind == TextureKind::Cube && desc.width != desc.height {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: cube faces must be square",
                desc.label
            )));
        }
        let id = self.allocate_id();
        log::trace!(
            "HeadlessBackend: creating texture {:?} ({}x{}x{})",
            desc.label,
            desc.width,
            desc.height,
            desc.depth
        );
        self.textures.insert(
            id,
            TextureState {
                desc: desc.clone(),
                data: vec![0; desc.byte_size()],
            },
        );
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        let state = self
            .textures
            .get_mut(&texture.0)
            .ok_or(BackendError::InvalidHandle(ResourceKind::Texture, texture.0))?;
        if data.len() != state.desc.byte_size() {
            return Err(BackendError::InvalidOperation(format!(
                "texture {:?} expects {} bytes, got {}",
                state.desc.label,
                state.desc.byte_size(),
                data.len()
            )));
        }
        state.data.copy_from_slice(data);
        Ok(())
    }

    fn resize_texture(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
    ) -> BackendResult<()> {
        let state = self
            .textures
            .get_mut(&texture.0)
            .ok_or(BackendError::InvalidHandle(ResourceKind::Texture, texture.0))?;
        state.desc.width = width.max(1);
        state.desc.height = height.max(1);
        state.data = vec![0; state.desc.byte_size()];
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        log::trace!("HeadlessBackend: destroying texture {}", texture.0);
        self.textures.remove(&texture.0);
        self.state.units.retain(|_, t| *t != texture);
    }

    fn create_renderbuffer(
        &mut self,
        desc: &RenderbufferDescriptor,
    ) -> BackendResult<RenderbufferHandle> {
        if !desc.format.is_depth() {
            return Err(BackendError::InvalidOperation(format!(
                "{:?}: renderbuffers hold depth only, got {:?}",
                desc.label, desc.format
            )));
        }
        let id = self.allocate_id();
        self.renderbuffers.insert(id, desc.clone());
        Ok(RenderbufferHandle(id))
    }

    fn resize_renderbuffer(
        &mut self,
        renderbuffer: RenderbufferHandle,
        width: u32,
        height: u32,
    ) -> BackendResult<()> {
        let desc = self.renderbuffers.get_mut(&renderbuffer.0).ok_or(
            BackendError::InvalidHandle(ResourceKind::Renderbuffer, renderbuffer.0),
        )?;
        desc.width = width.max(1);
        desc.height = height.max(1);
        Ok(())
    }

    fn destroy_renderbuffer(&mut self, renderbuffer: RenderbufferHandle) {
        self.renderbuffers.remove(&renderbuffer.0);
    }

    fn create_framebuffer(
        &mut self,
        desc: &FramebufferDescriptor,
    ) -> BackendResult<FramebufferHandle> {
        for color in &desc.color_attachments {
            let texture = self
                .textures
                .get(&color.0)
                .ok_or(BackendError::InvalidHandle(ResourceKind::Texture, color.0))?;
            if !texture.desc.render_target {
                return Err(BackendError::FramebufferCreationFailed(format!(
                    "{:?}: texture {:?} is not a render target",
                    desc.label, texture.desc.label
                )));
            }
        }
        self.check_framebuffer_complete(desc)
            .map_err(|e| BackendError::FramebufferCreationFailed(e.to_string()))?;
        let id = self.allocate_id();
        self.framebuffers.insert(id, desc.clone());
        Ok(FramebufferHandle(id))
    }

    fn resize_framebuffer(
        &mut self,
        framebuffer: FramebufferHandle,
        width: u32,
        height: u32,
    ) -> BackendResult<()> {
        let desc = self.framebuffers.get_mut(&framebuffer.0).ok_or(
            BackendError::InvalidHandle(ResourceKind::Framebuffer, framebuffer.0),
        )?;
        desc.width = width.max(1);
        desc.height = height.max(1);
        Ok(())
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer.0);
        if self.state.framebuffer == Some(framebuffer) {
            self.state.framebuffer = None;
        }
    }

    fn create_vertex_layout(
        &mut self,
        desc: &VertexLayoutDescriptor,
    ) -> BackendResult<VertexLayoutHandle> {
        for attribute in &desc.attributes {
            self.check_buffer(attribute.buffer)
                .map_err(|e| BackendError::VertexLayoutCreationFailed(e.to_string()))?;
        }
        let id = self.allocate_id();
        self.vertex_layouts.insert(id, desc.clone());
        Ok(VertexLayoutHandle(id))
    }

    fn destroy_vertex_layout(&mut self, layout: VertexLayoutHandle) {
        self.vertex_layouts.remove(&layout.0);
        if self.state.vertex_layout == Some(layout) {
            self.state.vertex_layout = None;
        }
    }

    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        label: &str,
        source: &str,
    ) -> BackendResult<ShaderHandle> {
        let info = reflect::compile(stage, source)
            .map_err(|log| BackendError::ShaderCompilationFailed { stage, log })?;
        let id = self.allocate_id();
        log::trace!("HeadlessBackend: compiled {:?} shader `{}`", stage, label);
        self.shaders.insert(id, info);
        Ok(ShaderHandle(id))
    }

    fn link_program(
        &mut self,
        label: &str,
        shaders: &[ShaderHandle],
        varyings: &[String],
    ) -> BackendResult<(ProgramHandle, ProgramReflection)> {
        let modules = shaders
            .iter()
            .map(|s| {
                self.shaders
                    .get(&s.0)
                    .ok_or(BackendError::InvalidHandle(ResourceKind::Shader, s.0))
            })
            .collect::<BackendResult<Vec<_>>>()?;
        let reflection =
            reflect::link(&modules, varyings).map_err(BackendError::ProgramLinkFailed)?;
        let id = self.allocate_id();
        self.programs.insert(
            id,
            ProgramState {
                label: label.to_string(),
                reflection: reflection.clone(),
                uniforms: HashMap::new(),
                texture_units: HashMap::new(),
            },
        );
        Ok((ProgramHandle(id), reflection))
    }

    fn destroy_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader.0);
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program.0);
        self.kernels.remove(&program);
        if self.state.program == Some(program) {
            self.state.program = None;
        }
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.state.depth_test = enabled;
    }

    fn set_cull_mode(&mut self, mode: CullMode) {
        self.state.cull_mode = mode;
    }

    fn set_blend(&mut self, blend: Option<BlendState>) {
        self.state.blend = blend;
    }

    fn set_rasterizer_discard(&mut self, enabled: bool) {
        self.state.rasterizer_discard = enabled;
    }

    fn set_viewport(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.state.viewport = (x, y, width, height);
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.state.framebuffer = framebuffer;
        self.stats.framebuffer_binds += 1;
    }

    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) -> BackendResult<()> {
        let target = self.current_target()?;
        self.clears.push(ClearRecord {
            target,
            color,
            depth,
        });
        Ok(())
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        self.state.program = program;
    }

    fn set_uniform(
        &mut self,
        program: ProgramHandle,
        name: &str,
        value: &UniformValue,
    ) -> BackendResult<()> {
        if self.state.program != Some(program) {
            return Err(BackendError::InvalidOperation(format!(
                "uniform `{}` set on program {} which is not in use",
                name, program.0
            )));
        }
        let state = self
            .programs
            .get_mut(&program.0)
            .ok_or(BackendError::InvalidHandle(ResourceKind::Program, program.0))?;
        match state.reflection.uniform(name) {
            Some(info) if info.kind == value.kind() => {}
            Some(info) => {
                return Err(BackendError::InvalidOperation(format!(
                    "uniform `{}` is {:?}, got {:?}",
                    name,
                    info.kind,
                    value.kind()
                )))
            }
            None => {
                return Err(BackendError::InvalidOperation(format!(
                    "program `{}` has no uniform `{}`",
                    state.label, name
                )))
            }
        }
        state.uniforms.insert(name.to_string(), *value);
        self.stats.uniform_writes += 1;
        *self
            .stats
            .uniform_writes_by_name
            .entry((program, name.to_string()))
            .or_insert(0) += 1;
        Ok(())
    }

    fn set_texture_unit(
        &mut self,
        program: ProgramHandle,
        name: &str,
        unit: u32,
    ) -> BackendResult<()> {
        let state = self
            .programs
            .get_mut(&program.0)
            .ok_or(BackendError::InvalidHandle(ResourceKind::Program, program.0))?;
        if state.reflection.texture(name).is_none() {
            return Err(BackendError::InvalidOperation(format!(
                "program `{}` has no texture `{}`",
                state.label, name
            )));
        }
        if let Some((other, _)) = state
            .texture_units
            .iter()
            .find(|(n, u)| **u == unit && n.as_str() != name)
        {
            return Err(BackendError::InvalidOperation(format!(
                "texture unit {} already used by `{}`",
                unit, other
            )));
        }
        state.texture_units.insert(name.to_string(), unit);
        Ok(())
    }

    fn active_texture(&mut self, unit: u32) {
        self.state.active_unit = unit;
    }

    fn bind_texture(&mut self, texture: Option<TextureHandle>) {
        let unit = self.state.active_unit;
        match texture {
            Some(texture) => {
                self.state.units.insert(unit, texture);
                self.stats.texture_binds += 1;
            }
            None => {
                self.state.units.remove(&unit);
            }
        }
    }

    fn bind_vertex_layout(&mut self, layout: Option<VertexLayoutHandle>) {
        self.state.vertex_layout = layout;
    }

    fn bind_index_buffer(&mut self, buffer: Option<(BufferHandle, IndexFormat)>) {
        self.state.index_buffer = buffer;
    }

    fn draw(
        &mut self,
        topology: PrimitiveTopology,
        first: u32,
        count: u32,
        instances: u32,
    ) -> BackendResult<()> {
        self.record_draw(topology, first, count, instances, false)
    }

    fn draw_indexed(
        &mut self,
        topology: PrimitiveTopology,
        first: u32,
        count: u32,
        instances: u32,
    ) -> BackendResult<()> {
        self.record_draw(topology, first, count, instances, true)
    }

    fn create_feedback(&mut self, buffers: &[BufferHandle]) -> BackendResult<FeedbackHandle> {
        for buffer in buffers {
            self.check_buffer(*buffer)?;
        }
        let id = self.allocate_id();
        self.feedbacks.insert(id, buffers.to_vec());
        Ok(FeedbackHandle(id))
    }

    fn begin_feedback(
        &mut self,
        feedback: FeedbackHandle,
        topology: PrimitiveTopology,
    ) -> BackendResult<()> {
        if self.state.feedback.is_some() {
            return Err(BackendError::InvalidOperation(
                "feedback capture already active".into(),
            ));
        }
        if !self.feedbacks.contains_key(&feedback.0) {
            return Err(BackendError::InvalidHandle(ResourceKind::Feedback, feedback.0));
        }
        self.state.feedback = Some((feedback, topology));
        Ok(())
    }

    fn end_feedback(&mut self) -> BackendResult<()> {
        self.state
            .feedback
            .take()
            .map(|_| ())
            .ok_or_else(|| BackendError::InvalidOperation("no feedback capture active".into()))
    }

    fn destroy_feedback(&mut self, feedback: FeedbackHandle) {
        self.feedbacks.remove(&feedback.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_desc(size: u64) -> BufferDescriptor {
        BufferDescriptor {
            label: Some("test".into()),
            size,
            kind: BufferKind::Vertex,
            hint: UsageHint::Dynamic,
        }
    }

    #[test]
    fn test_write_requires_bound_buffer() {
        let mut backend = HeadlessBackend::new(64, 64);
        let buffer = backend.create_buffer(&buffer_desc(16), None).unwrap();
        assert!(backend.write_buffer(BufferKind::Vertex, 0, &[1; 4]).is_err());

        backend.bind_buffer(BufferKind::Vertex, Some(buffer));
        backend.write_buffer(BufferKind::Vertex, 4, &[7; 4]).unwrap();
        assert_eq!(&backend.buffer_data(buffer).unwrap()[4..8], &[7; 4]);
        assert!(backend.write_buffer(BufferKind::Vertex, 14, &[0; 4]).is_err());
    }

    #[test]
    fn test_unaligned_write_rejected() {
        let mut backend = HeadlessBackend::new(64, 64);
        let buffer = backend.create_buffer(&buffer_desc(16), None).unwrap();
        backend.bind_buffer(BufferKind::Vertex, Some(buffer));
        assert!(backend.write_buffer(BufferKind::Vertex, 0, &[1; 6]).is_err());
        assert!(backend.write_buffer(BufferKind::Vertex, 2, &[1; 4]).is_err());
        assert_eq!(backend.buffer_data(buffer).unwrap(), &[0; 16]);
        backend.write_buffer(BufferKind::Vertex, 8, &[1; 8]).unwrap();
    }

    #[test]
    fn test_framebuffer_size_mismatch_rejected() {
        let mut backend = HeadlessBackend::new(64, 64);
        let color = backend
            .create_texture(&TextureDescriptor {
                width: 32,
                height: 32,
                render_target: true,
                ..Default::default()
            })
            .unwrap();
        let result = backend.create_framebuffer(&FramebufferDescriptor {
            label: None,
            width: 64,
            height: 64,
            color_attachments: vec![color],
            depth_attachment: None,
        });
        assert!(matches!(result, Err(BackendError::FramebufferCreationFailed(_))));
    }

    #[test]
    fn test_frame_bracketing() {
        let mut backend = HeadlessBackend::new(8, 8);
        assert!(backend.end_frame().is_err());
        backend.begin_frame().unwrap();
        assert!(backend.begin_frame().is_err());
        backend.end_frame().unwrap();
        assert_eq!(backend.frame_count(), 1);
    }

    #[test]
    fn test_identity_kernel_pads_outputs() {
        let inputs = vec![vec![1.0, 2.0]];
        let uniforms = HashMap::new();
        let out = identity_kernel(&KernelInvocation {
            count: 2,
            inputs: &inputs,
            input_components: &[1],
            output_components: &[2],
            uniforms: &uniforms,
        });
        assert_eq!(out, vec![vec![1.0, 2.0, 0.0, 0.0]]);
    }
}
