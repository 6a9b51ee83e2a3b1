//! wgpu backend implementation
//!
//! Binds only update host-side state. Each draw resolves that state into a
//! cached render pipeline plus freshly built bind groups and queues itself on
//! the pending render pass for the bound target. The pending pass is flushed
//! into the frame encoder when the target changes, when a clear starts a new
//! pass, and before any work the host must observe in order (buffer and
//! texture uploads, readbacks, destruction).
//!
//! Feedback programs run as compute dispatches of `ceil(count / 64)`
//! workgroups. Inputs are bound read-only at their attribute location in
//! group 2 and outputs read-write in varying order in group 3.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU64;
use std::ops::Range;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::backend::reflect::{
    self, ProgramKind, ProgramReflection, ShaderModuleInfo, FEEDBACK_INPUT_GROUP,
    FEEDBACK_OUTPUT_GROUP, FEEDBACK_WORKGROUP_SIZE, TEXTURE_GROUP, UNIFORM_GROUP,
};
use crate::backend::traits::*;
use crate::backend::types::*;

const SCREEN_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PassTarget {
    Screen,
    Framebuffer(u64),
}

/// One vertex buffer slot of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct VertexBufferKey {
    stride: u64,
    per_instance: bool,
    /// (shader location, format, offset within the element)
    attributes: Vec<(u32, wgpu::VertexFormat, u64)>,
}

/// Everything that selects a distinct render pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: u64,
    topology: PrimitiveTopology,
    strip_index_format: Option<wgpu::IndexFormat>,
    vertex_buffers: Vec<VertexBufferKey>,
    color_formats: Vec<wgpu::TextureFormat>,
    depth_format: Option<wgpu::TextureFormat>,
    depth_test: bool,
    cull_mode: CullMode,
    blend: Option<BlendState>,
}

/// A draw resolved against the bound state, waiting for its pass
struct QueuedDraw {
    pipeline: PipelineKey,
    bind_groups: [wgpu::BindGroup; 2],
    /// (buffer id, byte offset) per vertex buffer slot
    vertex_buffers: Vec<(u64, u64)>,
    index_buffer: Option<(u64, wgpu::IndexFormat)>,
    viewport: (u32, u32, u32, u32),
    range: Range<u32>,
    instances: u32,
    indexed: bool,
}

struct PendingPass {
    target: PassTarget,
    clear_color: Option<[f32; 4]>,
    clear_depth: Option<f32>,
    draws: Vec<QueuedDraw>,
}

impl PendingPass {
    fn new(target: PassTarget) -> Self {
        Self {
            target,
            clear_color: None,
            clear_depth: None,
            draws: Vec::new(),
        }
    }
}

struct BufferEntry {
    buffer: wgpu::Buffer,
    desc: BufferDescriptor,
}

struct TextureEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    desc: TextureDescriptor,
}

struct RenderbufferEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: RenderbufferDescriptor,
}

enum ProgramModules {
    Render {
        vertex: wgpu::ShaderModule,
        fragment: wgpu::ShaderModule,
        fragment_outputs: Vec<u32>,
    },
    Feedback {
        pipeline: wgpu::ComputePipeline,
    },
}

struct ProgramEntry {
    label: String,
    reflection: ProgramReflection,
    modules: ProgramModules,
    /// One layout per binding group, groups 0 to 3
    group_layouts: Vec<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,
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

/// Texture sampled by programs whose texture unit has nothing bound
struct FallbackTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    surface: wgpu::Surface<'static>,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    limits: wgpu::Limits,
    surface_config: wgpu::SurfaceConfiguration,
    current_texture: Option<wgpu::SurfaceTexture>,
    current_view: Option<wgpu::TextureView>,
    screen_depth: (wgpu::Texture, wgpu::TextureView),
    fallback: FallbackTexture,

    next_id: u64,
    buffers: HashMap<u64, BufferEntry>,
    textures: HashMap<u64, TextureEntry>,
    renderbuffers: HashMap<u64, RenderbufferEntry>,
    framebuffers: HashMap<u64, FramebufferDescriptor>,
    vertex_layouts: HashMap<u64, VertexLayoutDescriptor>,
    shaders: HashMap<u64, ShaderModuleInfo>,
    programs: HashMap<u64, ProgramEntry>,
    feedbacks: HashMap<u64, Vec<BufferHandle>>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,

    state: BoundState,
    encoder: Option<wgpu::CommandEncoder>,
    pending: Option<PendingPass>,
}

impl WgpuBackend {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
            TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
            TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
            TextureFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
        }
    }

    fn convert_texture_format_back(format: wgpu::TextureFormat) -> TextureFormat {
        match format {
            wgpu::TextureFormat::R8Unorm => TextureFormat::R8Unorm,
            wgpu::TextureFormat::Rgba8Unorm => TextureFormat::Rgba8Unorm,
            wgpu::TextureFormat::Rgba8UnormSrgb => TextureFormat::Rgba8UnormSrgb,
            wgpu::TextureFormat::Bgra8Unorm => TextureFormat::Bgra8Unorm,
            wgpu::TextureFormat::Bgra8UnormSrgb => TextureFormat::Bgra8UnormSrgb,
            wgpu::TextureFormat::Rgba16Float => TextureFormat::Rgba16Float,
            wgpu::TextureFormat::Rgba32Float => TextureFormat::Rgba32Float,
            wgpu::TextureFormat::Depth32Float => TextureFormat::Depth32Float,
            wgpu::TextureFormat::Depth24PlusStencil8 => TextureFormat::Depth24PlusStencil8,
            wgpu::TextureFormat::R32Float => TextureFormat::R32Float,
            wgpu::TextureFormat::Rg32Float => TextureFormat::Rg32Float,
            _ => TextureFormat::Rgba8Unorm,
        }
    }

    fn convert_vertex_format(attribute: &VertexAttribute) -> BackendResult<wgpu::VertexFormat> {
        use wgpu::VertexFormat as F;
        let format = match (attribute.component_type, attribute.components, attribute.normalized) {
            (ComponentType::F32, 1, _) => F::Float32,
            (ComponentType::F32, 2, _) => F::Float32x2,
            (ComponentType::F32, 3, _) => F::Float32x3,
            (ComponentType::F32, 4, _) => F::Float32x4,
            (ComponentType::U32, 1, false) => F::Uint32,
            (ComponentType::U32, 2, false) => F::Uint32x2,
            (ComponentType::U32, 3, false) => F::Uint32x3,
            (ComponentType::U32, 4, false) => F::Uint32x4,
            (ComponentType::I32, 1, false) => F::Sint32,
            (ComponentType::I32, 2, false) => F::Sint32x2,
            (ComponentType::I32, 3, false) => F::Sint32x3,
            (ComponentType::I32, 4, false) => F::Sint32x4,
            (ComponentType::U16, 2, false) => F::Uint16x2,
            (ComponentType::U16, 4, false) => F::Uint16x4,
            (ComponentType::U16, 2, true) => F::Unorm16x2,
            (ComponentType::U16, 4, true) => F::Unorm16x4,
            (ComponentType::U8, 2, false) => F::Uint8x2,
            (ComponentType::U8, 4, false) => F::Uint8x4,
            (ComponentType::U8, 2, true) => F::Unorm8x2,
            (ComponentType::U8, 4, true) => F::Unorm8x4,
            (ty, n, normalized) => {
                return Err(BackendError::InvalidOperation(format!(
                    "vertex format {:?}x{}{} is not supported",
                    ty,
                    n,
                    if normalized { " normalized" } else { "" }
                )))
            }
        };
        Ok(format)
    }

    fn convert_index_format(format: IndexFormat) -> wgpu::IndexFormat {
        match format {
            IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
            IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
        }
    }

    fn convert_topology(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
        match topology {
            PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
            PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
            PrimitiveTopology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
            PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
            PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        }
    }

    fn convert_blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
        match factor {
            BlendFactor::Zero => wgpu::BlendFactor::Zero,
            BlendFactor::One => wgpu::BlendFactor::One,
            BlendFactor::Src => wgpu::BlendFactor::Src,
            BlendFactor::OneMinusSrc => wgpu::BlendFactor::OneMinusSrc,
            BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
            BlendFactor::Dst => wgpu::BlendFactor::Dst,
            BlendFactor::OneMinusDst => wgpu::BlendFactor::OneMinusDst,
            BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
            BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
        }
    }

    fn convert_blend_operation(op: BlendOperation) -> wgpu::BlendOperation {
        match op {
            BlendOperation::Add => wgpu::BlendOperation::Add,
            BlendOperation::Subtract => wgpu::BlendOperation::Subtract,
            BlendOperation::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
            BlendOperation::Min => wgpu::BlendOperation::Min,
            BlendOperation::Max => wgpu::BlendOperation::Max,
        }
    }

    fn convert_blend_state(blend: BlendState) -> wgpu::BlendState {
        let component = |c: BlendComponent| wgpu::BlendComponent {
            src_factor: Self::convert_blend_factor(c.src_factor),
            dst_factor: Self::convert_blend_factor(c.dst_factor),
            operation: Self::convert_blend_operation(c.operation),
        };
        wgpu::BlendState {
            color: component(blend.color),
            alpha: component(blend.alpha),
        }
    }

    fn convert_filter_mode(mode: FilterMode) -> wgpu::FilterMode {
        match mode {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        }
    }

    fn convert_address_mode(mode: AddressMode) -> wgpu::AddressMode {
        match mode {
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
            AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
        }
    }

    fn view_dimension(kind: TextureKind) -> wgpu::TextureViewDimension {
        match kind {
            TextureKind::D2 => wgpu::TextureViewDimension::D2,
            TextureKind::Cube => wgpu::TextureViewDimension::Cube,
            TextureKind::D3 => wgpu::TextureViewDimension::D3,
        }
    }

    /// Size of a uniform of `kind` in the uniform address space
    fn padded_uniform_size(kind: UniformKind) -> usize {
        match kind {
            UniformKind::Mat3 => 48,
            UniformKind::Mat4 => 64,
            _ => 16,
        }
    }

    fn clamp_to_limit(width: u32, height: u32, max_size: u32) -> (u32, u32) {
        if width > max_size || height > max_size {
            // Keep the aspect ratio while fitting the device limit
            let scale = (max_size as f32 / width as f32).min(max_size as f32 / height as f32);
            let new_width = ((width as f32 * scale) as u32).max(1);
            let new_height = ((height as f32 * scale) as u32).max(1);
            (new_width, new_height)
        } else {
            (width.max(1), height.max(1))
        }
    }
}

impl WgpuBackend {
    /// Create a backend rendering into `window`
    pub fn new(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(window, vsync))
    }

    pub async fn new_async(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        let (instance, surface, adapter, device, queue) = Self::init_native(window.clone()).await?;

        device.on_uncaptured_error(Box::new(|error| {
            log::error!("wgpu: {}", error);
        }));

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| {
                BackendError::SurfaceCreationFailed("surface reports no supported formats".into())
            })?;

        let present_mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };

        let limits = device.limits();
        let (width, height) =
            Self::clamp_to_limit(size.width, size.height, limits.max_texture_dimension_2d);

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width,
            height,
            present_mode,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);
        log::info!(
            "Configured surface {}x{} ({:?}, {:?})",
            width,
            height,
            surface_format,
            present_mode
        );

        let screen_depth = Self::create_screen_depth(&device, width, height);
        let fallback = Self::create_fallback_texture(&device, &queue);

        Ok(Self {
            instance,
            surface,
            adapter,
            device,
            queue,
            limits,
            surface_config,
            current_texture: None,
            current_view: None,
            screen_depth,
            fallback,
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            framebuffers: HashMap::new(),
            vertex_layouts: HashMap::new(),
            shaders: HashMap::new(),
            programs: HashMap::new(),
            feedbacks: HashMap::new(),
            pipelines: HashMap::new(),
            state: BoundState {
                viewport: (0, 0, width, height),
                ..Default::default()
            },
            encoder: None,
            pending: None,
        })
    }

    async fn init_native(
        window: Arc<winit::window::Window>,
    ) -> BackendResult<(
        wgpu::Instance,
        wgpu::Surface<'static>,
        wgpu::Adapter,
        wgpu::Device,
        wgpu::Queue,
    )> {
        // On Windows, try Vulkan first to avoid D3D12 debug layer validation errors
        let backends = if std::env::var("WGPU_BACKEND").is_ok() {
            wgpu::Backends::all()
        } else {
            #[cfg(target_os = "windows")]
            {
                wgpu::Backends::VULKAN
            }
            #[cfg(not(target_os = "windows"))]
            {
                wgpu::Backends::all()
            }
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await;

        // If no adapter found with preferred backend, try with all backends
        let (instance, surface, adapter) = if adapter.is_none() && backends != wgpu::Backends::all() {
            log::warn!("Preferred backend not available, falling back to all backends");
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let surface = instance
                .create_surface(window.clone())
                .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: Some(&surface),
                    force_fallback_adapter: false,
                })
                .await
                .ok_or_else(|| {
                    BackendError::InitializationFailed("No suitable adapter found".into())
                })?;
            (instance, surface, adapter)
        } else {
            let adapter = adapter.ok_or_else(|| {
                BackendError::InitializationFailed("No suitable adapter found".into())
            })?;
            (instance, surface, adapter)
        };

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        // Float render targets are sampled through filtering samplers
        let required_features = adapter.features() & wgpu::Features::FLOAT32_FILTERABLE;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Graphics Device"),
                    required_features,
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        Ok((instance, surface, adapter, device, queue))
    }

    fn create_screen_depth(
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("screen depth"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SCREEN_DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    fn create_fallback_texture(device: &wgpu::Device, queue: &wgpu::Queue) -> FallbackTexture {
        let texture = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some("fallback white"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[255, 255, 255, 255],
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor::default());
        FallbackTexture {
            _texture: texture,
            view,
            sampler,
        }
    }

    /// Get reference to the wgpu device
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    /// Number of distinct render pipelines built so far
    pub fn cached_pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // Command submission

    /// Record the pending render pass into the encoder
    fn flush_pass(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let mut encoder = self.encoder.take().unwrap_or_else(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                })
        });

        {
            let (color_views, depth_view): (Vec<&wgpu::TextureView>, Option<&wgpu::TextureView>) =
                match pending.target {
                    PassTarget::Screen => match self.current_view.as_ref() {
                        Some(view) => (vec![view], Some(&self.screen_depth.1)),
                        None => {
                            log::warn!("Dropping screen pass recorded outside a frame");
                            (Vec::new(), None)
                        }
                    },
                    PassTarget::Framebuffer(id) => match self.framebuffers.get(&id) {
                        Some(desc) => (
                            desc.color_attachments
                                .iter()
                                .filter_map(|c| self.textures.get(&c.0).map(|t| &t.view))
                                .collect(),
                            desc.depth_attachment.and_then(|depth| match depth {
                                DepthAttachment::Texture(t) => {
                                    self.textures.get(&t.0).map(|t| &t.view)
                                }
                                DepthAttachment::Renderbuffer(r) => {
                                    self.renderbuffers.get(&r.0).map(|r| &r.view)
                                }
                            }),
                        ),
                        None => {
                            log::warn!("Dropping pass for destroyed framebuffer {}", id);
                            (Vec::new(), None)
                        }
                    },
                };

            if !color_views.is_empty() || depth_view.is_some() {
                let color_load = match pending.clear_color {
                    Some(c) => wgpu::LoadOp::Clear(wgpu::Color {
                        r: c[0] as f64,
                        g: c[1] as f64,
                        b: c[2] as f64,
                        a: c[3] as f64,
                    }),
                    None => wgpu::LoadOp::Load,
                };
                let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = color_views
                    .iter()
                    .map(|&view| {
                        Some(wgpu::RenderPassColorAttachment {
                            view,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: color_load,
                                store: wgpu::StoreOp::Store,
                            },
                        })
                    })
                    .collect();
                let depth_attachment =
                    depth_view.map(|view| wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: match pending.clear_depth {
                                Some(depth) => wgpu::LoadOp::Clear(depth),
                                None => wgpu::LoadOp::Load,
                            },
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    });

                let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: None,
                    color_attachments: &color_attachments,
                    depth_stencil_attachment: depth_attachment,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });

                for draw in &pending.draws {
                    let Some(pipeline) = self.pipelines.get(&draw.pipeline) else {
                        continue;
                    };
                    render_pass.set_pipeline(pipeline);
                    for (index, group) in draw.bind_groups.iter().enumerate() {
                        render_pass.set_bind_group(index as u32, group, &[]);
                    }
                    for (slot, (buffer, offset)) in draw.vertex_buffers.iter().enumerate() {
                        if let Some(entry) = self.buffers.get(buffer) {
                            render_pass.set_vertex_buffer(slot as u32, entry.buffer.slice(*offset..));
                        }
                    }
                    let (x, y, width, height) = draw.viewport;
                    render_pass.set_viewport(
                        x as f32,
                        y as f32,
                        width as f32,
                        height as f32,
                        0.0,
                        1.0,
                    );
                    if draw.indexed {
                        let Some((buffer, format)) = draw.index_buffer else {
                            continue;
                        };
                        let Some(entry) = self.buffers.get(&buffer) else {
                            continue;
                        };
                        render_pass.set_index_buffer(entry.buffer.slice(..), format);
                        render_pass.draw_indexed(draw.range.clone(), 0, 0..draw.instances);
                    } else {
                        render_pass.draw(draw.range.clone(), 0..draw.instances);
                    }
                }
            }
        }

        self.encoder = Some(encoder);
    }

    /// Flush and submit everything recorded so far
    fn submit(&mut self) {
        self.flush_pass();
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    // Target resolution

    fn current_target(&self) -> PassTarget {
        match self.state.framebuffer {
            None => PassTarget::Screen,
            Some(fb) => PassTarget::Framebuffer(fb.0),
        }
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
                .map(|r| (r.desc.width, r.desc.height))
                .ok_or(BackendError::InvalidHandle(ResourceKind::Renderbuffer, rb.0)),
        }
    }

    fn check_framebuffer_complete(&self, desc: &FramebufferDescriptor) -> BackendResult<()> {
        let expected = (desc.width, desc.height);
        let attachments = desc
            .color_attachments
            .iter()
            .map(|c| DepthAttachment::Texture(*c))
            .chain(desc.depth_attachment);
        for attachment in attachments {
            let size = self.attachment_size(attachment)?;
            if size != expected {
                return Err(BackendError::InvalidOperation(format!(
                    "framebuffer {:?} is {}x{} but an attachment is {}x{}",
                    desc.label, expected.0, expected.1, size.0, size.1
                )));
            }
        }
        Ok(())
    }

    /// Size, color formats and depth format of a target
    #[allow(clippy::type_complexity)]
    fn target_info(
        &self,
        target: PassTarget,
    ) -> BackendResult<((u32, u32), Vec<wgpu::TextureFormat>, Option<wgpu::TextureFormat>)> {
        match target {
            PassTarget::Screen => {
                if self.current_view.is_none() {
                    return Err(BackendError::InvalidOperation(
                        "the screen can only be drawn between begin_frame and end_frame".into(),
                    ));
                }
                Ok((
                    (self.surface_config.width, self.surface_config.height),
                    vec![self.surface_config.format],
                    Some(SCREEN_DEPTH_FORMAT),
                ))
            }
            PassTarget::Framebuffer(id) => {
                let desc = self
                    .framebuffers
                    .get(&id)
                    .ok_or(BackendError::InvalidHandle(ResourceKind::Framebuffer, id))?;
                self.check_framebuffer_complete(desc)?;
                let colors = desc
                    .color_attachments
                    .iter()
                    .map(|c| {
                        self.textures
                            .get(&c.0)
                            .map(|t| t.texture.format())
                            .ok_or(BackendError::InvalidHandle(ResourceKind::Texture, c.0))
                    })
                    .collect::<BackendResult<Vec<_>>>()?;
                let depth = match desc.depth_attachment {
                    None => None,
                    Some(DepthAttachment::Texture(t)) => self.textures.get(&t.0).map(|t| t.texture.format()),
                    Some(DepthAttachment::Renderbuffer(r)) => {
                        self.renderbuffers.get(&r.0).map(|r| r.texture.format())
                    }
                };
                Ok(((desc.width, desc.height), colors, depth))
            }
        }
    }

    fn pass_for(&mut self, target: PassTarget) -> &mut PendingPass {
        if self.pending.as_ref().map(|p| p.target) != Some(target) {
            self.flush_pass();
        }
        self.pending.get_or_insert_with(|| PendingPass::new(target))
    }

    // Draw resolution

    /// Vertex buffer slots for the program's inputs from the bound layout
    fn vertex_bindings(
        &self,
        program: &ProgramEntry,
    ) -> BackendResult<(Vec<VertexBufferKey>, Vec<(u64, u64)>)> {
        if program.reflection.vertex_inputs.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
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

        let mut slots: Vec<(VertexBufferKey, (u64, u64))> = Vec::new();
        for input in &program.reflection.vertex_inputs {
            let attribute = layout
                .attributes
                .iter()
                .find(|a| a.location == input.location)
                .ok_or_else(|| {
                    BackendError::InvalidOperation(format!(
                        "layout {:?} has no attribute at location {}",
                        layout.label, input.location
                    ))
                })?;
            if !self.buffers.contains_key(&attribute.buffer.0) {
                return Err(BackendError::InvalidHandle(ResourceKind::Buffer, attribute.buffer.0));
            }
            if attribute.divisor > 1 {
                return Err(BackendError::InvalidOperation(format!(
                    "attribute at location {} has divisor {}, only 0 and 1 are supported",
                    attribute.location, attribute.divisor
                )));
            }
            let format = Self::convert_vertex_format(attribute)?;

            // Attributes that do not fit inside one element get their own slot
            let (base, offset) = if attribute.offset + attribute.element_size() <= attribute.stride {
                (0, attribute.offset)
            } else {
                (attribute.offset, 0)
            };
            let binding = (attribute.buffer.0, base);
            let per_instance = attribute.divisor == 1;
            match slots.iter_mut().find(|(key, b)| {
                *b == binding && key.stride == attribute.stride && key.per_instance == per_instance
            }) {
                Some((key, _)) => key.attributes.push((attribute.location, format, offset)),
                None => slots.push((
                    VertexBufferKey {
                        stride: attribute.stride,
                        per_instance,
                        attributes: vec![(attribute.location, format, offset)],
                    },
                    binding,
                )),
            }
        }
        Ok(slots.into_iter().unzip())
    }

    /// Snapshot the program's current uniform values into group 0
    fn uniform_bind_group(&self, program: &ProgramEntry) -> wgpu::BindGroup {
        let layout = &program.group_layouts[UNIFORM_GROUP as usize];
        if program.reflection.uniforms.is_empty() {
            return self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("uniforms"),
                layout,
                entries: &[],
            });
        }

        let alignment = self.limits.min_uniform_buffer_offset_alignment as usize;
        let mut bytes: Vec<u8> = Vec::new();
        let mut ranges = Vec::with_capacity(program.reflection.uniforms.len());
        for info in &program.reflection.uniforms {
            let value = match program.uniforms.get(&info.name) {
                Some(value) => value.to_uniform_bytes(),
                None => vec![0; Self::padded_uniform_size(info.kind)],
            };
            let offset = bytes.len().div_ceil(alignment) * alignment;
            bytes.resize(offset, 0);
            bytes.extend_from_slice(&value);
            ranges.push((info.binding, offset as u64, value.len() as u64));
        }

        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("uniform snapshot"),
                contents: &bytes,
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let entries: Vec<wgpu::BindGroupEntry> = ranges
            .iter()
            .map(|(binding, offset, size)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: *offset,
                    size: NonZeroU64::new(*size),
                }),
            })
            .collect();
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniforms"),
            layout,
            entries: &entries,
        })
    }

    /// Resolve each declared texture through its unit into group 1
    fn texture_bind_group(&self, program: &ProgramEntry) -> BackendResult<wgpu::BindGroup> {
        let mut entries = Vec::with_capacity(program.reflection.textures.len() * 2);
        for info in &program.reflection.textures {
            let bound = program
                .texture_units
                .get(&info.name)
                .and_then(|unit| self.state.units.get(unit))
                .and_then(|texture| self.textures.get(&texture.0));
            let (view, sampler) = match bound {
                Some(entry) if entry.desc.format.is_depth() => {
                    return Err(BackendError::InvalidOperation(format!(
                        "depth texture {:?} bound to float sampler `{}`",
                        entry.desc.label, info.name
                    )))
                }
                Some(entry) if entry.desc.kind == info.kind => (&entry.view, &entry.sampler),
                Some(entry) => {
                    return Err(BackendError::InvalidOperation(format!(
                        "`{}` samples a {:?} texture but {:?} is {:?}",
                        info.name, info.kind, entry.desc.label, entry.desc.kind
                    )))
                }
                None if info.kind == TextureKind::D2 => (&self.fallback.view, &self.fallback.sampler),
                None => {
                    return Err(BackendError::InvalidOperation(format!(
                        "no {:?} texture bound for `{}`",
                        info.kind, info.name
                    )))
                }
            };
            entries.push(wgpu::BindGroupEntry {
                binding: info.binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
            if let Some(binding) = info.sampler_binding {
                entries.push(wgpu::BindGroupEntry {
                    binding,
                    resource: wgpu::BindingResource::Sampler(sampler),
                });
            }
        }
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("textures"),
            layout: &program.group_layouts[TEXTURE_GROUP as usize],
            entries: &entries,
        }))
    }

    fn ensure_pipeline(&mut self, key: &PipelineKey) -> BackendResult<()> {
        if self.pipelines.contains_key(key) {
            return Ok(());
        }
        let program = self
            .programs
            .get(&key.program)
            .ok_or(BackendError::InvalidHandle(ResourceKind::Program, key.program))?;
        let ProgramModules::Render {
            vertex,
            fragment,
            fragment_outputs,
        } = &program.modules
        else {
            return Err(BackendError::InvalidOperation(format!(
                "program `{}` has no render stages",
                program.label
            )));
        };

        let vertex_attrs: Vec<Vec<wgpu::VertexAttribute>> = key
            .vertex_buffers
            .iter()
            .map(|slot| {
                slot.attributes
                    .iter()
                    .map(|(location, format, offset)| wgpu::VertexAttribute {
                        format: *format,
                        offset: *offset,
                        shader_location: *location,
                    })
                    .collect()
            })
            .collect();
        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = key
            .vertex_buffers
            .iter()
            .zip(vertex_attrs.iter())
            .map(|(slot, attrs)| wgpu::VertexBufferLayout {
                array_stride: slot.stride,
                step_mode: if slot.per_instance {
                    wgpu::VertexStepMode::Instance
                } else {
                    wgpu::VertexStepMode::Vertex
                },
                attributes: attrs,
            })
            .collect();

        let blend = key.blend.map(Self::convert_blend_state);
        let color_targets: Vec<Option<wgpu::ColorTargetState>> = key
            .color_formats
            .iter()
            .enumerate()
            .map(|(index, format)| {
                Some(wgpu::ColorTargetState {
                    format: *format,
                    blend,
                    write_mask: if fragment_outputs.contains(&(index as u32)) {
                        wgpu::ColorWrites::ALL
                    } else {
                        wgpu::ColorWrites::empty()
                    },
                })
            })
            .collect();

        let primitive = wgpu::PrimitiveState {
            topology: Self::convert_topology(key.topology),
            strip_index_format: key.strip_index_format,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: match key.cull_mode {
                CullMode::None => None,
                CullMode::Front => Some(wgpu::Face::Front),
                CullMode::Back => Some(wgpu::Face::Back),
            },
            ..Default::default()
        };

        // Depth writes follow the depth test
        let depth_stencil = key.depth_format.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: key.depth_test,
            depth_compare: if key.depth_test {
                wgpu::CompareFunction::LessEqual
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&program.label),
                layout: Some(&program.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: vertex,
                    entry_point: reflect::entry_point_name(ShaderStage::Vertex),
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: fragment,
                    entry_point: reflect::entry_point_name(ShaderStage::Fragment),
                    targets: &color_targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive,
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::InvalidOperation(format!(
                "pipeline for `{}` rejected: {}",
                program.label, error
            )));
        }

        log::debug!(
            "Created render pipeline for `{}` ({:?}, {} targets)",
            program.label,
            key.topology,
            key.color_formats.len()
        );
        self.pipelines.insert(key.clone(), pipeline);
        Ok(())
    }

    fn queue_draw(
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

        match (program.reflection.kind, self.state.feedback) {
            (ProgramKind::Feedback, Some((feedback, _))) => {
                return self.dispatch_feedback(program_handle, feedback, first, count)
            }
            (ProgramKind::Feedback, None) => {
                return Err(BackendError::InvalidOperation(format!(
                    "feedback program `{}` drawn outside a feedback capture",
                    program.label
                )))
            }
            (ProgramKind::Render, Some(_)) => {
                return Err(BackendError::InvalidOperation(format!(
                    "render program `{}` drawn inside a feedback capture",
                    program.label
                )))
            }
            (ProgramKind::Render, None) => {}
        }

        if self.state.rasterizer_discard || count == 0 || instances == 0 {
            log::trace!("WgpuBackend: skipping draw of `{}`", program.label);
            return Ok(());
        }

        let target = self.current_target();
        let ((target_width, target_height), color_formats, depth_format) =
            self.target_info(target)?;
        let (vertex_buffers, vertex_slots) = self.vertex_bindings(program)?;

        let index_buffer = if indexed {
            let (buffer, format) = self.state.index_buffer.ok_or_else(|| {
                BackendError::InvalidOperation("indexed draw without an index buffer".into())
            })?;
            if !self.buffers.contains_key(&buffer.0) {
                return Err(BackendError::InvalidHandle(ResourceKind::Buffer, buffer.0));
            }
            Some((buffer.0, Self::convert_index_format(format)))
        } else {
            None
        };
        let strip_index_format = match topology {
            PrimitiveTopology::LineStrip | PrimitiveTopology::TriangleStrip => {
                index_buffer.map(|(_, format)| format)
            }
            _ => None,
        };

        let (x, y, width, height) = self.state.viewport;
        let x = x.min(target_width);
        let y = y.min(target_height);
        let viewport = (x, y, width.min(target_width - x), height.min(target_height - y));
        if viewport.2 == 0 || viewport.3 == 0 {
            return Ok(());
        }

        let bind_groups = [
            self.uniform_bind_group(program),
            self.texture_bind_group(program)?,
        ];
        let key = PipelineKey {
            program: program_handle.0,
            topology,
            strip_index_format,
            vertex_buffers,
            color_formats,
            depth_format,
            depth_test: self.state.depth_test,
            cull_mode: self.state.cull_mode,
            blend: self.state.blend,
        };
        self.ensure_pipeline(&key)?;

        self.pass_for(target).draws.push(QueuedDraw {
            pipeline: key,
            bind_groups,
            vertex_buffers: vertex_slots,
            index_buffer,
            viewport,
            range: first..first + count,
            instances,
            indexed,
        });
        Ok(())
    }

    fn dispatch_feedback(
        &mut self,
        program: ProgramHandle,
        feedback: FeedbackHandle,
        first: u32,
        count: u32,
    ) -> BackendResult<()> {
        if count == 0 {
            return Ok(());
        }
        let workgroups = count.div_ceil(FEEDBACK_WORKGROUP_SIZE);
        if workgroups > self.limits.max_compute_workgroups_per_dimension {
            return Err(BackendError::InvalidOperation(format!(
                "{} feedback elements exceed the dispatch limit",
                count
            )));
        }
        // Earlier draws must land before the dispatch reads their buffers
        self.flush_pass();

        let entry = self
            .programs
            .get(&program.0)
            .ok_or(BackendError::InvalidHandle(ResourceKind::Program, program.0))?;
        let ProgramModules::Feedback { pipeline } = &entry.modules else {
            return Err(BackendError::InvalidOperation(format!(
                "program `{}` has no compute stage",
                entry.label
            )));
        };
        let outputs = self
            .feedbacks
            .get(&feedback.0)
            .ok_or(BackendError::InvalidHandle(ResourceKind::Feedback, feedback.0))?;
        let layout = self
            .state
            .vertex_layout
            .and_then(|l| self.vertex_layouts.get(&l.0));
        let storage_alignment = self.limits.min_storage_buffer_offset_alignment as u64;

        let mut input_entries = Vec::with_capacity(entry.reflection.feedback_inputs.len());
        for input in &entry.reflection.feedback_inputs {
            let attribute = layout
                .and_then(|l| l.attributes.iter().find(|a| a.location == input.binding))
                .ok_or_else(|| {
                    BackendError::InvalidOperation(format!(
                        "feedback input `{}` has no bound attribute",
                        input.name
                    ))
                })?;
            let element = input.components as u64 * 4;
            if attribute.stride != element {
                return Err(BackendError::InvalidOperation(format!(
                    "feedback input `{}` must be tightly packed ({} byte stride, {} byte elements)",
                    input.name, attribute.stride, element
                )));
            }
            let offset = attribute.offset + first as u64 * element;
            if offset % storage_alignment != 0 {
                return Err(BackendError::InvalidOperation(format!(
                    "feedback input `{}` starts at unaligned offset {}",
                    input.name, offset
                )));
            }
            let buffer = self
                .buffers
                .get(&attribute.buffer.0)
                .ok_or(BackendError::InvalidHandle(ResourceKind::Buffer, attribute.buffer.0))?;
            let size = count as u64 * element;
            if offset + size > buffer.desc.size {
                return Err(BackendError::InvalidOperation(format!(
                    "feedback input `{}` reads past the end of {:?}",
                    input.name, buffer.desc.label
                )));
            }
            input_entries.push(wgpu::BindGroupEntry {
                binding: input.binding,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer.buffer,
                    offset,
                    size: NonZeroU64::new(size),
                }),
            });
        }

        let mut output_entries = Vec::with_capacity(entry.reflection.feedback_outputs.len());
        for (index, output) in entry.reflection.feedback_outputs.iter().enumerate() {
            let handle = outputs.get(index).ok_or_else(|| {
                BackendError::InvalidOperation(format!(
                    "feedback target has {} buffers but `{}` writes {}",
                    outputs.len(),
                    entry.label,
                    entry.reflection.feedback_outputs.len()
                ))
            })?;
            let buffer = self
                .buffers
                .get(&handle.0)
                .ok_or(BackendError::InvalidHandle(ResourceKind::Buffer, handle.0))?;
            let size = count as u64 * output.components as u64 * 4;
            if size > buffer.desc.size {
                return Err(BackendError::InvalidOperation(format!(
                    "varying `{}` needs {} bytes but {:?} holds {}",
                    output.name, size, buffer.desc.label, buffer.desc.size
                )));
            }
            output_entries.push(wgpu::BindGroupEntry {
                binding: output.binding,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer.buffer,
                    offset: 0,
                    size: NonZeroU64::new(size),
                }),
            });
        }

        let groups = [
            self.uniform_bind_group(entry),
            self.texture_bind_group(entry)?,
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("feedback inputs"),
                layout: &entry.group_layouts[FEEDBACK_INPUT_GROUP as usize],
                entries: &input_entries,
            }),
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("feedback outputs"),
                layout: &entry.group_layouts[FEEDBACK_OUTPUT_GROUP as usize],
                entries: &output_entries,
            }),
        ];

        let encoder = self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                })
        });
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&entry.label),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(pipeline);
            for (index, group) in groups.iter().enumerate() {
                compute_pass.set_bind_group(index as u32, group, &[]);
            }
            compute_pass.dispatch_workgroups(workgroups, 1, 1);
        }
        log::trace!(
            "WgpuBackend: dispatched `{}` over {} elements ({} workgroups)",
            entry.label,
            count,
            workgroups
        );
        Ok(())
    }

    // Resource helpers

    fn allocate_texture(&self, desc: &TextureDescriptor) -> (wgpu::Texture, wgpu::TextureView) {
        let usage = if desc.format.is_depth() {
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT
        } else if desc.render_target {
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::RENDER_ATTACHMENT
        } else {
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC
        };
        let dimension = match desc.kind {
            TextureKind::D2 | TextureKind::Cube => wgpu::TextureDimension::D2,
            TextureKind::D3 => wgpu::TextureDimension::D3,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.kind.layers(desc.depth),
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension,
            format: Self::convert_texture_format(desc.format),
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: desc.label.as_deref(),
            dimension: Some(Self::view_dimension(desc.kind)),
            ..Default::default()
        });
        (texture, view)
    }

    fn allocate_renderbuffer(
        &self,
        desc: &RenderbufferDescriptor,
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width.max(1),
                height: desc.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(desc.format),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    fn create_group_layouts(
        device: &wgpu::Device,
        label: &str,
        reflection: &ProgramReflection,
    ) -> Vec<wgpu::BindGroupLayout> {
        let visibility = match reflection.kind {
            ProgramKind::Render => wgpu::ShaderStages::VERTEX_FRAGMENT,
            ProgramKind::Feedback => wgpu::ShaderStages::COMPUTE,
        };

        let uniforms: Vec<wgpu::BindGroupLayoutEntry> = reflection
            .uniforms
            .iter()
            .map(|u| wgpu::BindGroupLayoutEntry {
                binding: u.binding,
                visibility,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();

        let mut textures = Vec::with_capacity(reflection.textures.len() * 2);
        for texture in &reflection.textures {
            textures.push(wgpu::BindGroupLayoutEntry {
                binding: texture.binding,
                visibility,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: Self::view_dimension(texture.kind),
                    multisampled: false,
                },
                count: None,
            });
            if let Some(binding) = texture.sampler_binding {
                textures.push(wgpu::BindGroupLayoutEntry {
                    binding,
                    visibility,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                });
            }
        }

        let storage = |infos: &[reflect::StorageInfo], read_only: bool| -> Vec<wgpu::BindGroupLayoutEntry> {
            infos
                .iter()
                .map(|s| wgpu::BindGroupLayoutEntry {
                    binding: s.binding,
                    visibility,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                })
                .collect()
        };

        [
            uniforms,
            textures,
            storage(&reflection.feedback_inputs, true),
            storage(&reflection.feedback_outputs, false),
        ]
        .iter()
        .enumerate()
        .map(|(group, entries)| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{} group {}", label, group)),
                entries,
            })
        })
        .collect()
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let (width, height) = Self::clamp_to_limit(width, height, self.limits.max_texture_dimension_2d);
        self.submit();
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
        self.screen_depth = Self::create_screen_depth(&self.device, width, height);
        log::debug!("Resized surface to {}x{}", width, height);
    }

    fn surface_format(&self) -> TextureFormat {
        Self::convert_texture_format_back(self.surface_config.format)
    }

    fn begin_frame(&mut self) -> BackendResult<()> {
        if self.current_texture.is_some() {
            return Err(BackendError::InvalidOperation(
                "begin_frame called twice without end_frame".into(),
            ));
        }
        let output = match self.surface.get_current_texture() {
            Err(wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.surface_config);
                self.surface.get_current_texture()
            }
            other => other,
        }
        .map_err(|e| match e {
            wgpu::SurfaceError::Lost => BackendError::SurfaceLost,
            wgpu::SurfaceError::OutOfMemory => BackendError::OutOfMemory,
            _ => BackendError::AcquireImageFailed(e.to_string()),
        })?;

        self.current_view = Some(
            output
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default()),
        );
        self.current_texture = Some(output);
        Ok(())
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        let Some(texture) = self.current_texture.take() else {
            return Err(BackendError::InvalidOperation(
                "end_frame called without begin_frame".into(),
            ));
        };
        self.submit();
        self.current_view = None;
        texture.present();
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
        if let Some(data) = data {
            if data.len() as u64 > desc.size {
                return Err(BackendError::BufferCreationFailed(format!(
                    "{:?}: {} bytes of data for a {} byte buffer",
                    desc.label,
                    data.len(),
                    desc.size
                )));
            }
        }

        // Vertex buffers double as feedback storage
        let usage = match desc.kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::STORAGE,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
            BufferKind::Uniform => wgpu::BufferUsages::UNIFORM,
        } | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST;

        let padded = desc.size.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT;
        let mut contents = vec![0u8; padded as usize];
        if let Some(data) = data {
            contents[..data.len()].copy_from_slice(data);
        }
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: desc.label.as_deref(),
                contents: &contents,
                usage,
            });

        let id = self.allocate_id();
        log::trace!(
            "WgpuBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        self.buffers.insert(
            id,
            BufferEntry {
                buffer,
                desc: desc.clone(),
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
        let entry = self
            .buffers
            .get(&buffer.0)
            .ok_or(BackendError::InvalidHandle(ResourceKind::Buffer, buffer.0))?;
        let end = offset + data.len() as u64;
        if end > entry.desc.size {
            return Err(BackendError::InvalidOperation(format!(
                "write of {} bytes at {} overflows {:?} ({} bytes)",
                data.len(),
                offset,
                entry.desc.label,
                entry.desc.size
            )));
        }
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 || data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0
        {
            return Err(BackendError::InvalidOperation(format!(
                "write of {} bytes at {} into {:?} is not 4-byte aligned",
                data.len(),
                offset,
                entry.desc.label
            )));
        }
        if data.is_empty() {
            return Ok(());
        }

        // Draws recorded before this write must still see the old contents
        self.submit();
        if let Some(entry) = self.buffers.get(&buffer.0) {
            self.queue.write_buffer(&entry.buffer, offset, data);
        }
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>> {
        if !self.buffers.contains_key(&buffer.0) {
            return Err(BackendError::InvalidHandle(ResourceKind::Buffer, buffer.0));
        }
        self.submit();

        let Some(entry) = self.buffers.get(&buffer.0) else {
            return Err(BackendError::InvalidHandle(ResourceKind::Buffer, buffer.0));
        };
        let size = entry.desc.size;
        let padded = size.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size: padded,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(&entry.buffer, 0, &staging, 0, padded);
        self.queue.submit(std::iter::once(encoder.finish()));

        let (sender, receiver) = std::sync::mpsc::channel();
        staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = sender.send(result);
            });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| BackendError::DeviceLost)?
            .map_err(|e| BackendError::InvalidOperation(format!("buffer map failed: {}", e)))?;

        let mut data = {
            let view = staging.slice(..).get_mapped_range();
            view.to_vec()
        };
        staging.unmap();
        data.truncate(size as usize);
        Ok(data)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        log::trace!("WgpuBackend: destroying buffer {}", buffer.0);
        self.submit();
        if let Some(entry) = self.buffers.remove(&buffer.0) {
            entry.buffer.destroy();
        }
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
        let max = self.limits.max_texture_dimension_2d;
        if desc.width > max || desc.height > max {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: {}x{} exceeds the device limit of {}",
                desc.label, desc.width, desc.height, max
            )));
        }

        let (texture, view) = self.allocate_texture(desc);
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label.as_deref(),
            address_mode_u: Self::convert_address_mode(desc.wrap),
            address_mode_v: Self::convert_address_mode(desc.wrap),
            address_mode_w: Self::convert_address_mode(desc.wrap),
            mag_filter: Self::convert_filter_mode(desc.mag_filter),
            min_filter: Self::convert_filter_mode(desc.min_filter),
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let id = self.allocate_id();
        log::trace!(
            "WgpuBackend: creating texture {:?} ({}x{}x{})",
            desc.label,
            desc.width,
            desc.height,
            desc.depth
        );
        self.textures.insert(
            id,
            TextureEntry {
                texture,
                view,
                sampler,
                desc: desc.clone(),
            },
        );
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        let entry = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::InvalidHandle(ResourceKind::Texture, texture.0))?;
        if entry.desc.format.is_depth() {
            return Err(BackendError::InvalidOperation(format!(
                "depth texture {:?} cannot be uploaded",
                entry.desc.label
            )));
        }
        if data.len() != entry.desc.byte_size() {
            return Err(BackendError::InvalidOperation(format!(
                "texture {:?} expects {} bytes, got {}",
                entry.desc.label,
                entry.desc.byte_size(),
                data.len()
            )));
        }

        self.submit();
        let Some(entry) = self.textures.get(&texture.0) else {
            return Err(BackendError::InvalidHandle(ResourceKind::Texture, texture.0));
        };
        let desc = &entry.desc;
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(desc.width * desc.format.bytes_per_pixel()),
                rows_per_image: Some(desc.height),
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.kind.layers(desc.depth),
            },
        );
        Ok(())
    }

    fn resize_texture(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
    ) -> BackendResult<()> {
        let mut desc = self
            .textures
            .get(&texture.0)
            .map(|t| t.desc.clone())
            .ok_or(BackendError::InvalidHandle(ResourceKind::Texture, texture.0))?;
        desc.width = width.max(1);
        desc.height = height.max(1);
        if desc.kind == TextureKind::Cube {
            desc.height = desc.width;
        }

        self.submit();
        let (new_texture, view) = self.allocate_texture(&desc);
        if let Some(entry) = self.textures.get_mut(&texture.0) {
            entry.texture.destroy();
            entry.texture = new_texture;
            entry.view = view;
            entry.desc = desc;
        }
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        log::trace!("WgpuBackend: destroying texture {}", texture.0);
        self.submit();
        if let Some(entry) = self.textures.remove(&texture.0) {
            entry.texture.destroy();
        }
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
        let (texture, view) = self.allocate_renderbuffer(desc);
        let id = self.allocate_id();
        self.renderbuffers.insert(
            id,
            RenderbufferEntry {
                texture,
                view,
                desc: desc.clone(),
            },
        );
        Ok(RenderbufferHandle(id))
    }

    fn resize_renderbuffer(
        &mut self,
        renderbuffer: RenderbufferHandle,
        width: u32,
        height: u32,
    ) -> BackendResult<()> {
        let mut desc = self
            .renderbuffers
            .get(&renderbuffer.0)
            .map(|r| r.desc.clone())
            .ok_or(BackendError::InvalidHandle(ResourceKind::Renderbuffer, renderbuffer.0))?;
        desc.width = width.max(1);
        desc.height = height.max(1);

        self.submit();
        let (texture, view) = self.allocate_renderbuffer(&desc);
        if let Some(entry) = self.renderbuffers.get_mut(&renderbuffer.0) {
            entry.texture.destroy();
            entry.texture = texture;
            entry.view = view;
            entry.desc = desc;
        }
        Ok(())
    }

    fn destroy_renderbuffer(&mut self, renderbuffer: RenderbufferHandle) {
        self.submit();
        if let Some(entry) = self.renderbuffers.remove(&renderbuffer.0) {
            entry.texture.destroy();
        }
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
        if self.pending.as_ref().map(|p| p.target) == Some(PassTarget::Framebuffer(framebuffer.0)) {
            self.flush_pass();
        }
        let desc = self.framebuffers.get_mut(&framebuffer.0).ok_or(
            BackendError::InvalidHandle(ResourceKind::Framebuffer, framebuffer.0),
        )?;
        desc.width = width.max(1);
        desc.height = height.max(1);
        Ok(())
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.submit();
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
            if !self.buffers.contains_key(&attribute.buffer.0) {
                return Err(BackendError::VertexLayoutCreationFailed(format!(
                    "attribute at location {} references missing buffer {}",
                    attribute.location, attribute.buffer.0
                )));
            }
            Self::convert_vertex_format(attribute)
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
        log::trace!("WgpuBackend: compiled {:?} shader `{}`", stage, label);
        self.shaders.insert(id, info);
        Ok(ShaderHandle(id))
    }

    fn link_program(
        &mut self,
        label: &str,
        shaders: &[ShaderHandle],
        varyings: &[String],
    ) -> BackendResult<(ProgramHandle, ProgramReflection)> {
        let stages = shaders
            .iter()
            .map(|s| {
                self.shaders
                    .get(&s.0)
                    .cloned()
                    .ok_or(BackendError::InvalidHandle(ResourceKind::Shader, s.0))
            })
            .collect::<BackendResult<Vec<_>>>()?;
        let stage_refs: Vec<&ShaderModuleInfo> = stages.iter().collect();
        let reflection =
            reflect::link(&stage_refs, varyings).map_err(BackendError::ProgramLinkFailed)?;

        let group_layouts = Self::create_group_layouts(&self.device, label, &reflection);
        let group_count = match reflection.kind {
            ProgramKind::Render => 2,
            ProgramKind::Feedback => 4,
        };
        let layout_refs: Vec<&wgpu::BindGroupLayout> = group_layouts.iter().take(group_count).collect();
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &layout_refs,
                push_constant_ranges: &[],
            });

        let create_module = |info: &ShaderModuleInfo| {
            self.device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(info.source.as_str().into()),
                })
        };
        let find = |stage: ShaderStage| {
            stages
                .iter()
                .find(|s| s.stage == stage)
                .ok_or_else(|| BackendError::ProgramLinkFailed(format!("missing {:?} stage", stage)))
        };

        let used = match reflection.kind {
            ProgramKind::Render => vec![find(ShaderStage::Vertex)?, find(ShaderStage::Fragment)?],
            ProgramKind::Feedback => vec![find(ShaderStage::Compute)?],
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let modules = match reflection.kind {
            ProgramKind::Render => {
                let (vertex, fragment) = (used[0], used[1]);
                ProgramModules::Render {
                    vertex: create_module(vertex),
                    fragment: create_module(fragment),
                    fragment_outputs: fragment.outputs.iter().map(|o| o.location).collect(),
                }
            }
            ProgramKind::Feedback => {
                let module = create_module(used[0]);
                let pipeline = self
                    .device
                    .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some(label),
                        layout: Some(&pipeline_layout),
                        module: &module,
                        entry_point: reflect::entry_point_name(ShaderStage::Compute),
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    });
                ProgramModules::Feedback { pipeline }
            }
        };
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::ProgramLinkFailed(error.to_string()));
        }

        let id = self.allocate_id();
        log::debug!("Linked {:?} program `{}` ({})", reflection.kind, label, id);
        self.programs.insert(
            id,
            ProgramEntry {
                label: label.to_string(),
                reflection: reflection.clone(),
                modules,
                group_layouts,
                pipeline_layout,
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
        self.submit();
        self.programs.remove(&program.0);
        self.pipelines.retain(|key, _| key.program != program.0);
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
    }

    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) -> BackendResult<()> {
        let target = self.current_target();
        self.target_info(target)?;
        match self.pending.as_mut() {
            // Nothing drawn yet, fold into the pass's load operations
            Some(pending) if pending.target == target && pending.draws.is_empty() => {
                if color.is_some() {
                    pending.clear_color = color;
                }
                if depth.is_some() {
                    pending.clear_depth = depth;
                }
            }
            _ => {
                self.flush_pass();
                self.pending = Some(PendingPass {
                    target,
                    clear_color: color,
                    clear_depth: depth,
                    draws: Vec::new(),
                });
            }
        }
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
        let entry = self
            .programs
            .get_mut(&program.0)
            .ok_or(BackendError::InvalidHandle(ResourceKind::Program, program.0))?;
        match entry.reflection.uniform(name) {
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
                    entry.label, name
                )))
            }
        }
        entry.uniforms.insert(name.to_string(), *value);
        Ok(())
    }

    fn set_texture_unit(
        &mut self,
        program: ProgramHandle,
        name: &str,
        unit: u32,
    ) -> BackendResult<()> {
        let entry = self
            .programs
            .get_mut(&program.0)
            .ok_or(BackendError::InvalidHandle(ResourceKind::Program, program.0))?;
        if entry.reflection.texture(name).is_none() {
            return Err(BackendError::InvalidOperation(format!(
                "program `{}` has no texture `{}`",
                entry.label, name
            )));
        }
        if let Some((other, _)) = entry
            .texture_units
            .iter()
            .find(|(n, u)| **u == unit && n.as_str() != name)
        {
            return Err(BackendError::InvalidOperation(format!(
                "texture unit {} already used by `{}`",
                unit, other
            )));
        }
        entry.texture_units.insert(name.to_string(), unit);
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
        self.queue_draw(topology, first, count, instances, false)
    }

    fn draw_indexed(
        &mut self,
        topology: PrimitiveTopology,
        first: u32,
        count: u32,
        instances: u32,
    ) -> BackendResult<()> {
        self.queue_draw(topology, first, count, instances, true)
    }

    fn create_feedback(&mut self, buffers: &[BufferHandle]) -> BackendResult<FeedbackHandle> {
        for buffer in buffers {
            let entry = self
                .buffers
                .get(&buffer.0)
                .ok_or(BackendError::InvalidHandle(ResourceKind::Buffer, buffer.0))?;
            if entry.desc.kind != BufferKind::Vertex {
                return Err(BackendError::InvalidOperation(format!(
                    "feedback can only capture into vertex buffers, {:?} is {:?}",
                    entry.desc.label, entry.desc.kind
                )));
            }
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

    #[test]
    fn test_clamp_to_limit_keeps_aspect() {
        assert_eq!(WgpuBackend::clamp_to_limit(800, 600, 8192), (800, 600));
        assert_eq!(WgpuBackend::clamp_to_limit(16384, 8192, 8192), (8192, 4096));
        assert_eq!(WgpuBackend::clamp_to_limit(0, 0, 8192), (1, 1));
    }

    #[test]
    fn test_vertex_format_mapping() {
        let mut attribute = VertexAttribute {
            location: 0,
            buffer: BufferHandle(1),
            components: 3,
            component_type: ComponentType::F32,
            normalized: false,
            stride: 12,
            offset: 0,
            divisor: 0,
        };
        assert_eq!(
            WgpuBackend::convert_vertex_format(&attribute).unwrap(),
            wgpu::VertexFormat::Float32x3
        );
        attribute.component_type = ComponentType::U8;
        attribute.components = 4;
        attribute.normalized = true;
        assert_eq!(
            WgpuBackend::convert_vertex_format(&attribute).unwrap(),
            wgpu::VertexFormat::Unorm8x4
        );
        attribute.components = 3;
        assert!(WgpuBackend::convert_vertex_format(&attribute).is_err());
    }

    #[test]
    fn test_padded_uniform_sizes() {
        assert_eq!(WgpuBackend::padded_uniform_size(UniformKind::Vec3), 16);
        assert_eq!(
            WgpuBackend::padded_uniform_size(UniformKind::Mat3),
            UniformValue::Mat3(glam::Mat3::IDENTITY).to_uniform_bytes().len()
        );
    }
}
