//! Main engine orchestrator

use std::sync::Arc;

use winit::window::Window as WinitWindow;

use crate::backend::{CullMode, HeadlessBackend, WgpuBackend};
use crate::context::{ContextConfig, RenderContext};
use crate::error::RenderResult;
use crate::postprocess::{Pipeline, PipelineOptions};
use crate::scene::{Camera, SceneGraph};
use crate::simulation::Simulation;

/// Backend selection for the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// wgpu backend rendering into a window
    #[default]
    Wgpu,
    /// In-memory backend that records commands instead of executing them
    Headless,
}

/// Configuration for initializing the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Window title
    pub title: String,
    /// Initial surface width
    pub width: u32,
    /// Initial surface height
    pub height: u32,
    pub backend: BackendType,
    pub vsync: bool,
    /// Clear color of the scene target
    pub clear_color: [f32; 4],
    /// Render through a post-processing pipeline with these options
    pub post_processing: Option<PipelineOptions>,
    pub context: ContextConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Render Engine".to_string(),
            width: 1280,
            height: 720,
            backend: BackendType::Wgpu,
            vsync: true,
            clear_color: [0.05, 0.05, 0.08, 1.0],
            post_processing: None,
            context: ContextConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_post_processing(mut self, options: PipelineOptions) -> Self {
        self.post_processing = Some(options);
        self
    }

    pub fn with_context(mut self, context: ContextConfig) -> Self {
        self.context = context;
        self
    }
}

/// Per-frame driver composing the post-processing pipeline, a scene graph
/// and any number of simulations
pub struct Engine {
    ctx: RenderContext,
    pipeline: Option<Pipeline>,
    config: EngineConfig,
    width: u32,
    height: u32,
}

impl Engine {
    /// Create an engine on the wgpu backend rendering into `window`
    pub fn new(window: Arc<WinitWindow>, config: EngineConfig) -> RenderResult<Self> {
        let backend = WgpuBackend::new(window, config.vsync)?;
        let ctx = RenderContext::new(Box::new(backend), config.context.clone());
        Self::with_context(ctx, config)
    }

    /// Create an engine on the headless backend
    pub fn headless(config: EngineConfig) -> RenderResult<Self> {
        let backend = HeadlessBackend::new(config.width, config.height);
        let ctx = RenderContext::new(Box::new(backend), config.context.clone());
        Self::with_context(ctx, config)
    }

    /// Create an engine around an existing context
    pub fn with_context(mut ctx: RenderContext, config: EngineConfig) -> RenderResult<Self> {
        // The surface may have been clamped to device limits
        let (width, height) = ctx.surface_size();
        let pipeline = match &config.post_processing {
            Some(options) => Some(Pipeline::new(
                &mut ctx,
                width,
                height,
                options.clone().with_clear_color(config.clear_color),
            )?),
            None => None,
        };
        log::info!(
            "Engine `{}` ready: {}x{} on {}{}",
            config.title,
            width,
            height,
            ctx.backend_name(),
            if pipeline.is_some() {
                " with post-processing"
            } else {
                ""
            }
        );

        Ok(Self {
            ctx,
            pipeline,
            config,
            width,
            height,
        })
    }

    /// Render one frame
    ///
    /// Simulations step before the scene draws and are drawn after it, so
    /// the scene's depth buffer occludes them. With a post-processing
    /// pipeline the frame reaches the screen only through a screen pass.
    pub fn render_frame(
        &mut self,
        scene: &mut SceneGraph,
        camera: &Camera,
        simulations: &mut [&mut Simulation],
    ) -> RenderResult<()> {
        self.ctx.begin_frame()?;

        match self.pipeline.as_mut() {
            Some(pipeline) => pipeline.begin(&mut self.ctx)?,
            None => {
                self.ctx.bind_framebuffer(None)?;
                self.ctx.set_viewport(0, 0, self.width, self.height);
                self.ctx.set_depth_test(true);
                self.ctx.set_cull_mode(CullMode::Back);
                self.ctx.clear(Some(self.config.clear_color), Some(1.0))?;
            }
        }

        for simulation in simulations.iter_mut() {
            simulation.compute_step(&mut self.ctx)?;
        }

        scene.update_world_matrices();
        let drawn = scene.draw_all(&mut self.ctx, camera)?;

        // Simulations render both faces of their sprites
        if !simulations.is_empty() {
            self.ctx.set_cull_mode(CullMode::None);
            for simulation in simulations.iter_mut() {
                simulation.draw_step(&mut self.ctx, camera)?;
            }
        }

        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.end(&mut self.ctx)?;
        }

        self.ctx.end_frame()?;
        log::trace!(
            "Frame {} drew {} nodes and {} simulations",
            self.ctx.frame_index(),
            drawn,
            simulations.len()
        );
        Ok(())
    }

    /// Resize the surface and the pipeline targets; cameras are resized by
    /// the host
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.ctx.resize_surface(width, height);
        let (width, height) = self.ctx.surface_size();
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.resize(&mut self.ctx, width, height)?;
        }
        self.width = width;
        self.height = height;
        log::debug!("Engine resized to {}x{}", width, height);
        Ok(())
    }

    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut RenderContext {
        &mut self.ctx
    }

    pub fn pipeline(&self) -> Option<&Pipeline> {
        self.pipeline.as_ref()
    }

    /// Pipeline and context together, for adding or tuning passes
    pub fn pipeline_mut(&mut self) -> Option<(&mut Pipeline, &mut RenderContext)> {
        self.pipeline.as_mut().map(|p| (p, &mut self.ctx))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn backend_type(&self) -> BackendType {
        self.config.backend
    }

    /// Release the pipeline's targets and passes
    pub fn shutdown(mut self) -> RenderResult<RenderContext> {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.destroy(&mut self.ctx)?;
        }
        Ok(self.ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DrawTarget, HeadlessBackend};
    use crate::postprocess::Pass;

    fn headless_config() -> EngineConfig {
        EngineConfig::default()
            .with_backend(BackendType::Headless)
            .with_size(64, 48)
    }

    #[test]
    fn test_empty_frame_clears_screen() {
        let mut engine = Engine::headless(headless_config()).unwrap();
        let mut scene = SceneGraph::new();
        let camera = Camera::default();
        engine.render_frame(&mut scene, &camera, &mut []).unwrap();

        assert_eq!(engine.context().frame_index(), 1);
        let backend = engine.context().backend::<HeadlessBackend>().unwrap();
        assert_eq!(backend.clears().len(), 1);
        assert_eq!(backend.clears()[0].target, DrawTarget::Screen);
        assert!(backend.draws().is_empty());
    }

    #[test]
    fn test_post_processing_reaches_screen() {
        let config = headless_config().with_post_processing(PipelineOptions::default());
        let mut engine = Engine::headless(config).unwrap();
        {
            let (pipeline, ctx) = engine.pipeline_mut().unwrap();
            let pass = Pass::copy(ctx).unwrap().to_screen();
            pipeline.add_pass(pass).unwrap();
        }
        let mut scene = SceneGraph::new();
        engine
            .render_frame(&mut scene, &Camera::default(), &mut [])
            .unwrap();

        let backend = engine.context().backend::<HeadlessBackend>().unwrap();
        let last = backend.draws().last().unwrap();
        assert_eq!(last.target, DrawTarget::Screen);
    }

    #[test]
    fn test_resize_propagates_to_pipeline() {
        let config = headless_config().with_post_processing(PipelineOptions::default());
        let mut engine = Engine::headless(config).unwrap();
        engine.resize(128, 96).unwrap();
        assert_eq!(engine.dimensions(), (128, 96));
        assert_eq!(engine.pipeline().unwrap().size(), (128, 96));
        assert_eq!(engine.context().surface_size(), (128, 96));
    }
}
