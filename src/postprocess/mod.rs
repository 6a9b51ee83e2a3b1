//! Post-processing pipeline
//!
//! The scene renders into the pipeline's read framebuffer between
//! [`Pipeline::begin`] and [`Pipeline::end`]. `end` then runs each enabled
//! pass in order, every pass sampling the read framebuffer and writing the
//! other one, swapping the two after each pass. At most one pass renders
//! to the screen and it must come last.

mod blur;
mod pass;
mod tonemapping;

pub use blur::*;
pub use pass::*;
pub use tonemapping::*;

use crate::backend::{CullMode, TextureFormat};
use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::resources::{DepthMode, Framebuffer, FramebufferOptions, Texture, TextureOptions};

/// Ping-pong target configuration
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub color_format: TextureFormat,
    pub depth: DepthMode,
    pub clear_color: [f32; 4],
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            color_format: TextureFormat::Rgba16Float,
            depth: DepthMode::Renderbuffer,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl PipelineOptions {
    pub fn with_color_format(mut self, format: TextureFormat) -> Self {
        self.color_format = format;
        self
    }

    pub fn with_depth(mut self, depth: DepthMode) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }
}

/// Ordered passes over two ping-pong framebuffers
#[derive(Debug)]
pub struct Pipeline {
    framebuffers: [Framebuffer; 2],
    read: usize,
    passes: Vec<Pass>,
    options: PipelineOptions,
    width: u32,
    height: u32,
}

impl Pipeline {
    pub fn new(
        ctx: &mut RenderContext,
        width: u32,
        height: u32,
        options: PipelineOptions,
    ) -> RenderResult<Self> {
        let target = |label: &str| {
            FramebufferOptions::default()
                .with_label(label)
                .with_color(TextureOptions::default().with_format(options.color_format))
                .with_depth(options.depth)
        };
        let ping = Framebuffer::new(ctx, width, height, target("pipeline ping"))?;
        let pong = match Framebuffer::new(ctx, width, height, target("pipeline pong")) {
            Ok(pong) => pong,
            Err(err) => {
                if let Err(cleanup) = ping.destroy(ctx) {
                    log::warn!("Failed to release ping framebuffer: {}", cleanup);
                }
                return Err(err);
            }
        };
        log::info!(
            "Created post-processing pipeline {}x{} ({:?})",
            width,
            height,
            options.color_format
        );

        Ok(Self {
            framebuffers: [ping, pong],
            read: 0,
            passes: Vec::new(),
            options,
            width,
            height,
        })
    }

    /// Append a pass
    ///
    /// Rejects duplicate names, a second screen pass, and any pass after
    /// the screen pass.
    pub fn add_pass(&mut self, mut pass: Pass) -> RenderResult<()> {
        if self.pass(pass.name()).is_some() {
            return Err(RenderError::InvalidOperation(format!(
                "pipeline already has a pass named `{}`",
                pass.name()
            )));
        }
        if let Some(screen) = self.passes.iter().find(|p| p.renders_to_screen()) {
            let message = if pass.renders_to_screen() {
                format!(
                    "`{}` cannot render to screen, `{}` already does",
                    pass.name(),
                    screen.name()
                )
            } else {
                format!(
                    "`{}` cannot follow screen pass `{}`",
                    pass.name(),
                    screen.name()
                )
            };
            return Err(RenderError::InvalidOperation(message));
        }

        pass.set_resolution(self.width, self.height)?;
        log::debug!("Added post-processing pass `{}`", pass.name());
        self.passes.push(pass);
        Ok(())
    }

    pub fn pass(&self, name: &str) -> Option<&Pass> {
        self.passes.iter().find(|p| p.name() == name)
    }

    pub fn pass_mut(&mut self, name: &str) -> Option<&mut Pass> {
        self.passes.iter_mut().find(|p| p.name() == name)
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> RenderResult<()> {
        let pass = self
            .pass_mut(name)
            .ok_or_else(|| RenderError::InvalidOperation(format!("no pass named `{}`", name)))?;
        pass.set_enabled(enabled);
        Ok(())
    }

    /// Enable depth test and back-face culling, then bind and clear the
    /// read framebuffer for scene draws
    pub fn begin(&mut self, ctx: &mut RenderContext) -> RenderResult<()> {
        ctx.set_depth_test(true);
        ctx.set_cull_mode(CullMode::Back);
        self.framebuffers[self.read].clear(ctx, self.options.clear_color)
    }

    /// Run every enabled pass on the scene just rendered
    pub fn end(&mut self, ctx: &mut RenderContext) -> RenderResult<()> {
        self.run(ctx, None)
    }

    /// Like [`Pipeline::end`], but the first executed pass samples
    /// `input` instead of the read framebuffer
    pub fn end_with_override(&mut self, ctx: &mut RenderContext, input: &Texture) -> RenderResult<()> {
        self.run(ctx, Some(input))
    }

    fn run(&mut self, ctx: &mut RenderContext, mut input: Option<&Texture>) -> RenderResult<()> {
        self.framebuffers[self.read].unbind(ctx)?;
        ctx.set_depth_test(false);
        ctx.set_cull_mode(CullMode::None);

        for pass in self.passes.iter_mut().filter(|p| p.is_enabled()) {
            let [first, second] = &self.framebuffers;
            let (read, write) = if self.read == 0 {
                (first, second)
            } else {
                (second, first)
            };
            let to_screen = pass.renders_to_screen();
            pass.draw(ctx, read, write, input.take(), to_screen)?;
            self.read ^= 1;
        }
        Ok(())
    }

    /// Resize both framebuffers and forward the size to every pass
    pub fn resize(&mut self, ctx: &mut RenderContext, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidOperation(format!(
                "pipeline cannot be resized to {}x{}",
                width, height
            )));
        }
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        for framebuffer in &mut self.framebuffers {
            framebuffer.resize(ctx, width, height)?;
        }
        for pass in &mut self.passes {
            pass.set_resolution(width, height)?;
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Framebuffer the scene renders into during the next `begin`/`end`
    pub fn read_framebuffer(&self) -> &Framebuffer {
        &self.framebuffers[self.read]
    }

    /// Color texture holding the most recent result; after an off-screen
    /// chain this is the last pass's output
    pub fn output_texture(&self) -> Option<&Texture> {
        self.framebuffers[self.read].color_texture(0)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn destroy(self, ctx: &mut RenderContext) -> RenderResult<()> {
        for pass in self.passes {
            pass.destroy(ctx)?;
        }
        let [ping, pong] = self.framebuffers;
        ping.destroy(ctx)?;
        pong.destroy(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DrawTarget, HeadlessBackend};

    #[test]
    fn test_rejects_second_screen_pass() {
        let mut ctx = RenderContext::headless(32, 32);
        let mut pipeline = Pipeline::new(&mut ctx, 32, 32, PipelineOptions::default()).unwrap();
        pipeline.add_pass(Pass::copy(&mut ctx).unwrap().to_screen()).unwrap();

        let second = Pass::copy(&mut ctx).unwrap().with_name("again").to_screen();
        assert!(matches!(
            pipeline.add_pass(second),
            Err(RenderError::InvalidOperation(_))
        ));
        let after = Pass::bright_pass(&mut ctx, 1.0).unwrap();
        assert!(pipeline.add_pass(after).is_err());
    }

    #[test]
    fn test_off_screen_chain_swaps_each_pass() {
        let mut ctx = RenderContext::headless(32, 32);
        let mut pipeline = Pipeline::new(&mut ctx, 32, 32, PipelineOptions::default()).unwrap();
        pipeline.add_pass(Pass::copy(&mut ctx).unwrap()).unwrap();
        pipeline
            .add_pass(Pass::copy(&mut ctx).unwrap().with_name("copy2"))
            .unwrap();

        let first = pipeline.read_framebuffer().handle();
        pipeline.begin(&mut ctx).unwrap();
        pipeline.end(&mut ctx).unwrap();

        // Two swaps put the original read target back in front
        assert_eq!(pipeline.read_framebuffer().handle(), first);
        let backend = ctx.backend::<HeadlessBackend>().unwrap();
        let targets: Vec<DrawTarget> = backend.draws().iter().map(|d| d.target).collect();
        assert_eq!(targets.len(), 2);
        assert_ne!(targets[0], targets[1]);
        assert_eq!(targets[1], DrawTarget::Framebuffer(first));
        assert_eq!(backend.bound_framebuffer(), None);
    }

    #[test]
    fn test_resize_forwards_resolution() {
        let mut ctx = RenderContext::headless(32, 32);
        let mut pipeline = Pipeline::new(&mut ctx, 32, 32, PipelineOptions::default()).unwrap();
        pipeline
            .add_pass(Pass::gaussian_blur(&mut ctx, BlurDirection::Horizontal, 3.0).unwrap())
            .unwrap();
        pipeline.resize(&mut ctx, 64, 48).unwrap();

        let pass = pipeline.pass("blur_horizontal").unwrap();
        assert_eq!(
            pass.param(RESOLUTION_UNIFORM),
            Some(crate::backend::UniformValue::Vec2(glam::Vec2::new(64.0, 48.0)))
        );
        assert_eq!(pipeline.read_framebuffer().size(), (64, 48));
    }
}
