//! A single post-processing stage

use glam::Vec2;

use super::blur::{BlurDirection, BRIGHT_PASS_FRAGMENT_SHADER, GAUSSIAN_BLUR_FRAGMENT_SHADER};
use super::tonemapping::{TonemapOperator, TONEMAPPING_FRAGMENT_SHADER};
use crate::backend::{PrimitiveTopology, UniformValue};
use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::program::{Program, COPY_FRAGMENT_SHADER, FULLSCREEN_VERTEX_SHADER};
use crate::resources::{Framebuffer, Texture};

/// Name of the texture every pass samples its input through
pub const PASS_INPUT_TEXTURE: &str = "u_texture";

/// Uniform receiving the pipeline size in pixels
pub const RESOLUTION_UNIFORM: &str = "u_resolution";

/// Which built-in a pass was created from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Copy,
    Tonemapping,
    GaussianBlur,
    BrightPass,
    Custom,
}

/// A full-screen triangle drawn through its own program
///
/// Parameters are plain uniforms re-applied before every draw; the
/// program's uniform cache keeps unchanged ones from reaching the device.
#[derive(Debug)]
pub struct Pass {
    name: String,
    kind: PassKind,
    program: Program,
    params: Vec<(String, UniformValue)>,
    enabled: bool,
    render_to_screen: bool,
    halted: Option<String>,
}

impl Pass {
    fn build(
        ctx: &mut RenderContext,
        name: &str,
        kind: PassKind,
        fragment_source: &str,
    ) -> RenderResult<Self> {
        let program = Program::new(ctx, name, FULLSCREEN_VERTEX_SHADER, fragment_source)?;
        Ok(Self {
            name: name.to_string(),
            kind,
            program,
            params: Vec::new(),
            enabled: true,
            render_to_screen: false,
            halted: None,
        })
    }

    /// Pass-through of the input texture
    pub fn copy(ctx: &mut RenderContext) -> RenderResult<Self> {
        Self::build(ctx, "copy", PassKind::Copy, COPY_FRAGMENT_SHADER)
    }

    pub fn tonemapping(
        ctx: &mut RenderContext,
        operator: TonemapOperator,
        exposure: f32,
        gamma: f32,
    ) -> RenderResult<Self> {
        let mut pass = Self::build(ctx, "tonemapping", PassKind::Tonemapping, TONEMAPPING_FRAGMENT_SHADER)?;
        pass.set_param("u_exposure", exposure)?;
        pass.set_param("u_gamma", gamma)?;
        pass.set_param("u_operator", operator.shader_id())?;
        Ok(pass)
    }

    /// One axis of a gaussian blur with a radius in pixels
    pub fn gaussian_blur(
        ctx: &mut RenderContext,
        direction: BlurDirection,
        radius_px: f32,
    ) -> RenderResult<Self> {
        let name = match direction {
            BlurDirection::Horizontal => "blur_horizontal",
            BlurDirection::Vertical => "blur_vertical",
        };
        let mut pass = Self::build(ctx, name, PassKind::GaussianBlur, GAUSSIAN_BLUR_FRAGMENT_SHADER)?;
        pass.set_param("u_direction", direction.vector())?;
        pass.set_param("u_radius", radius_px)?;
        Ok(pass)
    }

    pub fn bright_pass(ctx: &mut RenderContext, threshold: f32) -> RenderResult<Self> {
        let mut pass = Self::build(ctx, "bright_pass", PassKind::BrightPass, BRIGHT_PASS_FRAGMENT_SHADER)?;
        pass.set_param("u_threshold", threshold)?;
        Ok(pass)
    }

    /// A pass from user WGSL; the fragment stage receives `uv` at location 0
    /// and may sample `u_texture`
    pub fn custom(ctx: &mut RenderContext, name: &str, fragment_source: &str) -> RenderResult<Self> {
        Self::build(ctx, name, PassKind::Custom, fragment_source)
    }

    /// Rename the pass; names must be unique within a pipeline. The program
    /// keeps the label it was built with.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Mark this pass as the one rasterizing to the screen
    pub fn to_screen(mut self) -> Self {
        self.render_to_screen = true;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set a parameter uniform, applied on the next draw
    pub fn set_param(&mut self, name: &str, value: impl Into<UniformValue>) -> RenderResult<()> {
        let value = value.into();
        let info = self.program.reflection().uniform(name).ok_or_else(|| {
            RenderError::InvalidOperation(format!("pass `{}` has no parameter `{}`", self.name, name))
        })?;
        if info.kind != value.kind() {
            return Err(RenderError::UniformTypeMismatch {
                name: name.to_string(),
                expected: info.kind,
                found: value.kind(),
            });
        }
        match self.params.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.params.push((name.to_string(), value)),
        }
        Ok(())
    }

    pub fn param(&self, name: &str) -> Option<UniformValue> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    /// Forward the pipeline size to passes that declare `u_resolution`
    pub(crate) fn set_resolution(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if self.program.has_uniform(RESOLUTION_UNIFORM) {
            self.set_param(RESOLUTION_UNIFORM, Vec2::new(width as f32, height as f32))?;
        }
        Ok(())
    }

    /// Draw one full-screen triangle sampling `override_input` if given,
    /// else `read`'s first color attachment
    ///
    /// Off-screen passes bind `write` as the target and unbind it after;
    /// screen passes draw to the default target. A failed draw halts the
    /// pass; every later call reports [`RenderError::PassHalted`].
    pub fn draw(
        &mut self,
        ctx: &mut RenderContext,
        read: &Framebuffer,
        write: &Framebuffer,
        override_input: Option<&Texture>,
        to_screen: bool,
    ) -> RenderResult<()> {
        if let Some(reason) = &self.halted {
            return Err(RenderError::PassHalted {
                name: self.name.clone(),
                reason: reason.clone(),
            });
        }

        let result = self.draw_unchecked(ctx, read, write, override_input, to_screen);
        if let Err(err) = &result {
            log::error!("Post-processing pass `{}` halted: {}", self.name, err);
            self.halted = Some(err.to_string());
        }
        result
    }

    fn draw_unchecked(
        &mut self,
        ctx: &mut RenderContext,
        read: &Framebuffer,
        write: &Framebuffer,
        override_input: Option<&Texture>,
        to_screen: bool,
    ) -> RenderResult<()> {
        if to_screen {
            ctx.bind_framebuffer(None)?;
            let (width, height) = ctx.surface_size();
            ctx.set_viewport(0, 0, width, height);
        } else {
            write.bind(ctx)?;
        }

        if self.program.has_texture(PASS_INPUT_TEXTURE) {
            let input = match override_input {
                Some(texture) => texture,
                None => read.color_texture(0).ok_or_else(|| {
                    RenderError::InvalidOperation(format!(
                        "framebuffer `{}` has no color attachment",
                        read.label()
                    ))
                })?,
            };
            self.program.set_texture(ctx, PASS_INPUT_TEXTURE, input)?;
        }
        for (name, value) in &self.params {
            self.program.set_uniform(ctx, name, *value)?;
        }

        self.program.bind(ctx)?;
        ctx.bind_vertex_layout(None)?;
        ctx.draw(PrimitiveTopology::TriangleList, 0, 3, 1)?;
        log::trace!(
            "Pass `{}` drew to {}",
            self.name,
            if to_screen { "screen" } else { write.label() }
        );

        if !to_screen {
            write.unbind(ctx)?;
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PassKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn renders_to_screen(&self) -> bool {
        self.render_to_screen
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut Program {
        &mut self.program
    }

    pub fn destroy(self, ctx: &mut RenderContext) -> RenderResult<()> {
        self.program.destroy(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UniformKind;

    #[test]
    fn test_builtin_params() {
        let mut ctx = RenderContext::headless(64, 64);
        let pass = Pass::tonemapping(&mut ctx, TonemapOperator::Reinhard, 1.5, 2.2).unwrap();
        assert_eq!(pass.kind(), PassKind::Tonemapping);
        assert_eq!(pass.param("u_operator"), Some(UniformValue::UInt(0)));
        assert_eq!(pass.param("u_exposure"), Some(UniformValue::Float(1.5)));

        let blur = Pass::gaussian_blur(&mut ctx, BlurDirection::Vertical, 4.0).unwrap();
        assert_eq!(blur.name(), "blur_vertical");
        assert!(blur.program().has_uniform(RESOLUTION_UNIFORM));
    }

    #[test]
    fn test_set_param_checks_declaration_and_type() {
        let mut ctx = RenderContext::headless(64, 64);
        let mut pass = Pass::bright_pass(&mut ctx, 0.8).unwrap();
        assert!(matches!(
            pass.set_param("u_missing", 1.0f32),
            Err(RenderError::InvalidOperation(_))
        ));
        assert!(matches!(
            pass.set_param("u_threshold", 1u32),
            Err(RenderError::UniformTypeMismatch {
                expected: UniformKind::Float,
                ..
            })
        ));
        pass.set_param("u_threshold", 0.5f32).unwrap();
        assert_eq!(pass.param("u_threshold"), Some(UniformValue::Float(0.5)));
    }
}
