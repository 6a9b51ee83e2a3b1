//! Shader programs
//!
//! A [`Program`] owns its compiled stages and caches two maps: the last value
//! written for each uniform (identical writes never reach the device) and the
//! texture unit assigned to each sampler name (assigned once, rebound on
//! every call).

mod shaders;
mod uniform;

pub use shaders::*;
pub use uniform::*;

use crate::backend::{
    ProgramHandle, ProgramKind, ProgramReflection, ShaderHandle, ShaderStage, UniformValue,
};
use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::resources::Texture;

/// A linked program plus its uniform and texture-unit caches
#[derive(Debug)]
pub struct Program {
    handle: ProgramHandle,
    label: String,
    shaders: Vec<ShaderHandle>,
    reflection: ProgramReflection,
    uniforms: UniformCache,
    texture_units: TextureUnits,
}

impl Program {
    /// Compile and link a render program from vertex and fragment sources
    pub fn new(
        ctx: &mut RenderContext,
        label: &str,
        vertex_source: &str,
        fragment_source: &str,
    ) -> RenderResult<Self> {
        Self::build(
            ctx,
            label,
            &[
                (ShaderStage::Vertex, vertex_source),
                (ShaderStage::Fragment, fragment_source),
            ],
            &[],
        )
    }

    /// Compile and link a feedback program capturing `varyings` in order
    pub fn feedback(
        ctx: &mut RenderContext,
        label: &str,
        compute_source: &str,
        varyings: &[&str],
    ) -> RenderResult<Self> {
        let varyings: Vec<String> = varyings.iter().map(|v| v.to_string()).collect();
        Self::build(ctx, label, &[(ShaderStage::Compute, compute_source)], &varyings)
    }

    fn build(
        ctx: &mut RenderContext,
        label: &str,
        stages: &[(ShaderStage, &str)],
        varyings: &[String],
    ) -> RenderResult<Self> {
        let mut shaders = Vec::with_capacity(stages.len());
        for (stage, source) in stages {
            match ctx.compile_shader(*stage, label, source) {
                Ok(shader) => shaders.push(shader),
                Err(err) => {
                    release_shaders(ctx, &shaders);
                    log::error!("{}", err);
                    return Err(err);
                }
            }
        }

        let (handle, reflection) = match ctx.link_program(label, &shaders, varyings) {
            Ok(linked) => linked,
            Err(err) => {
                release_shaders(ctx, &shaders);
                log::error!("{}", err);
                return Err(err);
            }
        };

        Ok(Self {
            handle,
            label: label.to_string(),
            shaders,
            reflection,
            uniforms: UniformCache::default(),
            texture_units: TextureUnits::default(),
        })
    }

    /// Make this the current program
    pub fn bind(&self, ctx: &mut RenderContext) -> RenderResult<()> {
        ctx.use_program(Some(self.handle))
    }

    /// Set a named uniform
    ///
    /// Returns `true` when a write reached the device. Values bit-identical to
    /// the cached one, and names the program does not declare, return `false`.
    pub fn set_uniform(
        &mut self,
        ctx: &mut RenderContext,
        name: &str,
        value: impl Into<UniformValue>,
    ) -> RenderResult<bool> {
        let value = value.into();
        let Some(info) = self.reflection.uniform(name) else {
            log::trace!("Program `{}` ignores unknown uniform `{}`", self.label, name);
            return Ok(false);
        };
        if info.kind != value.kind() {
            return Err(RenderError::UniformTypeMismatch {
                name: name.to_string(),
                expected: info.kind,
                found: value.kind(),
            });
        }
        if !self.uniforms.needs_write(name, &value) {
            return Ok(false);
        }

        self.bind(ctx)?;
        ctx.set_uniform(self.handle, name, &value)?;
        self.uniforms.store(name, value);
        Ok(true)
    }

    /// Bind `texture` to the unit assigned to `name`, assigning the next free
    /// unit the first time `name` is seen. Returns the unit.
    pub fn set_texture(
        &mut self,
        ctx: &mut RenderContext,
        name: &str,
        texture: &Texture,
    ) -> RenderResult<u32> {
        let info = self.reflection.texture(name).ok_or_else(|| {
            RenderError::InvalidOperation(format!(
                "program `{}` has no texture `{}`",
                self.label, name
            ))
        })?;
        if info.kind != texture.kind() {
            return Err(RenderError::InvalidOperation(format!(
                "texture `{}` of program `{}` is {:?}, got {:?}",
                name,
                self.label,
                info.kind,
                texture.kind()
            )));
        }

        let unit = match self.texture_units.get(name) {
            Some(unit) => unit,
            None => {
                let unit = self.texture_units.next_free();
                if unit >= ctx.config().max_texture_units {
                    return Err(RenderError::InvalidOperation(format!(
                        "program `{}` ran out of texture units at `{}`",
                        self.label, name
                    )));
                }
                self.bind(ctx)?;
                ctx.set_texture_unit(self.handle, name, unit)?;
                self.texture_units.assign(name)
            }
        };

        ctx.active_texture(unit)?;
        ctx.bind_texture(Some(texture.handle()))?;
        Ok(unit)
    }

    /// Unit assigned to a texture name, if it has been set before
    pub fn texture_unit(&self, name: &str) -> Option<u32> {
        self.texture_units.get(name)
    }

    pub fn has_uniform(&self, name: &str) -> bool {
        self.reflection.has_uniform(name)
    }

    pub fn has_texture(&self, name: &str) -> bool {
        self.reflection.texture(name).is_some()
    }

    /// Last value written for a uniform
    pub fn cached_uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(name)
    }

    pub fn reflection(&self) -> &ProgramReflection {
        &self.reflection
    }

    pub fn is_feedback(&self) -> bool {
        self.reflection.kind == ProgramKind::Feedback
    }

    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn destroy(self, ctx: &mut RenderContext) -> RenderResult<()> {
        ctx.destroy_program(self.handle)?;
        for shader in self.shaders {
            ctx.destroy_shader(shader)?;
        }
        Ok(())
    }
}

fn release_shaders(ctx: &mut RenderContext, shaders: &[ShaderHandle]) {
    for shader in shaders {
        if let Err(err) = ctx.destroy_shader(*shader) {
            log::warn!("Failed to release shader {}: {}", shader.id(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UniformKind;

    #[test]
    fn test_compile_error_carries_stage_and_label() {
        let mut ctx = RenderContext::headless(8, 8);
        let err = Program::new(&mut ctx, "broken", SCENE_VERTEX_SHADER, "fn fs_main( {").unwrap_err();
        match err {
            RenderError::ShaderCompile { label, stage, log } => {
                assert_eq!(label, "broken");
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(!log.is_empty());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_link_error() {
        let mut ctx = RenderContext::headless(8, 8);
        let fragment = r#"
@fragment
fn fs_main(@location(5) tint: vec4<f32>) -> @location(0) vec4<f32> {
    return tint;
}
"#;
        let err = Program::new(&mut ctx, "mismatch", SCENE_VERTEX_SHADER, fragment).unwrap_err();
        assert!(matches!(err, RenderError::ProgramLink { .. }));
    }

    #[test]
    fn test_uniform_type_mismatch() {
        let mut ctx = RenderContext::headless(8, 8);
        let mut program =
            Program::new(&mut ctx, "lambert", SCENE_VERTEX_SHADER, LAMBERT_FRAGMENT_SHADER).unwrap();
        let err = program.set_uniform(&mut ctx, "u_color", 1.0f32).unwrap_err();
        assert!(matches!(
            err,
            RenderError::UniformTypeMismatch {
                expected: UniformKind::Vec4,
                found: UniformKind::Float,
                ..
            }
        ));
        assert!(!program.set_uniform(&mut ctx, "u_missing", 1.0f32).unwrap());
    }
}
