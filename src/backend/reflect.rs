//! WGSL front end shared by all backends
//!
//! Shaders are parsed and validated with naga, then reflected into the
//! binding conventions the engine relies on:
//!
//! - `@group(0)`: named uniforms, one `var<uniform>` per name
//! - `@group(1)`: textures, each paired with a sampler named `<texture>_sampler`
//! - `@group(2)`: feedback inputs, `var<storage, read>` arrays bound at the
//!   attribute location
//! - `@group(3)`: feedback outputs, `var<storage, read_write>` arrays in
//!   varying order
//!
//! Render programs use the entry points `vs_main` and `fs_main`; feedback
//! programs use `cs_main`.

use std::collections::BTreeMap;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{AddressSpace, Binding, ImageDimension, Module, ScalarKind, StorageAccess, TypeInner};

use crate::backend::types::{ShaderStage, TextureKind, UniformKind};

pub const UNIFORM_GROUP: u32 = 0;
pub const TEXTURE_GROUP: u32 = 1;
pub const FEEDBACK_INPUT_GROUP: u32 = 2;
pub const FEEDBACK_OUTPUT_GROUP: u32 = 3;

/// Invocations per workgroup for feedback programs
pub const FEEDBACK_WORKGROUP_SIZE: u32 = 64;

/// Suffix that pairs a sampler with its texture
pub const SAMPLER_SUFFIX: &str = "_sampler";

pub fn entry_point_name(stage: ShaderStage) -> &'static str {
    match stage {
        ShaderStage::Vertex => "vs_main",
        ShaderStage::Fragment => "fs_main",
        ShaderStage::Compute => "cs_main",
    }
}

/// A named uniform declared in group 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformInfo {
    pub name: String,
    pub kind: UniformKind,
    pub binding: u32,
}

/// A texture declared in group 1 with its paired sampler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureInfo {
    pub name: String,
    pub binding: u32,
    pub kind: TextureKind,
    pub sampler_binding: Option<u32>,
}

/// A storage array used by a feedback program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageInfo {
    pub name: String,
    pub binding: u32,
    /// Scalar components per element
    pub components: u32,
}

/// A location-bound stage input or output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationInfo {
    pub location: u32,
    pub components: u32,
}

/// Reflection of one validated shader stage
#[derive(Debug, Clone)]
pub struct ShaderModuleInfo {
    pub stage: ShaderStage,
    pub source: String,
    pub has_entry_point: bool,
    pub uniforms: Vec<UniformInfo>,
    pub textures: Vec<TextureInfo>,
    pub storage_inputs: Vec<StorageInfo>,
    pub storage_outputs: Vec<StorageInfo>,
    pub inputs: Vec<LocationInfo>,
    pub outputs: Vec<LocationInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    Render,
    Feedback,
}

/// Everything a backend needs to know about a linked program
#[derive(Debug, Clone)]
pub struct ProgramReflection {
    pub kind: ProgramKind,
    pub uniforms: Vec<UniformInfo>,
    pub textures: Vec<TextureInfo>,
    pub vertex_inputs: Vec<LocationInfo>,
    pub feedback_inputs: Vec<StorageInfo>,
    pub feedback_outputs: Vec<StorageInfo>,
}

impl ProgramReflection {
    pub fn uniform(&self, name: &str) -> Option<&UniformInfo> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn texture(&self, name: &str) -> Option<&TextureInfo> {
        self.textures.iter().find(|t| t.name == name)
    }

    pub fn has_uniform(&self, name: &str) -> bool {
        self.uniform(name).is_some()
    }
}

/// Parse, validate and reflect a single stage. The error is the compiler log.
pub fn compile(stage: ShaderStage, source: &str) -> Result<ShaderModuleInfo, String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;

    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    validator
        .validate(&module)
        .map_err(|e| e.emit_to_string(source))?;

    let mut info = ShaderModuleInfo {
        stage,
        source: source.to_string(),
        has_entry_point: false,
        uniforms: Vec::new(),
        textures: Vec::new(),
        storage_inputs: Vec::new(),
        storage_outputs: Vec::new(),
        inputs: Vec::new(),
        outputs: Vec::new(),
    };

    reflect_globals(&module, &mut info)?;
    reflect_entry_point(&module, &mut info);

    Ok(info)
}

fn reflect_globals(module: &Module, info: &mut ShaderModuleInfo) -> Result<(), String> {
    let mut samplers: BTreeMap<String, u32> = BTreeMap::new();

    for (_, global) in module.global_variables.iter() {
        let (Some(name), Some(binding)) = (&global.name, &global.binding) else {
            continue;
        };
        let inner = &module.types[global.ty].inner;

        match (global.space, binding.group) {
            (AddressSpace::Uniform, UNIFORM_GROUP) => {
                let kind = uniform_kind(inner)
                    .ok_or_else(|| format!("uniform `{name}` has an unsupported type"))?;
                info.uniforms.push(UniformInfo {
                    name: name.clone(),
                    kind,
                    binding: binding.binding,
                });
            }
            (AddressSpace::Handle, TEXTURE_GROUP) => match inner {
                TypeInner::Image { dim, .. } => {
                    let kind = match dim {
                        ImageDimension::D2 => TextureKind::D2,
                        ImageDimension::Cube => TextureKind::Cube,
                        ImageDimension::D3 => TextureKind::D3,
                        ImageDimension::D1 => {
                            return Err(format!("texture `{name}`: 1D textures are not supported"))
                        }
                    };
                    info.textures.push(TextureInfo {
                        name: name.clone(),
                        binding: binding.binding,
                        kind,
                        sampler_binding: None,
                    });
                }
                TypeInner::Sampler { .. } => {
                    samplers.insert(name.clone(), binding.binding);
                }
                _ => {}
            },
            (AddressSpace::Storage { access }, group)
                if group == FEEDBACK_INPUT_GROUP || group == FEEDBACK_OUTPUT_GROUP =>
            {
                let components = storage_components(module, inner).ok_or_else(|| {
                    format!("storage array `{name}` must hold f32, vec2<f32> or vec4<f32>")
                })?;
                let storage = StorageInfo {
                    name: name.clone(),
                    binding: binding.binding,
                    components,
                };
                if group == FEEDBACK_OUTPUT_GROUP {
                    if !access.contains(StorageAccess::STORE) {
                        return Err(format!("feedback output `{name}` must be read_write"));
                    }
                    info.storage_outputs.push(storage);
                } else {
                    info.storage_inputs.push(storage);
                }
            }
            _ => {}
        }
    }

    for texture in &mut info.textures {
        texture.sampler_binding = samplers
            .get(&format!("{}{}", texture.name, SAMPLER_SUFFIX))
            .copied();
    }
    info.uniforms.sort_by_key(|u| u.binding);
    info.textures.sort_by_key(|t| t.binding);
    info.storage_inputs.sort_by_key(|s| s.binding);
    info.storage_outputs.sort_by_key(|s| s.binding);
    Ok(())
}

fn reflect_entry_point(module: &Module, info: &mut ShaderModuleInfo) {
    let wanted = entry_point_name(info.stage);
    let Some(entry) = module.entry_points.iter().find(|e| e.name == wanted) else {
        return;
    };
    info.has_entry_point = true;

    for argument in &entry.function.arguments {
        collect_locations(module, argument.binding.as_ref(), argument.ty, &mut info.inputs);
    }
    if let Some(result) = &entry.function.result {
        collect_locations(module, result.binding.as_ref(), result.ty, &mut info.outputs);
    }
    info.inputs.sort_by_key(|l| l.location);
    info.outputs.sort_by_key(|l| l.location);
}

fn collect_locations(
    module: &Module,
    binding: Option<&Binding>,
    ty: naga::Handle<naga::Type>,
    out: &mut Vec<LocationInfo>,
) {
    let inner = &module.types[ty].inner;
    match binding {
        Some(Binding::Location { location, .. }) => out.push(LocationInfo {
            location: *location,
            components: value_components(inner),
        }),
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let TypeInner::Struct { members, .. } = inner {
                for member in members {
                    collect_locations(module, member.binding.as_ref(), member.ty, out);
                }
            }
        }
    }
}

fn value_components(inner: &TypeInner) -> u32 {
    match inner {
        TypeInner::Vector { size, .. } => *size as u32,
        _ => 1,
    }
}

fn uniform_kind(inner: &TypeInner) -> Option<UniformKind> {
    match inner {
        TypeInner::Scalar(scalar) => match scalar.kind {
            ScalarKind::Float => Some(UniformKind::Float),
            ScalarKind::Sint => Some(UniformKind::Int),
            ScalarKind::Uint => Some(UniformKind::UInt),
            _ => None,
        },
        TypeInner::Vector { size, scalar } => match (scalar.kind, *size as u8) {
            (ScalarKind::Float, 2) => Some(UniformKind::Vec2),
            (ScalarKind::Float, 3) => Some(UniformKind::Vec3),
            (ScalarKind::Float, 4) => Some(UniformKind::Vec4),
            (ScalarKind::Sint, 2) => Some(UniformKind::IVec2),
            (ScalarKind::Sint, 3) => Some(UniformKind::IVec3),
            (ScalarKind::Sint, 4) => Some(UniformKind::IVec4),
            _ => None,
        },
        TypeInner::Matrix { columns, rows, .. } => match (*columns as u8, *rows as u8) {
            (3, 3) => Some(UniformKind::Mat3),
            (4, 4) => Some(UniformKind::Mat4),
            _ => None,
        },
        _ => None,
    }
}

fn storage_components(module: &Module, inner: &TypeInner) -> Option<u32> {
    let TypeInner::Array { base, .. } = inner else {
        return None;
    };
    match &module.types[*base].inner {
        TypeInner::Scalar(scalar) if scalar.kind == ScalarKind::Float => Some(1),
        TypeInner::Vector { size, scalar } if scalar.kind == ScalarKind::Float => {
            match *size as u32 {
                3 => None,
                n => Some(n),
            }
        }
        _ => None,
    }
}

/// Link validated stages into a program. The error is the linker log.
pub fn link(stages: &[&ShaderModuleInfo], varyings: &[String]) -> Result<ProgramReflection, String> {
    let find = |stage: ShaderStage| stages.iter().find(|s| s.stage == stage).copied();

    for stage in stages {
        if !stage.has_entry_point {
            return Err(format!(
                "{:?} stage has no `{}` entry point",
                stage.stage,
                entry_point_name(stage.stage)
            ));
        }
    }

    let uniforms = merge_uniforms(stages)?;
    let textures = merge_textures(stages)?;

    if let Some(compute) = find(ShaderStage::Compute) {
        if stages.len() != 1 {
            return Err("a feedback program has exactly one compute stage".to_string());
        }
        for (index, varying) in varyings.iter().enumerate() {
            let output = compute
                .storage_outputs
                .iter()
                .find(|s| &s.name == varying)
                .ok_or_else(|| format!("varying `{varying}` is not a feedback output"))?;
            if output.binding != index as u32 {
                return Err(format!(
                    "varying `{varying}` is bound at {} but captured at index {index}",
                    output.binding
                ));
            }
        }
        if compute.storage_outputs.len() != varyings.len() {
            return Err(format!(
                "{} feedback outputs declared but {} varyings captured",
                compute.storage_outputs.len(),
                varyings.len()
            ));
        }
        return Ok(ProgramReflection {
            kind: ProgramKind::Feedback,
            uniforms,
            textures,
            vertex_inputs: Vec::new(),
            feedback_inputs: compute.storage_inputs.clone(),
            feedback_outputs: compute.storage_outputs.clone(),
        });
    }

    let vertex = find(ShaderStage::Vertex).ok_or("program has no vertex stage")?;
    let fragment = find(ShaderStage::Fragment).ok_or("program has no fragment stage")?;
    if !varyings.is_empty() {
        return Err("render programs cannot capture varyings".to_string());
    }

    for input in &fragment.inputs {
        match vertex.outputs.iter().find(|o| o.location == input.location) {
            Some(output) if output.components == input.components => {}
            Some(output) => {
                return Err(format!(
                    "location {} is written with {} components but read with {}",
                    input.location, output.components, input.components
                ))
            }
            None => {
                return Err(format!(
                    "fragment input at location {} is not written by the vertex stage",
                    input.location
                ))
            }
        }
    }

    Ok(ProgramReflection {
        kind: ProgramKind::Render,
        uniforms,
        textures,
        vertex_inputs: vertex.inputs.clone(),
        feedback_inputs: Vec::new(),
        feedback_outputs: Vec::new(),
    })
}

fn merge_uniforms(stages: &[&ShaderModuleInfo]) -> Result<Vec<UniformInfo>, String> {
    let mut merged: Vec<UniformInfo> = Vec::new();
    for uniform in stages.iter().flat_map(|s| s.uniforms.iter()) {
        match merged.iter().find(|u| u.name == uniform.name) {
            Some(existing) if existing == uniform => {}
            Some(existing) => {
                return Err(format!(
                    "uniform `{}` declared as {:?}@{} and {:?}@{}",
                    uniform.name, existing.kind, existing.binding, uniform.kind, uniform.binding
                ))
            }
            None => {
                if let Some(clash) = merged.iter().find(|u| u.binding == uniform.binding) {
                    return Err(format!(
                        "uniforms `{}` and `{}` share binding {}",
                        clash.name, uniform.name, uniform.binding
                    ));
                }
                merged.push(uniform.clone());
            }
        }
    }
    merged.sort_by_key(|u| u.binding);
    Ok(merged)
}

fn merge_textures(stages: &[&ShaderModuleInfo]) -> Result<Vec<TextureInfo>, String> {
    let mut merged: Vec<TextureInfo> = Vec::new();
    for texture in stages.iter().flat_map(|s| s.textures.iter()) {
        if texture.sampler_binding.is_none() {
            return Err(format!(
                "texture `{}` has no `{}{}` sampler",
                texture.name, texture.name, SAMPLER_SUFFIX
            ));
        }
        match merged.iter().find(|t| t.name == texture.name) {
            Some(existing) if existing == texture => {}
            Some(_) => return Err(format!("texture `{}` declared differently", texture.name)),
            None => merged.push(texture.clone()),
        }
    }
    merged.sort_by_key(|t| t.binding);
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: &str = r#"
@group(0) @binding(0) var<uniform> u_mvp: mat4x4<f32>;

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(2) uv: vec2<f32>) -> VsOut {
    var out: VsOut;
    out.position = u_mvp * vec4<f32>(position, 1.0);
    out.uv = uv;
    return out;
}
"#;

    const FS: &str = r#"
@group(0) @binding(1) var<uniform> u_tint: vec4<f32>;
@group(1) @binding(0) var u_texture: texture_2d<f32>;
@group(1) @binding(1) var u_texture_sampler: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(u_texture, u_texture_sampler, uv) * u_tint;
}
"#;

    #[test]
    fn test_reflect_render_program() {
        let vs = compile(ShaderStage::Vertex, VS).unwrap();
        let fs = compile(ShaderStage::Fragment, FS).unwrap();
        assert_eq!(vs.inputs.len(), 2);
        assert_eq!(vs.inputs[1], LocationInfo { location: 2, components: 2 });

        let program = link(&[&vs, &fs], &[]).unwrap();
        assert_eq!(program.kind, ProgramKind::Render);
        assert_eq!(program.uniform("u_mvp").unwrap().kind, UniformKind::Mat4);
        assert_eq!(program.uniform("u_tint").unwrap().binding, 1);
        let texture = program.texture("u_texture").unwrap();
        assert_eq!(texture.sampler_binding, Some(1));
        assert_eq!(texture.kind, TextureKind::D2);
    }

    #[test]
    fn test_compile_error_carries_log() {
        let err = compile(ShaderStage::Vertex, "fn vs_main( {").unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn test_link_missing_varying_input() {
        let vs = compile(ShaderStage::Vertex, VS).unwrap();
        let fs_src = r#"
@fragment
fn fs_main(@location(3) color: vec4<f32>) -> @location(0) vec4<f32> {
    return color;
}
"#;
        let fs = compile(ShaderStage::Fragment, fs_src).unwrap();
        assert!(link(&[&vs, &fs], &[]).is_err());
    }

    #[test]
    fn test_reflect_feedback_program() {
        let src = r#"
@group(0) @binding(0) var<uniform> u_dt: f32;
@group(2) @binding(0) var<storage, read> in_position: array<vec4<f32>>;
@group(3) @binding(0) var<storage, read_write> out_position: array<vec4<f32>>;

@compute @workgroup_size(64)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if (i >= arrayLength(&out_position)) {
        return;
    }
    out_position[i] = in_position[i] + vec4<f32>(u_dt);
}
"#;
        let cs = compile(ShaderStage::Compute, src).unwrap();
        let program = link(&[&cs], &["out_position".to_string()]).unwrap();
        assert_eq!(program.kind, ProgramKind::Feedback);
        assert_eq!(program.feedback_inputs[0].components, 4);
        assert!(link(&[&cs], &["out_velocity".to_string()]).is_err());
    }
}
