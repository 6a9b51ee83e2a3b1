//! Tonemapping post-processing

/// Tonemapping operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TonemapOperator {
    Reinhard,
    #[default]
    Aces,
    Uncharted2,
    None,
}

impl TonemapOperator {
    /// Value of `u_operator` selecting this operator in the shader
    pub fn shader_id(self) -> u32 {
        match self {
            TonemapOperator::Reinhard => 0,
            TonemapOperator::Aces => 1,
            TonemapOperator::Uncharted2 => 2,
            TonemapOperator::None => 3,
        }
    }
}

pub const TONEMAPPING_FRAGMENT_SHADER: &str = r#"
@group(0) @binding(0) var<uniform> u_exposure: f32;
@group(0) @binding(1) var<uniform> u_gamma: f32;
@group(0) @binding(2) var<uniform> u_operator: u32;
@group(1) @binding(0) var u_texture: texture_2d<f32>;
@group(1) @binding(1) var u_texture_sampler: sampler;

fn aces_tonemap(color: vec3<f32>) -> vec3<f32> {
    let a = 2.51;
    let b = 0.03;
    let c = 2.43;
    let d = 0.59;
    let e = 0.14;
    return saturate((color * (a * color + b)) / (color * (c * color + d) + e));
}

fn reinhard_tonemap(color: vec3<f32>) -> vec3<f32> {
    return color / (color + vec3<f32>(1.0));
}

fn uncharted2_partial(x: vec3<f32>) -> vec3<f32> {
    let a = 0.15;
    let b = 0.50;
    let c = 0.10;
    let d = 0.20;
    let e = 0.02;
    let f = 0.30;
    return ((x * (a * x + c * b) + d * e) / (x * (a * x + b) + d * f)) - e / f;
}

fn uncharted2_tonemap(color: vec3<f32>) -> vec3<f32> {
    let white = vec3<f32>(11.2);
    return saturate(uncharted2_partial(color * 2.0) / uncharted2_partial(white));
}

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let sampled = textureSample(u_texture, u_texture_sampler, uv);
    let color = sampled.rgb * u_exposure;

    var mapped: vec3<f32>;
    switch u_operator {
        case 0u: { mapped = reinhard_tonemap(color); }
        case 1u: { mapped = aces_tonemap(color); }
        case 2u: { mapped = uncharted2_tonemap(color); }
        default: { mapped = saturate(color); }
    }

    let gamma_corrected = pow(mapped, vec3<f32>(1.0 / max(u_gamma, 0.001)));
    return vec4<f32>(gamma_corrected, sampled.a);
}
"#;
