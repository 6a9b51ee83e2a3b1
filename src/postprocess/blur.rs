//! Separable gaussian blur and bright-pass extraction

use glam::Vec2;

/// Axis a single blur pass runs along; a full blur chains both
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlurDirection {
    Horizontal,
    Vertical,
}

impl BlurDirection {
    pub fn vector(self) -> Vec2 {
        match self {
            BlurDirection::Horizontal => Vec2::X,
            BlurDirection::Vertical => Vec2::Y,
        }
    }
}

/// Largest kernel half-width in texels the blur shader honors
pub const MAX_BLUR_RADIUS: f32 = 32.0;

/// One-dimensional gaussian; `u_radius` is in pixels and is converted to
/// texels through `u_resolution`, so the blur keeps its on-screen size
/// when the pipeline is resized
pub const GAUSSIAN_BLUR_FRAGMENT_SHADER: &str = r#"
@group(0) @binding(0) var<uniform> u_resolution: vec2<f32>;
@group(0) @binding(1) var<uniform> u_direction: vec2<f32>;
@group(0) @binding(2) var<uniform> u_radius: f32;
@group(1) @binding(0) var u_texture: texture_2d<f32>;
@group(1) @binding(1) var u_texture_sampler: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let texel = u_direction / max(u_resolution, vec2<f32>(1.0));
    let radius = i32(ceil(clamp(u_radius, 0.0, 32.0)));
    let sigma = max(u_radius * 0.5, 0.001);

    var sum = vec4<f32>(0.0);
    var weight_sum = 0.0;
    for (var i = -radius; i <= radius; i = i + 1) {
        let x = f32(i);
        let weight = exp(-(x * x) / (2.0 * sigma * sigma));
        sum = sum + textureSampleLevel(u_texture, u_texture_sampler, uv + texel * x, 0.0) * weight;
        weight_sum = weight_sum + weight;
    }
    return sum / weight_sum;
}
"#;

/// Keeps pixels brighter than `u_threshold`, with a soft knee
pub const BRIGHT_PASS_FRAGMENT_SHADER: &str = r#"
@group(0) @binding(0) var<uniform> u_threshold: f32;
@group(1) @binding(0) var u_texture: texture_2d<f32>;
@group(1) @binding(1) var u_texture_sampler: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let color = textureSample(u_texture, u_texture_sampler, uv);
    let luminance = dot(color.rgb, vec3<f32>(0.2126, 0.7152, 0.0722));
    let weight = max(luminance - u_threshold, 0.0) / max(luminance, 0.0001);
    return vec4<f32>(color.rgb * weight, 1.0);
}
"#;
