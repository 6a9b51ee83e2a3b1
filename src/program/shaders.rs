//! Built-in WGSL sources

/// Vertex stage for scene geometry at the standard attribute locations
pub const SCENE_VERTEX_SHADER: &str = r#"
@group(0) @binding(0) var<uniform> u_model: mat4x4<f32>;
@group(0) @binding(1) var<uniform> u_view: mat4x4<f32>;
@group(0) @binding(2) var<uniform> u_projection: mat4x4<f32>;
@group(0) @binding(3) var<uniform> u_normal_matrix: mat3x3<f32>;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) normal: vec3<f32>,
    @location(1) uv: vec2<f32>,
}

@vertex
fn vs_main(
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
) -> VertexOutput {
    var output: VertexOutput;
    output.position = u_projection * u_view * u_model * vec4<f32>(position, 1.0);
    output.normal = normalize(u_normal_matrix * normal);
    output.uv = uv;
    return output;
}
"#;

/// Lambert shading with a flat color
pub const LAMBERT_FRAGMENT_SHADER: &str = r#"
@group(0) @binding(4) var<uniform> u_color: vec4<f32>;
@group(0) @binding(5) var<uniform> u_light_direction: vec3<f32>;

@fragment
fn fs_main(@location(0) normal: vec3<f32>, @location(1) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let n_dot_l = max(dot(normalize(normal), -normalize(u_light_direction)), 0.0);
    let ambient = 0.15;
    return vec4<f32>(u_color.rgb * (ambient + (1.0 - ambient) * n_dot_l), u_color.a);
}
"#;

/// Unlit textured surface, tinted by `u_color`
pub const TEXTURED_FRAGMENT_SHADER: &str = r#"
@group(0) @binding(4) var<uniform> u_color: vec4<f32>;
@group(1) @binding(0) var u_texture: texture_2d<f32>;
@group(1) @binding(1) var u_texture_sampler: sampler;

@fragment
fn fs_main(@location(0) normal: vec3<f32>, @location(1) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(u_texture, u_texture_sampler, uv) * u_color;
}
"#;

/// Full-screen triangle generated from the vertex index; no vertex inputs
pub const FULLSCREEN_VERTEX_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var output: VertexOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);
    return output;
}
"#;

/// Samples `u_texture` unchanged
pub const COPY_FRAGMENT_SHADER: &str = r#"
@group(1) @binding(0) var u_texture: texture_2d<f32>;
@group(1) @binding(1) var u_texture_sampler: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(u_texture, u_texture_sampler, uv);
}
"#;
