//! Particle system built on [`Simulation`]

use glam::{Vec3, Vec4};

use super::{Simulation, SimulationAttribute, SimulationDescriptor};
use crate::backend::{HeadlessBackend, KernelInvocation, UniformValue};
use crate::context::RenderContext;
use crate::error::RenderResult;
use crate::scene::Camera;

pub const PARTICLE_COMPUTE_SHADER: &str = r#"
@group(0) @binding(0) var<uniform> u_dt: f32;
@group(0) @binding(1) var<uniform> u_time: f32;
@group(0) @binding(2) var<uniform> u_gravity: vec3<f32>;
@group(0) @binding(3) var<uniform> u_emitter: vec3<f32>;
@group(0) @binding(4) var<uniform> u_lifetime: f32;
@group(0) @binding(5) var<uniform> u_speed: f32;

@group(2) @binding(0) var<storage, read> in_position: array<vec4<f32>>;
@group(2) @binding(1) var<storage, read> in_velocity: array<vec4<f32>>;
@group(2) @binding(2) var<storage, read> in_life: array<f32>;

@group(3) @binding(0) var<storage, read_write> out_position: array<vec4<f32>>;
@group(3) @binding(1) var<storage, read_write> out_velocity: array<vec4<f32>>;
@group(3) @binding(2) var<storage, read_write> out_life: array<f32>;

fn hash(n: u32) -> f32 {
    var x = n;
    x = (x ^ 61u) ^ (x >> 16u);
    x = x * 9u;
    x = x ^ (x >> 4u);
    x = x * 0x27d4eb2du;
    x = x ^ (x >> 15u);
    return f32(x) / 4294967295.0;
}

@compute @workgroup_size(64)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if (i >= arrayLength(&out_life)) {
        return;
    }

    var position = in_position[i].xyz;
    var velocity = in_velocity[i].xyz;
    var life = in_life[i] - u_dt;

    if (life <= 0.0) {
        let seed = i * 1973u + u32(u_time * 1000.0) * 9277u;
        let direction = normalize(vec3<f32>(
            hash(seed) * 2.0 - 1.0,
            1.0 + hash(seed + 1u),
            hash(seed + 2u) * 2.0 - 1.0,
        ));
        velocity = direction * u_speed * (0.5 + hash(seed + 3u));
        position = u_emitter;
        life = u_lifetime * (0.5 + 0.5 * hash(seed + 4u));
    } else {
        velocity = velocity + u_gravity * u_dt;
        position = position + velocity * u_dt;
    }

    out_position[i] = vec4<f32>(position, 1.0);
    out_velocity[i] = vec4<f32>(velocity, 0.0);
    out_life[i] = life;
}
"#;

pub const PARTICLE_VERTEX_SHADER: &str = r#"
@group(0) @binding(0) var<uniform> u_view: mat4x4<f32>;
@group(0) @binding(1) var<uniform> u_projection: mat4x4<f32>;
@group(0) @binding(2) var<uniform> u_lifetime: f32;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) fade: f32,
}

@vertex
fn vs_main(@location(0) position: vec4<f32>, @location(2) life: f32) -> VertexOutput {
    var output: VertexOutput;
    output.position = u_projection * u_view * vec4<f32>(position.xyz, 1.0);
    output.fade = clamp(life / max(u_lifetime, 0.001), 0.0, 1.0);
    return output;
}
"#;

pub const PARTICLE_FRAGMENT_SHADER: &str = r#"
@group(0) @binding(3) var<uniform> u_color: vec4<f32>;

@fragment
fn fs_main(@location(0) fade: f32) -> @location(0) vec4<f32> {
    return vec4<f32>(u_color.rgb * fade, u_color.a * fade);
}
"#;

/// Emitter settings
#[derive(Debug, Clone)]
pub struct ParticleConfig {
    pub count: u32,
    pub emitter: Vec3,
    pub gravity: Vec3,
    /// Longest particle lifetime in seconds
    pub lifetime: f32,
    /// Launch speed in units per second
    pub speed: f32,
    pub color: Vec4,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            count: 10_000,
            emitter: Vec3::ZERO,
            gravity: Vec3::new(0.0, -9.81, 0.0),
            lifetime: 3.0,
            speed: 5.0,
            color: Vec4::new(1.0, 0.6, 0.2, 1.0),
        }
    }
}

impl ParticleConfig {
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_emitter(mut self, emitter: Vec3) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_lifetime(mut self, lifetime: f32) -> Self {
        self.lifetime = lifetime;
        self
    }
}

/// Fountain of particles advanced entirely on the GPU
///
/// Particles start at the emitter with staggered lifetimes so they respawn
/// over the first lifetime rather than all at once.
#[derive(Debug)]
pub struct ParticleSystem {
    simulation: Simulation,
    config: ParticleConfig,
    time: f32,
}

impl ParticleSystem {
    pub fn new(ctx: &mut RenderContext, config: ParticleConfig) -> RenderResult<Self> {
        let count = config.count as usize;
        let positions: Vec<f32> = (0..count).flat_map(|_| config.emitter.extend(1.0).to_array()).collect();
        let velocities = vec![0.0; count * 4];
        let lives: Vec<f32> = (0..count)
            .map(|i| config.lifetime * i as f32 / count.max(1) as f32)
            .collect();

        let desc = SimulationDescriptor::new("particles", config.count, PARTICLE_COMPUTE_SHADER)
            .with_attribute(SimulationAttribute::new("position", 0, 4), positions)
            .with_attribute(SimulationAttribute::new("velocity", 1, 4), velocities)
            .with_attribute(SimulationAttribute::new("life", 2, 1), lives)
            .with_render(PARTICLE_VERTEX_SHADER, PARTICLE_FRAGMENT_SHADER);
        let simulation = Simulation::new(ctx, desc)?;

        Ok(Self {
            simulation,
            config,
            time: 0.0,
        })
    }

    /// Advance every particle by `dt` seconds
    pub fn update(&mut self, ctx: &mut RenderContext, dt: f32) -> RenderResult<()> {
        self.prepare(ctx, dt)?;
        self.simulation.compute_step(ctx)
    }

    /// Upload the uniforms for a step of `dt` seconds without running it,
    /// for hosts that step the simulation themselves (see `Engine::render_frame`)
    pub fn prepare(&mut self, ctx: &mut RenderContext, dt: f32) -> RenderResult<()> {
        self.time += dt;
        let program = self.simulation.compute_program_mut();
        program.set_uniform(ctx, "u_dt", dt)?;
        program.set_uniform(ctx, "u_time", self.time)?;
        program.set_uniform(ctx, "u_gravity", self.config.gravity)?;
        program.set_uniform(ctx, "u_emitter", self.config.emitter)?;
        program.set_uniform(ctx, "u_lifetime", self.config.lifetime)?;
        program.set_uniform(ctx, "u_speed", self.config.speed)?;
        self.set_render_uniforms(ctx)
    }

    pub fn draw(&mut self, ctx: &mut RenderContext, camera: &Camera) -> RenderResult<()> {
        self.set_render_uniforms(ctx)?;
        self.simulation.draw_step(ctx, camera)
    }

    fn set_render_uniforms(&mut self, ctx: &mut RenderContext) -> RenderResult<()> {
        if let Some(program) = self.simulation.render_program_mut() {
            program.set_uniform(ctx, "u_lifetime", self.config.lifetime)?;
            program.set_uniform(ctx, "u_color", self.config.color)?;
        }
        Ok(())
    }

    /// Install a CPU version of the compute shader when running headless
    ///
    /// Returns false on other backends.
    pub fn register_reference_kernel(&self, ctx: &mut RenderContext) -> bool {
        let handle = self.simulation.compute_program().handle();
        match ctx.backend_mut::<HeadlessBackend>() {
            Some(backend) => {
                backend.register_kernel(handle, reference_kernel);
                true
            }
            None => false,
        }
    }

    pub fn set_emitter(&mut self, emitter: Vec3) {
        self.config.emitter = emitter;
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.config.gravity = gravity;
    }

    pub fn config(&self) -> &ParticleConfig {
        &self.config
    }

    /// Seconds simulated so far
    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn simulation(&self) -> &Simulation {
        &self.simulation
    }

    pub fn simulation_mut(&mut self) -> &mut Simulation {
        &mut self.simulation
    }

    pub fn destroy(self, ctx: &mut RenderContext) -> RenderResult<()> {
        self.simulation.destroy(ctx)
    }
}

fn hash(n: u32) -> f32 {
    let mut x = n;
    x = (x ^ 61) ^ (x >> 16);
    x = x.wrapping_mul(9);
    x ^= x >> 4;
    x = x.wrapping_mul(0x27d4_eb2d);
    x ^= x >> 15;
    x as f32 / u32::MAX as f32
}

fn uniform_f32(invocation: &KernelInvocation<'_>, name: &str) -> f32 {
    match invocation.uniforms.get(name) {
        Some(UniformValue::Float(value)) => *value,
        _ => 0.0,
    }
}

fn uniform_vec3(invocation: &KernelInvocation<'_>, name: &str) -> Vec3 {
    match invocation.uniforms.get(name) {
        Some(UniformValue::Vec3(value)) => *value,
        _ => Vec3::ZERO,
    }
}

/// CPU mirror of [`PARTICLE_COMPUTE_SHADER`]
pub fn reference_kernel(invocation: &KernelInvocation<'_>) -> Vec<Vec<f32>> {
    let count = invocation.count as usize;
    let dt = uniform_f32(invocation, "u_dt");
    let time = uniform_f32(invocation, "u_time");
    let lifetime = uniform_f32(invocation, "u_lifetime");
    let speed = uniform_f32(invocation, "u_speed");
    let gravity = uniform_vec3(invocation, "u_gravity");
    let emitter = uniform_vec3(invocation, "u_emitter");

    let (Some(positions), Some(velocities), Some(lives)) = (
        invocation.inputs.first(),
        invocation.inputs.get(1),
        invocation.inputs.get(2),
    ) else {
        return vec![vec![0.0; count * 4], vec![0.0; count * 4], vec![0.0; count]];
    };

    let mut out_position = Vec::with_capacity(count * 4);
    let mut out_velocity = Vec::with_capacity(count * 4);
    let mut out_life = Vec::with_capacity(count);
    for i in 0..count {
        let mut position = Vec3::from_slice(&positions[i * 4..i * 4 + 3]);
        let mut velocity = Vec3::from_slice(&velocities[i * 4..i * 4 + 3]);
        let mut life = lives[i] - dt;

        if life <= 0.0 {
            let seed = (i as u32)
                .wrapping_mul(1973)
                .wrapping_add(((time * 1000.0) as u32).wrapping_mul(9277));
            let direction = Vec3::new(
                hash(seed) * 2.0 - 1.0,
                1.0 + hash(seed.wrapping_add(1)),
                hash(seed.wrapping_add(2)) * 2.0 - 1.0,
            )
            .normalize();
            velocity = direction * speed * (0.5 + hash(seed.wrapping_add(3)));
            position = emitter;
            life = lifetime * (0.5 + 0.5 * hash(seed.wrapping_add(4)));
        } else {
            velocity += gravity * dt;
            position += velocity * dt;
        }

        out_position.extend_from_slice(&position.extend(1.0).to_array());
        out_velocity.extend_from_slice(&velocity.extend(0.0).to_array());
        out_life.push(life);
    }
    vec![out_position, out_velocity, out_life]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_kernel_integrates_gravity() {
        let mut ctx = RenderContext::headless(16, 16);
        let config = ParticleConfig::default()
            .with_count(8)
            .with_emitter(Vec3::new(0.0, 1.0, 0.0))
            .with_lifetime(10.0);
        let mut particles = ParticleSystem::new(&mut ctx, config).unwrap();
        assert!(particles.register_reference_kernel(&mut ctx));

        particles.update(&mut ctx, 0.5).unwrap();
        let velocities: Vec<[f32; 4]> = particles
            .simulation()
            .read_attribute(&mut ctx, "velocity")
            .unwrap();
        let lives: Vec<f32> = particles.simulation().read_attribute(&mut ctx, "life").unwrap();

        // Particle 0 starts dead and respawns; the rest fall under gravity
        assert!(lives[0] >= 5.0);
        assert!(velocities[0][1] > 0.0);
        for i in 1..8 {
            assert!((velocities[i][1] + 9.81 * 0.5).abs() < 1e-4);
            assert!((lives[i] - (10.0 * i as f32 / 8.0 - 0.5)).abs() < 1e-5);
        }
    }

    #[test]
    fn test_draw_points() {
        let mut ctx = RenderContext::headless(16, 16);
        let mut particles =
            ParticleSystem::new(&mut ctx, ParticleConfig::default().with_count(32)).unwrap();
        particles.update(&mut ctx, 0.016).unwrap();
        particles.draw(&mut ctx, &Camera::default()).unwrap();

        let backend = ctx.backend::<HeadlessBackend>().unwrap();
        let draw = backend.draws().last().unwrap();
        assert_eq!(draw.topology, crate::backend::PrimitiveTopology::PointList);
        assert_eq!(draw.count, 32);
        assert!(!draw.feedback);
    }
}
