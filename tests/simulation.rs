//! Double-buffered simulation stepping on the headless backend

use render_engine::backend::{identity_kernel, HeadlessBackend, PrimitiveTopology};
use render_engine::scene::Camera;
use render_engine::simulation::{DrawMode, Simulation, SimulationAttribute, SimulationDescriptor};
use render_engine::{RenderContext, RenderError};

const ADVECT: &str = r#"
@group(0) @binding(0) var<uniform> u_dt: f32;
@group(2) @binding(0) var<storage, read> in_position: array<vec4<f32>>;
@group(2) @binding(1) var<storage, read> in_velocity: array<vec4<f32>>;
@group(3) @binding(0) var<storage, read_write> out_position: array<vec4<f32>>;
@group(3) @binding(1) var<storage, read_write> out_velocity: array<vec4<f32>>;

@compute @workgroup_size(64)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if (i >= arrayLength(&out_position)) {
        return;
    }
    out_position[i] = in_position[i] + in_velocity[i] * u_dt;
    out_velocity[i] = in_velocity[i];
}
"#;

const POINT_VERTEX: &str = r#"
@group(0) @binding(0) var<uniform> u_view: mat4x4<f32>;
@group(0) @binding(1) var<uniform> u_projection: mat4x4<f32>;

@vertex
fn vs_main(@location(0) position: vec4<f32>, @location(1) velocity: vec4<f32>) -> @builtin(position) vec4<f32> {
    return u_projection * u_view * vec4<f32>(position.xyz + velocity.xyz * 0.0, 1.0);
}
"#;

const POINT_FRAGMENT: &str = r#"
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 1.0, 1.0, 1.0);
}
"#;

const COUNT: u32 = 5;

fn positions() -> Vec<f32> {
    (0..COUNT * 4).map(|i| i as f32 * 0.5).collect()
}

fn velocities() -> Vec<f32> {
    (0..COUNT * 4).map(|i| if i % 4 == 1 { 1.0 } else { 0.0 }).collect()
}

fn descriptor() -> SimulationDescriptor {
    SimulationDescriptor::new("advect", COUNT, ADVECT)
        .with_attribute(SimulationAttribute::new("position", 0, 4), positions())
        .with_attribute(SimulationAttribute::new("velocity", 1, 4), velocities())
        .with_render(POINT_VERTEX, POINT_FRAGMENT)
}

#[test]
fn test_identity_steps_round_trip() {
    let mut ctx = RenderContext::headless(32, 32);
    let mut sim = Simulation::new(&mut ctx, descriptor()).unwrap();
    let handle = sim.compute_program().handle();
    ctx.backend_mut::<HeadlessBackend>()
        .unwrap()
        .register_kernel(handle, identity_kernel);

    sim.compute_step(&mut ctx).unwrap();
    assert_eq!(sim.current_set(), 1);
    sim.compute_step(&mut ctx).unwrap();
    assert_eq!(sim.current_set(), 0);
    assert_eq!(sim.steps(), 2);

    assert_eq!(sim.read_attribute::<f32>(&mut ctx, "position").unwrap(), positions());
    assert_eq!(sim.read_attribute::<f32>(&mut ctx, "velocity").unwrap(), velocities());
}

#[test]
fn test_kernel_output_becomes_next_input() {
    let mut ctx = RenderContext::headless(32, 32);
    let mut sim = Simulation::new(&mut ctx, descriptor()).unwrap();
    let handle = sim.compute_program().handle();
    ctx.backend_mut::<HeadlessBackend>()
        .unwrap()
        .register_kernel(handle, |invocation| {
            let position: Vec<f32> = invocation.inputs[0]
                .iter()
                .zip(&invocation.inputs[1])
                .map(|(p, v)| p + v)
                .collect();
            vec![position, invocation.inputs[1].clone()]
        });

    for _ in 0..3 {
        sim.compute_step(&mut ctx).unwrap();
    }
    assert_eq!(sim.current_set(), 1);

    let expected: Vec<f32> = positions()
        .iter()
        .zip(velocities())
        .map(|(p, v)| p + v * 3.0)
        .collect();
    assert_eq!(sim.read_attribute::<f32>(&mut ctx, "position").unwrap(), expected);
}

#[test]
fn test_draw_follows_compute_step() {
    let mut ctx = RenderContext::headless(32, 32);
    let mut sim = Simulation::new(&mut ctx, descriptor()).unwrap();
    let handle = sim.compute_program().handle();
    ctx.backend_mut::<HeadlessBackend>()
        .unwrap()
        .register_kernel(handle, identity_kernel);

    let camera = Camera::default();
    sim.step_and_draw(&mut ctx, &camera).unwrap();

    let backend = ctx.backend::<HeadlessBackend>().unwrap();
    let draws = backend.draws();
    assert_eq!(draws.len(), 2);
    assert!(draws[0].feedback);
    assert!(draws[0].rasterizer_discard);
    assert!(!draws[1].feedback);
    assert!(!draws[1].rasterizer_discard);
    assert_eq!(draws[1].topology, PrimitiveTopology::PointList);
    assert_eq!(draws[1].count, COUNT);
    assert_ne!(draws[0].vertex_layout, draws[1].vertex_layout);
    assert!(!backend.rasterizer_discard());
}

#[test]
fn test_instanced_draw_mode() {
    let mut ctx = RenderContext::headless(32, 32);
    let desc = descriptor().with_draw_mode(DrawMode::Instanced {
        vertices_per_instance: 4,
        topology: PrimitiveTopology::TriangleStrip,
    });
    let mut sim = Simulation::new(&mut ctx, desc).unwrap();
    sim.draw_step(&mut ctx, &Camera::default()).unwrap();

    let backend = ctx.backend::<HeadlessBackend>().unwrap();
    let draw = backend.draws().last().unwrap();
    assert_eq!(draw.count, 4);
    assert_eq!(draw.instances, COUNT);
    assert_eq!(draw.topology, PrimitiveTopology::TriangleStrip);
}

#[test]
fn test_write_attribute_seeds_next_step() {
    let mut ctx = RenderContext::headless(32, 32);
    let mut sim = Simulation::new(&mut ctx, descriptor()).unwrap();
    let handle = sim.compute_program().handle();
    ctx.backend_mut::<HeadlessBackend>()
        .unwrap()
        .register_kernel(handle, identity_kernel);

    sim.write_attribute(&mut ctx, "position", 1, &[[9.0f32, 9.0, 9.0, 1.0]])
        .unwrap();
    sim.compute_step(&mut ctx).unwrap();

    let position = sim.read_attribute::<[f32; 4]>(&mut ctx, "position").unwrap();
    assert_eq!(position[1], [9.0, 9.0, 9.0, 1.0]);
    assert_eq!(position[0], [0.0, 0.5, 1.0, 1.5]);

    assert!(matches!(
        sim.write_attribute(&mut ctx, "position", COUNT as usize, &[[0.0f32; 4]]),
        Err(RenderError::InvalidOperation(_))
    ));
}
