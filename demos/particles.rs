//! # Particles Demo
//!
//! A lit cube inside a GPU particle fountain, rendered through a
//! blur + tonemapping post-processing chain.
//!
//! Controls: drag to orbit, scroll to zoom.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use clap::Parser;
use glam::{Vec3, Vec4};
use render_engine::backend::PrimitiveTopology;
use render_engine::postprocess::{BlurDirection, Pass, PipelineOptions, TonemapOperator};
use render_engine::program::{Program, LAMBERT_FRAGMENT_SHADER, SCENE_VERTEX_SHADER};
use render_engine::resources::{Geometry, MeshData};
use render_engine::scene::{
    Camera, CameraController, DrawSet, OrbitController, SceneGraph, Transform,
};
use render_engine::simulation::{ParticleConfig, ParticleSystem};
use render_engine::{Engine, EngineConfig, RenderResult};

#[derive(Parser, Debug)]
#[command(name = "particles", about = "GPU particle fountain demo")]
struct Args {
    /// Number of particles
    #[arg(long, default_value = "20000")]
    count: u32,

    /// Window width
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Window height
    #[arg(long, default_value = "720")]
    height: u32,

    /// Blur radius in pixels, 0 disables the blur passes
    #[arg(long, default_value = "2.0")]
    blur: f32,

    /// Tonemapping exposure
    #[arg(long, default_value = "1.0")]
    exposure: f32,

    /// Disable vsync
    #[arg(long)]
    no_vsync: bool,
}

struct App {
    engine: Engine,
    scene: SceneGraph,
    camera: Camera,
    controller: OrbitController,
    particles: ParticleSystem,
    cube: render_engine::scene::NodeId,
    last_frame: Instant,
}

impl App {
    fn new(window: &render_engine::Window, args: &Args) -> RenderResult<Self> {
        let config = EngineConfig::default()
            .with_title("Particles")
            .with_size(args.width, args.height)
            .with_vsync(!args.no_vsync)
            .with_post_processing(PipelineOptions::default());
        let mut engine = Engine::new(window.window_arc(), config)?;

        if let Some((pipeline, ctx)) = engine.pipeline_mut() {
            if args.blur > 0.0 {
                pipeline.add_pass(Pass::gaussian_blur(ctx, BlurDirection::Horizontal, args.blur)?)?;
                pipeline.add_pass(Pass::gaussian_blur(ctx, BlurDirection::Vertical, args.blur)?)?;
            }
            let tonemap = Pass::tonemapping(ctx, TonemapOperator::Aces, args.exposure, 2.2)?;
            pipeline.add_pass(tonemap.to_screen())?;
        }

        let ctx = engine.context_mut();
        let geometry = Rc::new(Geometry::from_mesh(ctx, &MeshData::cube())?);
        let mut program = Program::new(ctx, "lambert", SCENE_VERTEX_SHADER, LAMBERT_FRAGMENT_SHADER)?;
        program.set_uniform(ctx, "u_color", Vec4::new(0.3, 0.5, 0.9, 1.0))?;
        program.set_uniform(ctx, "u_light_direction", Vec3::new(-0.4, -1.0, -0.3))?;
        let program = Rc::new(RefCell::new(program));

        let mut scene = SceneGraph::new();
        let cube = scene.add_draw_set(
            "cube",
            Transform::IDENTITY,
            DrawSet::new(geometry, program).with_draw_type(PrimitiveTopology::TriangleList),
        );

        let particles = ParticleSystem::new(
            ctx,
            ParticleConfig::default()
                .with_count(args.count)
                .with_emitter(Vec3::new(0.0, 0.6, 0.0)),
        )?;

        let mut camera = Camera::new(Vec3::new(0.0, 3.0, 8.0), Vec3::ZERO);
        let (width, height) = engine.dimensions();
        camera.resize(width, height);
        let mut controller = OrbitController::new(Vec3::ZERO, 8.0);
        controller.sync_with_camera(&camera);

        Ok(Self {
            engine,
            scene,
            camera,
            controller,
            particles,
            cube,
            last_frame: Instant::now(),
        })
    }

    fn frame(&mut self, window: &mut render_engine::Window) -> RenderResult<()> {
        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f32().min(0.1);
        self.last_frame = now;

        if window.was_resized() {
            let (width, height) = window.dimensions();
            self.engine.resize(width, height)?;
            self.camera.resize(width, height);
            window.clear_resize_flag();
        }

        self.controller.update(&mut self.camera, window.input(), dt);
        self.scene
            .transform_mut(self.cube)?
            .rotate_axis(Vec3::Y, dt * 0.5);

        self.particles.prepare(self.engine.context_mut(), dt)?;
        let simulation = self.particles.simulation_mut();
        self.engine
            .render_frame(&mut self.scene, &self.camera, &mut [simulation])
    }
}

fn main() {
    render_engine::init_logging();
    let args = Args::parse();

    let result = render_engine::window::run(
        "Particles",
        args.width,
        args.height,
        |window| App::new(window, &args),
        |window, app| match app {
            Ok(app) => match app.frame(window) {
                Ok(()) => !window.should_close(),
                Err(err) => {
                    log::error!("Frame failed: {}", err);
                    false
                }
            },
            Err(err) => {
                log::error!("Failed to start: {}", err);
                false
            }
        },
    );
    if let Err(err) = result {
        log::error!("Event loop failed: {}", err);
    }
}
