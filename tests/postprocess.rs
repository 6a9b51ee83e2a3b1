//! Pass ordering, enablement and failure handling of the ping-pong pipeline

use render_engine::backend::{DrawTarget, HeadlessBackend};
use render_engine::postprocess::{
    Pass, Pipeline, PipelineOptions, TonemapOperator, PASS_INPUT_TEXTURE,
};
use render_engine::resources::Texture;
use render_engine::{RenderContext, RenderError};

const TINT_FRAGMENT: &str = r#"
@group(0) @binding(0) var<uniform> u_tint: vec4<f32>;
@group(1) @binding(0) var u_texture: texture_2d<f32>;
@group(1) @binding(1) var u_texture_sampler: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(u_texture, u_texture_sampler, uv) * u_tint;
}
"#;

const VOLUME_SLICE_FRAGMENT: &str = r#"
@group(1) @binding(0) var u_texture: texture_3d<f32>;
@group(1) @binding(1) var u_texture_sampler: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(u_texture, u_texture_sampler, vec3<f32>(uv, 0.5));
}
"#;

fn setup(width: u32, height: u32) -> (RenderContext, Pipeline) {
    let mut ctx = RenderContext::headless(width, height);
    let pipeline = Pipeline::new(&mut ctx, width, height, PipelineOptions::default()).unwrap();
    (ctx, pipeline)
}

fn draws(ctx: &mut RenderContext) -> Vec<render_engine::backend::DrawRecord> {
    ctx.backend_mut::<HeadlessBackend>().unwrap().take_draws()
}

#[test]
fn test_disabled_pass_is_skipped() {
    let (mut ctx, mut pipeline) = setup(64, 64);
    pipeline
        .add_pass(Pass::custom(&mut ctx, "a", TINT_FRAGMENT).unwrap())
        .unwrap();
    pipeline
        .add_pass(
            Pass::custom(&mut ctx, "b", TINT_FRAGMENT)
                .unwrap()
                .with_enabled(false),
        )
        .unwrap();
    pipeline
        .add_pass(Pass::custom(&mut ctx, "c", TINT_FRAGMENT).unwrap().to_screen())
        .unwrap();

    let scene_target = pipeline.read_framebuffer().handle();
    pipeline.begin(&mut ctx).unwrap();
    pipeline.end(&mut ctx).unwrap();

    let draws = draws(&mut ctx);
    let labels: Vec<&str> = draws.iter().map(|d| d.program_label.as_str()).collect();
    assert_eq!(labels, vec!["a", "c"]);

    // `a` samples the scene and writes the other target; `c` samples that
    assert_ne!(draws[0].target, DrawTarget::Framebuffer(scene_target));
    assert!(matches!(draws[0].target, DrawTarget::Framebuffer(_)));
    assert_eq!(draws[1].target, DrawTarget::Screen);
    let DrawTarget::Framebuffer(written) = draws[0].target else {
        unreachable!()
    };
    let backend = ctx.backend::<HeadlessBackend>().unwrap();
    let written_color = backend.framebuffer_descriptor(written).unwrap().color_attachments[0];
    assert_eq!(draws[1].texture(PASS_INPUT_TEXTURE), Some(written_color));
}

#[test]
fn test_toggling_a_pass_changes_the_chain() {
    let (mut ctx, mut pipeline) = setup(32, 32);
    pipeline
        .add_pass(Pass::custom(&mut ctx, "first", TINT_FRAGMENT).unwrap())
        .unwrap();
    pipeline
        .add_pass(Pass::custom(&mut ctx, "second", TINT_FRAGMENT).unwrap())
        .unwrap();

    pipeline.set_enabled("first", false).unwrap();
    pipeline.begin(&mut ctx).unwrap();
    pipeline.end(&mut ctx).unwrap();
    let labels: Vec<String> = draws(&mut ctx).into_iter().map(|d| d.program_label).collect();
    assert_eq!(labels, vec!["second".to_string()]);

    pipeline.set_enabled("first", true).unwrap();
    pipeline.begin(&mut ctx).unwrap();
    pipeline.end(&mut ctx).unwrap();
    assert_eq!(draws(&mut ctx).len(), 2);

    assert!(matches!(
        pipeline.set_enabled("missing", true),
        Err(RenderError::InvalidOperation(_))
    ));
}

#[test]
fn test_override_feeds_only_first_executed_pass() {
    let (mut ctx, mut pipeline) = setup(32, 32);
    pipeline
        .add_pass(
            Pass::custom(&mut ctx, "skipped", TINT_FRAGMENT)
                .unwrap()
                .with_enabled(false),
        )
        .unwrap();
    pipeline
        .add_pass(Pass::custom(&mut ctx, "first", TINT_FRAGMENT).unwrap())
        .unwrap();
    pipeline
        .add_pass(
            Pass::tonemapping(&mut ctx, TonemapOperator::Reinhard, 1.0, 2.2)
                .unwrap()
                .to_screen(),
        )
        .unwrap();

    let external = Texture::solid_color(&mut ctx, "external", [10, 20, 30, 255]).unwrap();
    pipeline.begin(&mut ctx).unwrap();
    pipeline.end_with_override(&mut ctx, &external).unwrap();

    let draws = draws(&mut ctx);
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[0].texture(PASS_INPUT_TEXTURE), Some(external.handle()));
    assert_ne!(draws[1].texture(PASS_INPUT_TEXTURE), Some(external.handle()));
    assert_eq!(draws[1].target, DrawTarget::Screen);
}

#[test]
fn test_failed_pass_halts_permanently() {
    let (mut ctx, mut pipeline) = setup(32, 32);
    pipeline
        .add_pass(
            Pass::custom(&mut ctx, "volume_slice", VOLUME_SLICE_FRAGMENT)
                .unwrap()
                .to_screen(),
        )
        .unwrap();

    pipeline.begin(&mut ctx).unwrap();
    let first = pipeline.end(&mut ctx);
    assert!(matches!(first, Err(RenderError::InvalidOperation(_))));
    assert!(pipeline.pass("volume_slice").unwrap().is_halted());

    pipeline.begin(&mut ctx).unwrap();
    match pipeline.end(&mut ctx) {
        Err(RenderError::PassHalted { name, .. }) => assert_eq!(name, "volume_slice"),
        other => panic!("expected a halted pass, got {:?}", other),
    }
    assert!(pipeline.pass("volume_slice").unwrap().halt_reason().is_some());
    assert!(draws(&mut ctx).is_empty());
}

#[test]
fn test_pass_after_screen_pass_is_rejected() {
    let (mut ctx, mut pipeline) = setup(32, 32);
    pipeline
        .add_pass(Pass::copy(&mut ctx).unwrap().to_screen())
        .unwrap();
    let late = Pass::custom(&mut ctx, "late", TINT_FRAGMENT).unwrap();
    assert!(matches!(
        pipeline.add_pass(late),
        Err(RenderError::InvalidOperation(_))
    ));

    let duplicate = Pass::copy(&mut ctx).unwrap();
    assert!(pipeline.add_pass(duplicate).is_err());
    assert_eq!(pipeline.passes().len(), 1);
}

#[test]
fn test_zero_resize_is_rejected() {
    let (mut ctx, mut pipeline) = setup(64, 32);
    pipeline
        .add_pass(Pass::custom(&mut ctx, "a", TINT_FRAGMENT).unwrap())
        .unwrap();
    assert!(matches!(
        pipeline.resize(&mut ctx, 0, 0),
        Err(RenderError::InvalidOperation(_))
    ));
    assert!(pipeline.resize(&mut ctx, 128, 0).is_err());
    assert_eq!(pipeline.size(), (64, 32));
    assert_eq!(pipeline.read_framebuffer().size(), (64, 32));

    pipeline.resize(&mut ctx, 128, 64).unwrap();
    assert_eq!(pipeline.read_framebuffer().size(), (128, 64));
}
