//! Uniform and texture-unit caching of programs

use glam::{Vec3, Vec4};
use render_engine::backend::{PrimitiveTopology, TextureKind, UniformKind, UniformValue};
use render_engine::program::{
    Program, FULLSCREEN_VERTEX_SHADER, LAMBERT_FRAGMENT_SHADER, SCENE_VERTEX_SHADER,
};
use render_engine::resources::{Texture, TextureOptions};
use render_engine::{HeadlessBackend, RenderContext, RenderError};

const TWO_TEXTURE_FRAGMENT: &str = r#"
@group(1) @binding(0) var u_albedo: texture_2d<f32>;
@group(1) @binding(1) var u_albedo_sampler: sampler;
@group(1) @binding(2) var u_detail: texture_2d<f32>;
@group(1) @binding(3) var u_detail_sampler: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let albedo = textureSample(u_albedo, u_albedo_sampler, uv);
    let detail = textureSample(u_detail, u_detail_sampler, uv * 8.0);
    return albedo * detail;
}
"#;

fn lambert(ctx: &mut RenderContext) -> Program {
    Program::new(ctx, "lambert", SCENE_VERTEX_SHADER, LAMBERT_FRAGMENT_SHADER).unwrap()
}

#[test]
fn test_identical_uniform_writes_reach_device_once() {
    let mut ctx = RenderContext::headless(64, 64);
    let mut program = lambert(&mut ctx);
    let color = Vec4::new(0.2, 0.4, 0.6, 1.0);

    assert!(program.set_uniform(&mut ctx, "u_color", color).unwrap());
    assert!(!program.set_uniform(&mut ctx, "u_color", color).unwrap());
    for _ in 0..10 {
        assert!(!program.set_uniform(&mut ctx, "u_color", color).unwrap());
    }

    let backend = ctx.backend::<HeadlessBackend>().unwrap();
    assert_eq!(backend.stats().uniform_writes_for(program.handle(), "u_color"), 1);
    assert_eq!(
        backend.program_uniform(program.handle(), "u_color"),
        Some(UniformValue::from(color))
    );

    assert!(program
        .set_uniform(&mut ctx, "u_color", Vec4::new(1.0, 0.0, 0.0, 1.0))
        .unwrap());
    let backend = ctx.backend::<HeadlessBackend>().unwrap();
    assert_eq!(backend.stats().uniform_writes_for(program.handle(), "u_color"), 2);
}

#[test]
fn test_unknown_uniform_is_ignored() {
    let mut ctx = RenderContext::headless(64, 64);
    let mut program = lambert(&mut ctx);
    assert!(!program.set_uniform(&mut ctx, "u_missing", 1.0f32).unwrap());
    assert!(program.cached_uniform("u_missing").is_none());
    assert_eq!(ctx.backend::<HeadlessBackend>().unwrap().stats().uniform_writes, 0);
}

#[test]
fn test_uniform_type_mismatch_is_rejected() {
    let mut ctx = RenderContext::headless(64, 64);
    let mut program = lambert(&mut ctx);
    let result = program.set_uniform(&mut ctx, "u_color", Vec3::ONE);
    match result {
        Err(RenderError::UniformTypeMismatch {
            name,
            expected,
            found,
        }) => {
            assert_eq!(name, "u_color");
            assert_eq!(expected, UniformKind::Vec4);
            assert_eq!(found, UniformKind::Vec3);
        }
        other => panic!("expected a type mismatch, got {:?}", other),
    }
    assert!(program.cached_uniform("u_color").is_none());
}

#[test]
fn test_texture_units_stay_stable_across_frames() {
    let mut ctx = RenderContext::headless(64, 64);
    let mut program =
        Program::new(&mut ctx, "detail", FULLSCREEN_VERTEX_SHADER, TWO_TEXTURE_FRAGMENT).unwrap();
    let albedo = Texture::solid_color(&mut ctx, "albedo", [200, 100, 50, 255]).unwrap();
    let detail = Texture::checkerboard(&mut ctx, 16, [255; 4], [0, 0, 0, 255]).unwrap();

    for frame in 0..1000 {
        ctx.begin_frame().unwrap();
        let albedo_unit = program.set_texture(&mut ctx, "u_albedo", &albedo).unwrap();
        let detail_unit = program.set_texture(&mut ctx, "u_detail", &detail).unwrap();
        assert_eq!((albedo_unit, detail_unit), (0, 1), "frame {}", frame);

        program.bind(&mut ctx).unwrap();
        ctx.draw(PrimitiveTopology::TriangleList, 0, 3, 1).unwrap();
        ctx.end_frame().unwrap();

        let draws = ctx
            .backend_mut::<HeadlessBackend>()
            .unwrap()
            .take_draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].texture("u_albedo"), Some(albedo.handle()));
        assert_eq!(draws[0].texture("u_detail"), Some(detail.handle()));
    }

    assert_eq!(program.texture_unit("u_albedo"), Some(0));
    assert_eq!(program.texture_unit("u_detail"), Some(1));
}

#[test]
fn test_texture_kind_must_match_declaration() {
    let mut ctx = RenderContext::headless(64, 64);
    let mut program =
        Program::new(&mut ctx, "detail", FULLSCREEN_VERTEX_SHADER, TWO_TEXTURE_FRAGMENT).unwrap();
    let volume = Texture::volume(
        &mut ctx,
        "volume",
        (4, 4, 4),
        None,
        TextureOptions::default(),
    )
    .unwrap();
    assert_eq!(volume.kind(), TextureKind::D3);

    let result = program.set_texture(&mut ctx, "u_albedo", &volume);
    assert!(matches!(result, Err(RenderError::InvalidOperation(_))));
    assert_eq!(program.texture_unit("u_albedo"), None);
}

#[test]
fn test_invalid_shader_reports_compile_error() {
    let mut ctx = RenderContext::headless(64, 64);
    let result = Program::new(&mut ctx, "broken", FULLSCREEN_VERTEX_SHADER, "fn fs_main( {");
    assert!(matches!(result, Err(RenderError::ShaderCompile { .. })));
}
