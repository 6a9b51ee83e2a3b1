//! Resource lifetimes and binding rules on the headless backend

use glam::{Mat4, Vec3, Vec4};
use render_engine::backend::{
    BufferKind, DrawTarget, PrimitiveTopology, ResourceKind, UsageHint,
};
use render_engine::program::{Program, LAMBERT_FRAGMENT_SHADER, SCENE_VERTEX_SHADER};
use render_engine::backend::TextureFormat;
use render_engine::resources::{
    Framebuffer, FramebufferOptions, Geometry, GpuBuffer, MeshData, Renderbuffer, Texture,
    TextureOptions,
};
use render_engine::{ContextConfig, HeadlessBackend, RenderContext, RenderError};

fn lenient_context() -> RenderContext {
    RenderContext::new(
        Box::new(HeadlessBackend::new(320, 240)),
        ContextConfig::default().with_strict_bindings(false),
    )
}

fn headless(ctx: &RenderContext) -> &HeadlessBackend {
    ctx.backend::<HeadlessBackend>().unwrap()
}

#[test]
fn test_resized_framebuffer_receives_draws_at_new_size() {
    let mut ctx = RenderContext::headless(320, 240);
    let mut framebuffer = Framebuffer::new(
        &mut ctx,
        256,
        256,
        FramebufferOptions::default().with_label("offscreen"),
    )
    .unwrap();
    framebuffer.resize(&mut ctx, 512, 512).unwrap();
    assert_eq!(framebuffer.size(), (512, 512));

    let geometry = Geometry::from_mesh(&mut ctx, &MeshData::cube()).unwrap();
    let mut program =
        Program::new(&mut ctx, "lambert", SCENE_VERTEX_SHADER, LAMBERT_FRAGMENT_SHADER).unwrap();
    program.set_uniform(&mut ctx, "u_model", Mat4::IDENTITY).unwrap();
    program
        .set_uniform(&mut ctx, "u_view", Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y))
        .unwrap();
    program
        .set_uniform(
            &mut ctx,
            "u_projection",
            Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0),
        )
        .unwrap();
    program
        .set_uniform(&mut ctx, "u_color", Vec4::new(1.0, 0.5, 0.25, 1.0))
        .unwrap();

    framebuffer.clear(&mut ctx, [0.0, 0.0, 0.0, 1.0]).unwrap();
    program.bind(&mut ctx).unwrap();
    geometry
        .draw(&mut ctx, PrimitiveTopology::TriangleList, 1)
        .unwrap();

    let backend = headless(&ctx);
    let draw = backend.draws().last().unwrap();
    assert_eq!(draw.target, DrawTarget::Framebuffer(framebuffer.handle()));
    assert!(draw.indexed);
    assert_eq!(draw.count, 36);
    assert_eq!(backend.viewport(), (0, 0, 512, 512));

    let desc = backend.framebuffer_descriptor(framebuffer.handle()).unwrap();
    assert_eq!((desc.width, desc.height), (512, 512));
    let color = backend
        .texture_descriptor(framebuffer.color_texture(0).unwrap().handle())
        .unwrap();
    assert_eq!((color.width, color.height), (512, 512));
    let depth = backend
        .renderbuffer_descriptor(framebuffer.renderbuffer().unwrap().handle())
        .unwrap();
    assert_eq!((depth.width, depth.height), (512, 512));

    framebuffer.unbind(&mut ctx).unwrap();
    assert_eq!(headless(&ctx).bound_framebuffer(), None);
    assert_eq!(headless(&ctx).viewport(), (0, 0, 320, 240));
}

#[test]
fn test_static_buffer_rejects_updates() {
    let mut ctx = RenderContext::headless(64, 64);
    let mut buffer =
        GpuBuffer::new(&mut ctx, BufferKind::Vertex, &[1.0f32, 2.0, 3.0], UsageHint::Static)
            .unwrap();
    let result = buffer.update(&mut ctx, 0, &[9.0f32]);
    assert!(matches!(result, Err(RenderError::InvalidOperation(_))));
    assert_eq!(buffer.read::<f32>(&mut ctx).unwrap(), vec![1.0, 2.0, 3.0]);
}

#[test]
fn test_dynamic_buffer_partial_update() {
    let mut ctx = RenderContext::headless(64, 64);
    let mut buffer = GpuBuffer::new(
        &mut ctx,
        BufferKind::Vertex,
        &[0u32, 1, 2, 3],
        UsageHint::Dynamic,
    )
    .unwrap();
    buffer.update(&mut ctx, 2, &[20u32, 30]).unwrap();
    assert_eq!(buffer.read::<u32>(&mut ctx).unwrap(), vec![0, 1, 20, 30]);

    let overflow = buffer.update(&mut ctx, 3, &[7u32, 8]);
    assert!(matches!(overflow, Err(RenderError::InvalidOperation(_))));
}

#[test]
fn test_destroyed_buffer_handle_is_rejected() {
    let mut ctx = lenient_context();
    let buffer =
        GpuBuffer::new(&mut ctx, BufferKind::Vertex, &[0.0f32; 8], UsageHint::Static).unwrap();
    let handle = buffer.handle();
    buffer.destroy(&mut ctx).unwrap();

    let result = ctx.bind_buffer(BufferKind::Vertex, Some(handle));
    assert!(matches!(
        result,
        Err(RenderError::InvalidBinding {
            kind: ResourceKind::Buffer,
            ..
        })
    ));
    assert_eq!(headless(&ctx).live_count(ResourceKind::Buffer), 0);
}

#[test]
fn test_framebuffer_destroy_releases_attachments() {
    let mut ctx = RenderContext::headless(64, 64);
    let framebuffer = Framebuffer::new(
        &mut ctx,
        32,
        32,
        FramebufferOptions::default().with_color_attachments(2),
    )
    .unwrap();
    assert_eq!(headless(&ctx).live_count(ResourceKind::Texture), 2);
    assert_eq!(headless(&ctx).live_count(ResourceKind::Renderbuffer), 1);

    framebuffer.destroy(&mut ctx).unwrap();
    let backend = headless(&ctx);
    assert_eq!(backend.live_count(ResourceKind::Framebuffer), 0);
    assert_eq!(backend.live_count(ResourceKind::Texture), 0);
    assert_eq!(backend.live_count(ResourceKind::Renderbuffer), 0);
}

#[test]
fn test_texture_resize_keeps_handle() {
    let mut ctx = RenderContext::headless(64, 64);
    let mut texture =
        Texture::render_target(&mut ctx, "target", 16, 16, TextureOptions::default()).unwrap();
    let handle = texture.handle();
    texture.resize(&mut ctx, 40, 24).unwrap();

    assert_eq!(texture.handle(), handle);
    assert_eq!(texture.size(), (40, 24));
    let desc = headless(&ctx).texture_descriptor(handle).unwrap();
    assert_eq!((desc.width, desc.height), (40, 24));
}

#[test]
fn test_zero_resize_keeps_sizes_in_sync() {
    let mut ctx = RenderContext::headless(64, 64);
    let mut framebuffer =
        Framebuffer::new(&mut ctx, 256, 256, FramebufferOptions::default()).unwrap();
    for (width, height) in [(0, 0), (0, 128), (128, 0)] {
        assert!(matches!(
            framebuffer.resize(&mut ctx, width, height),
            Err(RenderError::ResourceCreation { .. })
        ));
    }
    assert_eq!(framebuffer.size(), (256, 256));

    let backend = headless(&ctx);
    let desc = backend.framebuffer_descriptor(framebuffer.handle()).unwrap();
    assert_eq!((desc.width, desc.height), framebuffer.size());
    let color = framebuffer.color_texture(0).unwrap();
    assert_eq!(color.size(), (256, 256));
    let color_desc = backend.texture_descriptor(color.handle()).unwrap();
    assert_eq!((color_desc.width, color_desc.height), (256, 256));

    framebuffer.bind(&mut ctx).unwrap();
    assert_eq!(ctx.state().viewport, (0, 0, 256, 256));

    let mut texture =
        Texture::render_target(&mut ctx, "target", 16, 16, TextureOptions::default()).unwrap();
    assert!(texture.resize(&mut ctx, 0, 16).is_err());
    assert_eq!(texture.size(), (16, 16));

    let mut renderbuffer =
        Renderbuffer::new(&mut ctx, 16, 16, TextureFormat::Depth24PlusStencil8).unwrap();
    assert!(renderbuffer.resize(&mut ctx, 16, 0).is_err());
    assert_eq!(renderbuffer.size(), (16, 16));
}

#[test]
fn test_failed_framebuffer_releases_created_attachments() {
    let mut ctx = RenderContext::headless(64, 64);
    let mut options = FramebufferOptions::default().with_color_attachments(2);
    options.depth_format = TextureFormat::Rgba8Unorm;

    assert!(Framebuffer::new(&mut ctx, 32, 32, options).is_err());
    let backend = headless(&ctx);
    assert_eq!(backend.live_count(ResourceKind::Texture), 0);
    assert_eq!(backend.live_count(ResourceKind::Renderbuffer), 0);
    assert_eq!(backend.live_count(ResourceKind::Framebuffer), 0);
}

#[test]
fn test_odd_length_index_buffer_round_trips() {
    let mut ctx = RenderContext::headless(64, 64);
    let indices =
        GpuBuffer::new(&mut ctx, BufferKind::Index, &[0u16, 1, 2], UsageHint::Static).unwrap();
    assert_eq!(indices.len(), 3);
    assert_eq!(indices.read::<u16>(&mut ctx).unwrap(), vec![0, 1, 2]);

    let mut dynamic =
        GpuBuffer::new(&mut ctx, BufferKind::Index, &[0u16; 5], UsageHint::Dynamic).unwrap();
    dynamic.update(&mut ctx, 3, &[8u16]).unwrap();
    dynamic.update(&mut ctx, 0, &[1u16, 2, 3]).unwrap();
    assert_eq!(dynamic.read::<u16>(&mut ctx).unwrap(), vec![1, 2, 3, 8, 0]);
}
