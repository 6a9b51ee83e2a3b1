//! Off-screen render targets

use crate::backend::{
    DepthAttachment, FramebufferDescriptor, FramebufferHandle, RenderbufferDescriptor,
    RenderbufferHandle, ResourceKind, TextureFormat,
};
use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::resources::{Texture, TextureOptions};

/// Depth/stencil storage that is never sampled
#[derive(Debug)]
pub struct Renderbuffer {
    handle: RenderbufferHandle,
    width: u32,
    height: u32,
    format: TextureFormat,
}

impl Renderbuffer {
    pub fn new(
        ctx: &mut RenderContext,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> RenderResult<Self> {
        check_size("renderbuffer", ResourceKind::Renderbuffer, width, height)?;
        let handle = ctx.create_renderbuffer(&RenderbufferDescriptor {
            label: Some("renderbuffer".to_string()),
            width,
            height,
            format,
        })?;
        Ok(Self {
            handle,
            width,
            height,
            format,
        })
    }

    /// Reallocate storage; contents are not preserved
    pub fn resize(&mut self, ctx: &mut RenderContext, width: u32, height: u32) -> RenderResult<()> {
        check_size("renderbuffer", ResourceKind::Renderbuffer, width, height)?;
        ctx.resize_renderbuffer(self.handle, width, height)?;
        self.width = width;
        self.height = height;
        Ok(())
    }

    pub fn destroy(self, ctx: &mut RenderContext) -> RenderResult<()> {
        ctx.destroy_renderbuffer(self.handle)
    }

    pub fn handle(&self) -> RenderbufferHandle {
        self.handle
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }
}

/// How a framebuffer stores depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthMode {
    None,
    /// Depth texture that can be sampled by later passes
    Texture,
    /// Renderbuffer storage
    #[default]
    Renderbuffer,
}

/// Attachments of a framebuffer
#[derive(Debug, Clone)]
pub struct FramebufferOptions {
    pub label: String,
    pub color_attachments: usize,
    pub color: TextureOptions,
    pub depth: DepthMode,
    pub depth_format: TextureFormat,
}

impl Default for FramebufferOptions {
    fn default() -> Self {
        Self {
            label: "framebuffer".to_string(),
            color_attachments: 1,
            color: TextureOptions::default(),
            depth: DepthMode::Renderbuffer,
            depth_format: TextureFormat::Depth24PlusStencil8,
        }
    }
}

impl FramebufferOptions {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_color_attachments(mut self, count: usize) -> Self {
        self.color_attachments = count;
        self
    }

    pub fn with_color(mut self, color: TextureOptions) -> Self {
        self.color = color;
        self
    }

    pub fn with_depth(mut self, depth: DepthMode) -> Self {
        self.depth = depth;
        self
    }
}

#[derive(Debug)]
enum DepthTarget {
    Texture(Texture),
    Renderbuffer(Renderbuffer),
}

/// An off-screen target owning its attachments
///
/// All attachments always share the framebuffer's size.
#[derive(Debug)]
pub struct Framebuffer {
    handle: FramebufferHandle,
    width: u32,
    height: u32,
    colors: Vec<Texture>,
    depth: Option<DepthTarget>,
    label: String,
}

impl Framebuffer {
    pub fn new(
        ctx: &mut RenderContext,
        width: u32,
        height: u32,
        options: FramebufferOptions,
    ) -> RenderResult<Self> {
        check_size(&options.label, ResourceKind::Framebuffer, width, height)?;

        let mut colors = Vec::with_capacity(options.color_attachments);
        let mut depth = None;
        match Self::create_attachments(ctx, width, height, &options, &mut colors, &mut depth) {
            Ok(handle) => Ok(Self {
                handle,
                width,
                height,
                colors,
                depth,
                label: options.label,
            }),
            Err(err) => {
                log::warn!("Framebuffer `{}` creation failed: {}", options.label, err);
                release_attachments(ctx, colors, depth);
                Err(err)
            }
        }
    }

    fn create_attachments(
        ctx: &mut RenderContext,
        width: u32,
        height: u32,
        options: &FramebufferOptions,
        colors: &mut Vec<Texture>,
        depth: &mut Option<DepthTarget>,
    ) -> RenderResult<FramebufferHandle> {
        for index in 0..options.color_attachments {
            let label = format!("{} color {}", options.label, index);
            colors.push(Texture::render_target(ctx, &label, width, height, options.color)?);
        }

        *depth = match options.depth {
            DepthMode::None => None,
            DepthMode::Texture => {
                let label = format!("{} depth", options.label);
                let depth_options = options.color.with_format(options.depth_format);
                Some(DepthTarget::Texture(Texture::render_target(
                    ctx,
                    &label,
                    width,
                    height,
                    depth_options,
                )?))
            }
            DepthMode::Renderbuffer => Some(DepthTarget::Renderbuffer(Renderbuffer::new(
                ctx,
                width,
                height,
                options.depth_format,
            )?)),
        };

        ctx.create_framebuffer(&FramebufferDescriptor {
            label: Some(options.label.clone()),
            width,
            height,
            color_attachments: colors.iter().map(Texture::handle).collect(),
            depth_attachment: depth.as_ref().map(|d| match d {
                DepthTarget::Texture(t) => DepthAttachment::Texture(t.handle()),
                DepthTarget::Renderbuffer(r) => DepthAttachment::Renderbuffer(r.handle()),
            }),
        })
    }

    /// Make this the active render target and set the viewport to cover it
    pub fn bind(&self, ctx: &mut RenderContext) -> RenderResult<()> {
        ctx.bind_framebuffer(Some(self.handle))?;
        ctx.set_viewport(0, 0, self.width, self.height);
        Ok(())
    }

    /// Return rendering to the screen
    pub fn unbind(&self, ctx: &mut RenderContext) -> RenderResult<()> {
        ctx.bind_framebuffer(None)?;
        let (width, height) = ctx.surface_size();
        ctx.set_viewport(0, 0, width, height);
        Ok(())
    }

    /// Clear the framebuffer; binds it first and leaves it bound
    pub fn clear(&self, ctx: &mut RenderContext, color: [f32; 4]) -> RenderResult<()> {
        self.bind(ctx)?;
        let depth = self.depth.as_ref().map(|_| 1.0);
        ctx.clear(Some(color), depth)
    }

    /// Resize every attachment together; contents are not preserved
    pub fn resize(&mut self, ctx: &mut RenderContext, width: u32, height: u32) -> RenderResult<()> {
        check_size(&self.label, ResourceKind::Framebuffer, width, height)?;
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        for color in &mut self.colors {
            color.resize(ctx, width, height)?;
        }
        match &mut self.depth {
            Some(DepthTarget::Texture(t)) => t.resize(ctx, width, height)?,
            Some(DepthTarget::Renderbuffer(r)) => r.resize(ctx, width, height)?,
            None => {}
        }
        ctx.resize_framebuffer(self.handle, width, height)?;
        log::debug!(
            "Resized framebuffer `{}` from {}x{} to {}x{}",
            self.label,
            self.width,
            self.height,
            width,
            height
        );
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Destroy the framebuffer and every attachment it owns
    pub fn destroy(self, ctx: &mut RenderContext) -> RenderResult<()> {
        ctx.destroy_framebuffer(self.handle)?;
        for color in self.colors {
            color.destroy(ctx)?;
        }
        match self.depth {
            Some(DepthTarget::Texture(t)) => t.destroy(ctx)?,
            Some(DepthTarget::Renderbuffer(r)) => r.destroy(ctx)?,
            None => {}
        }
        Ok(())
    }

    pub fn handle(&self) -> FramebufferHandle {
        self.handle
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn color_texture(&self, index: usize) -> Option<&Texture> {
        self.colors.get(index)
    }

    pub fn color_textures(&self) -> &[Texture] {
        &self.colors
    }

    pub fn depth_texture(&self) -> Option<&Texture> {
        match &self.depth {
            Some(DepthTarget::Texture(t)) => Some(t),
            _ => None,
        }
    }

    pub fn renderbuffer(&self) -> Option<&Renderbuffer> {
        match &self.depth {
            Some(DepthTarget::Renderbuffer(r)) => Some(r),
            _ => None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

fn check_size(label: &str, kind: ResourceKind, width: u32, height: u32) -> RenderResult<()> {
    if width == 0 || height == 0 {
        return Err(RenderError::ResourceCreation {
            kind,
            message: format!("`{}` cannot be {}x{}", label, width, height),
        });
    }
    Ok(())
}

/// Best-effort release of attachments after a failed creation
fn release_attachments(ctx: &mut RenderContext, colors: Vec<Texture>, depth: Option<DepthTarget>) {
    for color in colors {
        let _ = color.destroy(ctx);
    }
    match depth {
        Some(DepthTarget::Texture(t)) => {
            let _ = t.destroy(ctx);
        }
        Some(DepthTarget::Renderbuffer(r)) => {
            let _ = r.destroy(ctx);
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    #[test]
    fn test_bind_sets_viewport() {
        let mut ctx = RenderContext::headless(100, 50);
        let fb = Framebuffer::new(&mut ctx, 32, 16, FramebufferOptions::default()).unwrap();
        fb.bind(&mut ctx).unwrap();
        assert_eq!(ctx.state().viewport, (0, 0, 32, 16));
        fb.unbind(&mut ctx).unwrap();
        assert_eq!(ctx.state().viewport, (0, 0, 100, 50));
        assert_eq!(ctx.state().framebuffer, None);
    }

    #[test]
    fn test_destroy_releases_attachments() {
        let mut ctx = RenderContext::headless(8, 8);
        let fb = Framebuffer::new(
            &mut ctx,
            8,
            8,
            FramebufferOptions::default()
                .with_color_attachments(2)
                .with_depth(DepthMode::Texture),
        )
        .unwrap();
        assert!(fb.depth_texture().is_some());
        assert!(fb.renderbuffer().is_none());
        fb.destroy(&mut ctx).unwrap();
        let backend = ctx.backend::<HeadlessBackend>().unwrap();
        assert_eq!(backend.live_count(ResourceKind::Texture), 0);
        assert_eq!(backend.live_count(ResourceKind::Framebuffer), 0);
    }
}
