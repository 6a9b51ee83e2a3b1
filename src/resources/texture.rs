//! Textures

use image::{DynamicImage, GenericImageView};

use crate::backend::{
    AddressMode, FilterMode, ResourceKind, TextureDescriptor, TextureFormat, TextureHandle,
    TextureKind,
};
use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};

/// Format and sampling state of a texture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureOptions {
    pub format: TextureFormat,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub wrap: AddressMode,
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self {
            format: TextureFormat::Rgba8Unorm,
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            wrap: AddressMode::ClampToEdge,
        }
    }
}

impl TextureOptions {
    pub fn with_format(mut self, format: TextureFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_filter(mut self, filter: FilterMode) -> Self {
        self.min_filter = filter;
        self.mag_filter = filter;
        self
    }

    pub fn with_wrap(mut self, wrap: AddressMode) -> Self {
        self.wrap = wrap;
        self
    }
}

/// A GPU image: 2D, cube or 3D
#[derive(Debug)]
pub struct Texture {
    handle: TextureHandle,
    desc: TextureDescriptor,
}

impl Texture {
    fn create(ctx: &mut RenderContext, desc: TextureDescriptor) -> RenderResult<Self> {
        let handle = ctx.create_texture(&desc)?;
        Ok(Self { handle, desc })
    }

    fn descriptor(
        label: &str,
        kind: TextureKind,
        width: u32,
        height: u32,
        depth: u32,
        options: TextureOptions,
        render_target: bool,
    ) -> TextureDescriptor {
        TextureDescriptor {
            label: Some(label.to_string()),
            kind,
            width,
            height,
            depth,
            format: options.format,
            min_filter: options.min_filter,
            mag_filter: options.mag_filter,
            wrap: options.wrap,
            render_target,
        }
    }

    /// Empty 2D texture usable as a framebuffer attachment
    pub fn render_target(
        ctx: &mut RenderContext,
        label: &str,
        width: u32,
        height: u32,
        options: TextureOptions,
    ) -> RenderResult<Self> {
        let desc = Self::descriptor(label, TextureKind::D2, width, height, 1, options, true);
        Self::create(ctx, desc)
    }

    /// 2D texture populated from tightly packed pixel data
    pub fn from_pixels(
        ctx: &mut RenderContext,
        label: &str,
        width: u32,
        height: u32,
        pixels: &[u8],
        options: TextureOptions,
    ) -> RenderResult<Self> {
        let desc = Self::descriptor(label, TextureKind::D2, width, height, 1, options, false);
        let texture = Self::create(ctx, desc)?;
        texture.upload(ctx, pixels)?;
        Ok(texture)
    }

    /// 2D texture from an already-decoded image, converted to RGBA8
    pub fn from_image(
        ctx: &mut RenderContext,
        label: &str,
        image: &DynamicImage,
        options: TextureOptions,
    ) -> RenderResult<Self> {
        let (width, height) = image.dimensions();
        let rgba = image.to_rgba8();
        let options = match options.format {
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => options,
            _ => options.with_format(TextureFormat::Rgba8UnormSrgb),
        };
        Self::from_pixels(ctx, label, width, height, rgba.as_raw(), options)
    }

    /// Cube map from six square faces in +X, -X, +Y, -Y, +Z, -Z order
    pub fn cube_from_faces(
        ctx: &mut RenderContext,
        label: &str,
        size: u32,
        faces: [&[u8]; 6],
        options: TextureOptions,
    ) -> RenderResult<Self> {
        let desc = Self::descriptor(label, TextureKind::Cube, size, size, 1, options, false);
        let face_bytes = desc.byte_size() / 6;
        let mut data = Vec::with_capacity(desc.byte_size());
        for (index, face) in faces.iter().enumerate() {
            if face.len() != face_bytes {
                return Err(RenderError::InvalidOperation(format!(
                    "cube `{}` face {} has {} bytes, expected {}",
                    label,
                    index,
                    face.len(),
                    face_bytes
                )));
            }
            data.extend_from_slice(face);
        }
        let texture = Self::create(ctx, desc)?;
        texture.upload(ctx, &data)?;
        Ok(texture)
    }

    /// 3D texture, optionally populated with slice-major voxel data
    pub fn volume(
        ctx: &mut RenderContext,
        label: &str,
        size: (u32, u32, u32),
        voxels: Option<&[u8]>,
        options: TextureOptions,
    ) -> RenderResult<Self> {
        let desc = Self::descriptor(label, TextureKind::D3, size.0, size.1, size.2, options, false);
        let texture = Self::create(ctx, desc)?;
        if let Some(voxels) = voxels {
            texture.upload(ctx, voxels)?;
        }
        Ok(texture)
    }

    /// 1x1 texture of a single color
    pub fn solid_color(ctx: &mut RenderContext, label: &str, color: [u8; 4]) -> RenderResult<Self> {
        Self::from_pixels(ctx, label, 1, 1, &color, TextureOptions::default())
    }

    /// Checkerboard with 8x8 pixel cells
    pub fn checkerboard(
        ctx: &mut RenderContext,
        size: u32,
        color1: [u8; 4],
        color2: [u8; 4],
    ) -> RenderResult<Self> {
        let mut data = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let is_even = ((x / 8) + (y / 8)) % 2 == 0;
                data.extend_from_slice(if is_even { &color1 } else { &color2 });
            }
        }
        let options = TextureOptions::default()
            .with_filter(FilterMode::Nearest)
            .with_wrap(AddressMode::Repeat);
        Self::from_pixels(ctx, "checkerboard", size, size, &data, options)
    }

    /// Replace the whole image
    pub fn upload(&self, ctx: &mut RenderContext, data: &[u8]) -> RenderResult<()> {
        ctx.write_texture(self.handle, data)
    }

    /// Reallocate at a new size; contents are not preserved
    pub fn resize(&mut self, ctx: &mut RenderContext, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            return Err(RenderError::ResourceCreation {
                kind: ResourceKind::Texture,
                message: format!("{:?} cannot be resized to {}x{}", self.desc.label, width, height),
            });
        }
        if self.desc.kind == TextureKind::Cube && width != height {
            return Err(RenderError::InvalidOperation(
                "cube textures must stay square".to_string(),
            ));
        }
        ctx.resize_texture(self.handle, width, height)?;
        self.desc.width = width;
        self.desc.height = height;
        Ok(())
    }

    /// Activate `unit` and bind this texture to it
    pub fn bind(&self, ctx: &mut RenderContext, unit: u32) -> RenderResult<()> {
        ctx.active_texture(unit)?;
        ctx.bind_texture(Some(self.handle))
    }

    pub fn destroy(self, ctx: &mut RenderContext) -> RenderResult<()> {
        ctx.destroy_texture(self.handle)
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.desc.width, self.desc.height)
    }

    pub fn kind(&self) -> TextureKind {
        self.desc.kind
    }

    pub fn format(&self) -> TextureFormat {
        self.desc.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use image::RgbImage;

    #[test]
    fn test_from_image_converts_to_rgba() {
        let mut ctx = RenderContext::headless(8, 8);
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 3, image::Rgb([10, 20, 30])));
        let texture =
            Texture::from_image(&mut ctx, "img", &image, TextureOptions::default()).unwrap();
        assert_eq!(texture.size(), (2, 3));
        let data = ctx
            .backend::<HeadlessBackend>()
            .unwrap()
            .texture_data(texture.handle())
            .unwrap();
        assert_eq!(&data[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_cube_face_size_checked() {
        let mut ctx = RenderContext::headless(8, 8);
        let face = vec![0u8; 2 * 2 * 4];
        let bad = vec![0u8; 3];
        let faces: [&[u8]; 6] = [&face, &face, &face, &face, &face, &bad];
        assert!(Texture::cube_from_faces(&mut ctx, "cube", 2, faces, TextureOptions::default())
            .is_err());
        let faces: [&[u8]; 6] = [&face, &face, &face, &face, &face, &face];
        let cube =
            Texture::cube_from_faces(&mut ctx, "cube", 2, faces, TextureOptions::default()).unwrap();
        assert_eq!(cube.kind(), TextureKind::Cube);
    }
}
