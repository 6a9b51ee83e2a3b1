//! Vertex layout objects

use crate::backend::{
    BufferHandle, ComponentType, VertexAttribute, VertexLayoutDescriptor, VertexLayoutHandle,
};
use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::resources::GpuBuffer;

/// Binds one or more buffers to shader input locations
///
/// A layout must not outlive the buffers it reads: binding it after one of
/// them was destroyed is an invalid binding.
#[derive(Debug)]
pub struct VertexLayout {
    handle: VertexLayoutHandle,
    attributes: Vec<VertexAttribute>,
    vertex_count: u32,
}

/// Builder for [`VertexLayout`]
#[derive(Debug)]
pub struct VertexLayoutBuilder {
    label: String,
    attributes: Vec<VertexAttribute>,
    vertex_count: Option<u32>,
    derived_count: Option<u32>,
}

impl VertexLayout {
    pub fn builder(label: impl Into<String>) -> VertexLayoutBuilder {
        VertexLayoutBuilder {
            label: label.into(),
            attributes: Vec::new(),
            vertex_count: None,
            derived_count: None,
        }
    }

    pub fn bind(&self, ctx: &mut RenderContext) -> RenderResult<()> {
        ctx.bind_vertex_layout(Some(self.handle))
    }

    pub fn unbind(&self, ctx: &mut RenderContext) -> RenderResult<()> {
        ctx.bind_vertex_layout(None)
    }

    /// Destroys the layout only; the buffers it reads stay alive
    pub fn destroy(self, ctx: &mut RenderContext) -> RenderResult<()> {
        ctx.destroy_vertex_layout(self.handle)
    }

    pub fn handle(&self) -> VertexLayoutHandle {
        self.handle
    }

    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    /// Per-vertex element count of the shortest per-vertex attribute
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn buffers(&self) -> Vec<BufferHandle> {
        let mut buffers: Vec<_> = self.attributes.iter().map(|a| a.buffer).collect();
        buffers.sort();
        buffers.dedup();
        buffers
    }
}

impl VertexLayoutBuilder {
    /// Add a fully specified attribute
    pub fn attribute(mut self, attribute: VertexAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    fn track_count(&mut self, buffer: &GpuBuffer, stride: u64, offset: u64, components: u8) {
        let element = components as u64 * 4;
        let count = match buffer.byte_size().checked_sub(offset + element) {
            Some(rest) => (rest / stride.max(1) + 1) as u32,
            None => 0,
        };
        self.derived_count = Some(self.derived_count.map_or(count, |c| c.min(count)));
    }

    /// Tightly packed `f32` attribute advancing per vertex
    pub fn float_attribute(mut self, location: u32, buffer: &GpuBuffer, components: u8) -> Self {
        self.track_count(buffer, components as u64 * 4, 0, components);
        self.attribute(VertexAttribute {
            location,
            buffer: buffer.handle(),
            components,
            component_type: ComponentType::F32,
            normalized: false,
            stride: components as u64 * 4,
            offset: 0,
            divisor: 0,
        })
    }

    /// Tightly packed `f32` attribute advancing per instance
    pub fn instanced_attribute(self, location: u32, buffer: &GpuBuffer, components: u8) -> Self {
        self.attribute(VertexAttribute {
            location,
            buffer: buffer.handle(),
            components,
            component_type: ComponentType::F32,
            normalized: false,
            stride: components as u64 * 4,
            offset: 0,
            divisor: 1,
        })
    }

    /// Several `f32` attributes interleaved in one buffer, as
    /// `(location, components, byte offset)`
    pub fn interleaved(mut self, buffer: &GpuBuffer, stride: u64, fields: &[(u32, u8, u64)]) -> Self {
        for &(location, components, offset) in fields {
            self.track_count(buffer, stride, offset, components);
            self.attributes.push(VertexAttribute {
                location,
                buffer: buffer.handle(),
                components,
                component_type: ComponentType::F32,
                normalized: false,
                stride,
                offset,
                divisor: 0,
            });
        }
        self
    }

    /// Override the vertex count derived from buffer sizes
    pub fn vertex_count(mut self, count: u32) -> Self {
        self.vertex_count = Some(count);
        self
    }

    pub fn build(self, ctx: &mut RenderContext) -> RenderResult<VertexLayout> {
        let mut seen = std::collections::HashSet::new();
        for attribute in &self.attributes {
            if !seen.insert(attribute.location) {
                return Err(RenderError::InvalidOperation(format!(
                    "layout `{}` binds location {} twice",
                    self.label, attribute.location
                )));
            }
            if !(1..=4).contains(&attribute.components) {
                return Err(RenderError::InvalidOperation(format!(
                    "layout `{}`: location {} has {} components",
                    self.label, attribute.location, attribute.components
                )));
            }
            if attribute.stride == 0 {
                return Err(RenderError::InvalidOperation(format!(
                    "layout `{}`: location {} has a zero stride",
                    self.label, attribute.location
                )));
            }
        }

        let handle = ctx.create_vertex_layout(&VertexLayoutDescriptor {
            label: Some(self.label.clone()),
            attributes: self.attributes.clone(),
        })?;
        log::debug!(
            "Built vertex layout `{}` with {} attributes",
            self.label,
            self.attributes.len()
        );
        Ok(VertexLayout {
            handle,
            attributes: self.attributes,
            vertex_count: self.vertex_count.or(self.derived_count).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BufferKind, UsageHint};

    #[test]
    fn test_interleaved_layout() {
        let mut ctx = RenderContext::headless(8, 8);
        let buffer =
            GpuBuffer::new(&mut ctx, BufferKind::Vertex, &[0.0f32; 24], UsageHint::Static).unwrap();
        let layout = VertexLayout::builder("interleaved")
            .interleaved(&buffer, 32, &[(0, 3, 0), (1, 3, 12), (2, 2, 24)])
            .build(&mut ctx)
            .unwrap();
        assert_eq!(layout.attributes().len(), 3);
        assert_eq!(layout.buffers(), vec![buffer.handle()]);
        assert_eq!(layout.vertex_count(), 3);
    }

    #[test]
    fn test_duplicate_location_rejected() {
        let mut ctx = RenderContext::headless(8, 8);
        let buffer =
            GpuBuffer::new(&mut ctx, BufferKind::Vertex, &[0.0f32; 8], UsageHint::Static).unwrap();
        let result = VertexLayout::builder("dup")
            .float_attribute(0, &buffer, 4)
            .float_attribute(0, &buffer, 4)
            .build(&mut ctx);
        assert!(result.is_err());
    }
}
