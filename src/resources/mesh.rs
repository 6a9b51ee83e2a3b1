//! Mesh data and GPU geometry

use glam::{Vec2, Vec3};

use crate::backend::{BufferKind, IndexFormat, PrimitiveTopology, UsageHint, Vertex};
use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::resources::{GpuBuffer, VertexLayout};

/// Shader location of each standard attribute
pub const POSITION_LOCATION: u32 = 0;
pub const NORMAL_LOCATION: u32 = 1;
pub const UV_LOCATION: u32 = 2;

/// Flat, already-decoded vertex arrays as supplied by loaders and generators
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub name: String,
    /// xyz per vertex
    pub positions: Vec<f32>,
    /// xyz per vertex, empty when absent
    pub normals: Vec<f32>,
    /// uv per vertex, empty when absent
    pub uvs: Vec<f32>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    fn push(&mut self, position: Vec3, normal: Vec3, uv: Vec2) {
        self.positions.extend_from_slice(&position.to_array());
        self.normals.extend_from_slice(&normal.to_array());
        self.uvs.extend_from_slice(&uv.to_array());
    }

    /// Interleave into [`Vertex`] records, zero-filling missing attributes
    pub fn interleaved(&self) -> Vec<Vertex> {
        (0..self.vertex_count())
            .map(|i| Vertex {
                position: Vec3::from_slice(&self.positions[i * 3..i * 3 + 3]),
                normal: self
                    .normals
                    .get(i * 3..i * 3 + 3)
                    .map(Vec3::from_slice)
                    .unwrap_or(Vec3::ZERO),
                uv: self
                    .uvs
                    .get(i * 2..i * 2 + 2)
                    .map(Vec2::from_slice)
                    .unwrap_or(Vec2::ZERO),
            })
            .collect()
    }

    /// Check array lengths and index bounds
    pub fn validate(&self) -> Result<(), String> {
        if self.positions.len() % 3 != 0 {
            return Err(format!("`{}`: positions are not xyz triples", self.name));
        }
        let count = self.vertex_count();
        if !self.normals.is_empty() && self.normals.len() != count * 3 {
            return Err(format!("`{}`: normal count does not match positions", self.name));
        }
        if !self.uvs.is_empty() && self.uvs.len() != count * 2 {
            return Err(format!("`{}`: uv count does not match positions", self.name));
        }
        if let Some(index) = self.indices.iter().find(|&&i| i as usize >= count) {
            return Err(format!("`{}`: index {} out of range", self.name, index));
        }
        Ok(())
    }

    /// Single triangle in the XY plane
    pub fn triangle() -> Self {
        let mut mesh = MeshData::new("triangle");
        mesh.push(Vec3::new(-0.5, -0.5, 0.0), Vec3::Z, Vec2::new(0.0, 1.0));
        mesh.push(Vec3::new(0.5, -0.5, 0.0), Vec3::Z, Vec2::new(1.0, 1.0));
        mesh.push(Vec3::new(0.0, 0.5, 0.0), Vec3::Z, Vec2::new(0.5, 0.0));
        mesh.indices.extend_from_slice(&[0, 1, 2]);
        mesh
    }

    /// Unit cube centered at origin
    pub fn cube() -> Self {
        let mut mesh = MeshData::new("cube");
        let faces = [
            (Vec3::Z, Vec3::X),
            (-Vec3::Z, -Vec3::X),
            (Vec3::X, -Vec3::Z),
            (-Vec3::X, Vec3::Z),
            (Vec3::Y, Vec3::X),
            (-Vec3::Y, Vec3::X),
        ];
        for (normal, right) in faces {
            let up = normal.cross(right);
            let base = mesh.vertex_count() as u32;
            let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
            for (u, v) in corners {
                let position = (normal + right * u + up * v) * 0.5;
                mesh.push(position, normal, Vec2::new((u + 1.0) * 0.5, (1.0 - v) * 0.5));
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        mesh
    }

    /// UV sphere of radius 0.5
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let mut mesh = MeshData::new("sphere");
        let segments = segments.max(3);
        let rings = rings.max(2);
        let segment_angle = std::f32::consts::TAU / segments as f32;
        let ring_angle = std::f32::consts::PI / rings as f32;

        for ring in 0..=rings {
            let phi = ring as f32 * ring_angle;
            for segment in 0..=segments {
                let theta = segment as f32 * segment_angle;
                let normal = Vec3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin());
                let uv = Vec2::new(segment as f32 / segments as f32, ring as f32 / rings as f32);
                mesh.push(normal * 0.5, normal, uv);
            }
        }

        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * (segments + 1) + segment;
                let next = current + segments + 1;
                mesh.indices.extend_from_slice(&[
                    current,
                    current + 1,
                    next,
                    current + 1,
                    next + 1,
                    next,
                ]);
            }
        }
        mesh
    }

    /// Subdivided plane on the XZ axis
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let mut mesh = MeshData::new("plane");
        let subdivisions = subdivisions.max(1);
        let step = 1.0 / subdivisions as f32;

        for z in 0..=subdivisions {
            for x in 0..=subdivisions {
                let u = x as f32 * step;
                let v = z as f32 * step;
                let position = Vec3::new((u - 0.5) * width, 0.0, (v - 0.5) * depth);
                mesh.push(position, Vec3::Y, Vec2::new(u, v));
            }
        }

        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let current = z * (subdivisions + 1) + x;
                let next = current + subdivisions + 1;
                mesh.indices.extend_from_slice(&[
                    current,
                    next,
                    current + 1,
                    current + 1,
                    next,
                    next + 1,
                ]);
            }
        }
        mesh
    }
}

/// A vertex layout plus optional index buffer, ready to draw
#[derive(Debug)]
pub struct Geometry {
    layout: VertexLayout,
    index: Option<(GpuBuffer, IndexFormat)>,
    buffers: Vec<GpuBuffer>,
    vertex_count: u32,
}

impl Geometry {
    /// Wrap an existing layout. Buffers referenced by the layout stay owned by the caller.
    pub fn new(layout: VertexLayout, index: Option<(GpuBuffer, IndexFormat)>, vertex_count: u32) -> Self {
        Self {
            layout,
            index,
            buffers: Vec::new(),
            vertex_count,
        }
    }

    /// Upload mesh data as one interleaved buffer at the standard locations
    pub fn from_mesh(ctx: &mut RenderContext, mesh: &MeshData) -> RenderResult<Self> {
        mesh.validate().map_err(RenderError::InvalidOperation)?;
        let vertices = mesh.interleaved();
        let buffer = GpuBuffer::new(ctx, BufferKind::Vertex, &vertices, UsageHint::Static)?;
        let stride = std::mem::size_of::<Vertex>() as u64;
        let layout = match VertexLayout::builder(mesh.name.clone())
            .interleaved(
                &buffer,
                stride,
                &[
                    (POSITION_LOCATION, 3, 0),
                    (NORMAL_LOCATION, 3, 12),
                    (UV_LOCATION, 2, 24),
                ],
            )
            .build(ctx)
        {
            Ok(layout) => layout,
            Err(err) => {
                let _ = buffer.destroy(ctx);
                return Err(err);
            }
        };
        let index = if mesh.indices.is_empty() {
            None
        } else {
            match GpuBuffer::new(ctx, BufferKind::Index, &mesh.indices, UsageHint::Static) {
                Ok(indices) => Some((indices, IndexFormat::Uint32)),
                Err(err) => {
                    let _ = layout.destroy(ctx);
                    let _ = buffer.destroy(ctx);
                    return Err(err);
                }
            }
        };
        log::debug!(
            "Uploaded mesh `{}` ({} vertices, {} indices)",
            mesh.name,
            mesh.vertex_count(),
            mesh.index_count()
        );
        Ok(Self {
            layout,
            index,
            buffers: vec![buffer],
            vertex_count: vertices.len() as u32,
        })
    }

    /// Bind layout and index buffer, issue the draw, then unbind
    pub fn draw(
        &self,
        ctx: &mut RenderContext,
        topology: PrimitiveTopology,
        instances: u32,
    ) -> RenderResult<()> {
        self.layout.bind(ctx)?;
        let result = match &self.index {
            Some((buffer, format)) => {
                ctx.bind_index_buffer(Some((buffer.handle(), *format)))?;
                let count = buffer.len() as u32;
                let result = ctx.draw_indexed(topology, 0, count, instances);
                ctx.bind_index_buffer(None)?;
                result
            }
            None => ctx.draw(topology, 0, self.vertex_count, instances),
        };
        self.layout.unbind(ctx)?;
        result
    }

    /// Destroy the layout first, then every buffer this geometry owns
    pub fn destroy(self, ctx: &mut RenderContext) -> RenderResult<()> {
        self.layout.destroy(ctx)?;
        if let Some((buffer, _)) = self.index {
            buffer.destroy(ctx)?;
        }
        for buffer in self.buffers {
            buffer.destroy(ctx)?;
        }
        Ok(())
    }

    pub fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> Option<u32> {
        self.index.as_ref().map(|(b, _)| b.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_mesh() {
        let mesh = MeshData::cube();
        assert_eq!(mesh.vertex_count(), 24);
        assert_eq!(mesh.index_count(), 36);
        assert!(mesh.validate().is_ok());
        for vertex in mesh.interleaved() {
            assert!((vertex.position.length() - 0.75f32.sqrt()).abs() < 1e-5);
            assert!(vertex.position.dot(vertex.normal) > 0.0);
        }
    }

    #[test]
    fn test_sphere_mesh() {
        let mesh = MeshData::sphere(16, 8);
        assert_eq!(mesh.vertex_count(), 17 * 9);
        assert_eq!(mesh.index_count(), 16 * 8 * 6);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_index() {
        let mut mesh = MeshData::triangle();
        mesh.indices.push(3);
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn test_geometry_from_mesh() {
        let mut ctx = RenderContext::headless(8, 8);
        let geometry = Geometry::from_mesh(&mut ctx, &MeshData::plane(2.0, 2.0, 2)).unwrap();
        assert_eq!(geometry.vertex_count(), 9);
        assert_eq!(geometry.index_count(), Some(24));
        assert_eq!(geometry.layout().attributes().len(), 3);
        geometry.destroy(&mut ctx).unwrap();
    }
}
