//! Common types shared between backends

use bytemuck::{Pod, Zeroable};
use glam::{IVec2, IVec3, IVec4, Mat3, Mat4, Vec2, Vec3, Vec4};

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
    Depth24PlusStencil8,
    R32Float,
    Rg32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8
        )
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8
            | TextureFormat::R32Float => 4,
            TextureFormat::Rgba16Float | TextureFormat::Rg32Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

/// Texture dimensionality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureKind {
    #[default]
    D2,
    /// Six square 2D faces in +X, -X, +Y, -Y, +Z, -Z order
    Cube,
    D3,
}

impl TextureKind {
    /// Number of array layers the backend allocates for this kind
    pub fn layers(&self, depth: u32) -> u32 {
        match self {
            TextureKind::D2 => 1,
            TextureKind::Cube => 6,
            TextureKind::D3 => depth.max(1),
        }
    }
}

/// What a buffer is bound as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
}

/// Upload frequency hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UsageHint {
    /// Uploaded once at creation; partial re-uploads are rejected
    #[default]
    Static,
    /// Re-uploaded over the buffer's lifetime
    Dynamic,
}

/// Texture descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: TextureFormat,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub wrap: AddressMode,
    /// Whether the texture may be used as a framebuffer attachment
    pub render_target: bool,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            kind: TextureKind::D2,
            width: 1,
            height: 1,
            depth: 1,
            format: TextureFormat::Rgba8Unorm,
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            wrap: AddressMode::ClampToEdge,
            render_target: false,
        }
    }
}

impl TextureDescriptor {
    /// Size in bytes of the full image (all faces / slices)
    pub fn byte_size(&self) -> usize {
        (self.width * self.height * self.kind.layers(self.depth) * self.format.bytes_per_pixel())
            as usize
    }
}

/// Buffer descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub kind: BufferKind,
    pub hint: UsageHint,
}

/// Scalar type of a vertex attribute component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    F32,
    U32,
    I32,
    U16,
    U8,
}

impl ComponentType {
    pub fn size(&self) -> u64 {
        match self {
            ComponentType::F32 | ComponentType::U32 | ComponentType::I32 => 4,
            ComponentType::U16 => 2,
            ComponentType::U8 => 1,
        }
    }
}

/// One attribute slot of a vertex layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Shader input location
    pub location: u32,
    pub buffer: crate::backend::BufferHandle,
    pub components: u8,
    pub component_type: ComponentType,
    pub normalized: bool,
    /// Byte distance between consecutive elements; never zero once built
    pub stride: u64,
    pub offset: u64,
    /// 0 advances per vertex, 1 advances per instance
    pub divisor: u32,
}

impl VertexAttribute {
    pub fn element_size(&self) -> u64 {
        self.components as u64 * self.component_type.size()
    }
}

/// Standard vertex with position, normal and UV
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Front face winding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontFace {
    Ccw,
    Cw,
}

/// Cull mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

/// Compare function for depth/stencil
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    Src,
    OneMinusSrc,
    SrcAlpha,
    OneMinusSrcAlpha,
    Dst,
    OneMinusDst,
    DstAlpha,
    OneMinusDstAlpha,
}

/// Blend operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOperation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// Blend component state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub operation: BlendOperation,
}

impl Default for BlendComponent {
    fn default() -> Self {
        Self {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::Zero,
            operation: BlendOperation::Add,
        }
    }
}

/// Blend state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

impl BlendState {
    pub fn alpha_blending() -> Self {
        Self {
            color: BlendComponent {
                src_factor: BlendFactor::SrcAlpha,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
                operation: BlendOperation::Add,
            },
            alpha: BlendComponent {
                src_factor: BlendFactor::One,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
                operation: BlendOperation::Add,
            },
        }
    }

    pub fn additive() -> Self {
        Self {
            color: BlendComponent {
                src_factor: BlendFactor::One,
                dst_factor: BlendFactor::One,
                operation: BlendOperation::Add,
            },
            alpha: BlendComponent::default(),
        }
    }
}

/// Shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// Filter mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Address mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub fn size(&self) -> u64 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// Type of a named uniform as declared by a shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    IVec2,
    IVec3,
    IVec4,
    UInt,
    Mat3,
    Mat4,
}

/// A value for a named uniform
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Int(i32),
    IVec2(IVec2),
    IVec3(IVec3),
    IVec4(IVec4),
    UInt(u32),
    Mat3(Mat3),
    Mat4(Mat4),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Vec2(_) => UniformKind::Vec2,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Vec4(_) => UniformKind::Vec4,
            UniformValue::Int(_) => UniformKind::Int,
            UniformValue::IVec2(_) => UniformKind::IVec2,
            UniformValue::IVec3(_) => UniformKind::IVec3,
            UniformValue::IVec4(_) => UniformKind::IVec4,
            UniformValue::UInt(_) => UniformKind::UInt,
            UniformValue::Mat3(_) => UniformKind::Mat3,
            UniformValue::Mat4(_) => UniformKind::Mat4,
        }
    }

    /// Raw component bytes, tightly packed, column-major for matrices
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            UniformValue::Float(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Vec2(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Vec3(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Vec4(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Int(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::IVec2(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::IVec3(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::IVec4(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::UInt(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Mat3(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Mat4(v) => bytemuck::bytes_of(v).to_vec(),
        }
    }

    /// Bytes laid out for the uniform address space: mat3 columns padded to
    /// vec4 and the total rounded up to 16 bytes.
    pub fn to_uniform_bytes(&self) -> Vec<u8> {
        let mut bytes = match self {
            UniformValue::Mat3(m) => {
                let mut out = Vec::with_capacity(48);
                for col in [m.x_axis, m.y_axis, m.z_axis] {
                    out.extend_from_slice(bytemuck::bytes_of(&col.extend(0.0)));
                }
                out
            }
            _ => self.to_bytes(),
        };
        let padded = bytes.len().div_ceil(16) * 16;
        bytes.resize(padded, 0);
        bytes
    }

    /// Same variant and bit-identical payload. `NaN` payloads compare by
    /// bits, and `0.0` differs from `-0.0`.
    pub fn bit_eq(&self, other: &UniformValue) -> bool {
        self.kind() == other.kind() && self.to_bytes() == other.to_bytes()
    }
}

macro_rules! impl_uniform_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for UniformValue {
                fn from(value: $ty) -> Self {
                    UniformValue::$variant(value)
                }
            }
        )*
    };
}

impl_uniform_from! {
    f32 => Float,
    Vec2 => Vec2,
    Vec3 => Vec3,
    Vec4 => Vec4,
    i32 => Int,
    IVec2 => IVec2,
    IVec3 => IVec3,
    IVec4 => IVec4,
    u32 => UInt,
    Mat3 => Mat3,
    Mat4 => Mat4,
}

impl From<[f32; 2]> for UniformValue {
    fn from(value: [f32; 2]) -> Self {
        UniformValue::Vec2(Vec2::from(value))
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(value: [f32; 3]) -> Self {
        UniformValue::Vec3(Vec3::from(value))
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(value: [f32; 4]) -> Self {
        UniformValue::Vec4(Vec4::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_byte_size() {
        let desc = TextureDescriptor {
            width: 4,
            height: 4,
            kind: TextureKind::Cube,
            ..Default::default()
        };
        assert_eq!(desc.byte_size(), 4 * 4 * 6 * 4);
    }

    #[test]
    fn test_uniform_bit_eq() {
        assert!(UniformValue::Float(1.0).bit_eq(&UniformValue::Float(1.0)));
        assert!(!UniformValue::Float(0.0).bit_eq(&UniformValue::Float(-0.0)));
        assert!(UniformValue::Float(f32::NAN).bit_eq(&UniformValue::Float(f32::NAN)));
        assert!(!UniformValue::Int(1).bit_eq(&UniformValue::UInt(1)));
    }

    #[test]
    fn test_uniform_bytes_padding() {
        assert_eq!(UniformValue::Float(2.0).to_uniform_bytes().len(), 16);
        assert_eq!(UniformValue::Vec3(Vec3::ONE).to_uniform_bytes().len(), 16);
        assert_eq!(UniformValue::Mat3(Mat3::IDENTITY).to_uniform_bytes().len(), 48);
        assert_eq!(UniformValue::Mat4(Mat4::IDENTITY).to_uniform_bytes().len(), 64);
    }
}
