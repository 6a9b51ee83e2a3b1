//! GPU buffers

use bytemuck::Pod;

use crate::backend::{BufferDescriptor, BufferHandle, BufferKind, UsageHint};
use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};

/// Offsets and lengths of buffer writes must be multiples of this
pub const WRITE_ALIGNMENT: u64 = 4;

fn align_up(size: u64) -> u64 {
    size.div_ceil(WRITE_ALIGNMENT) * WRITE_ALIGNMENT
}

/// A contiguous block of GPU memory holding `len` elements of one type
///
/// Buffers are never freed implicitly; call [`GpuBuffer::destroy`].
#[derive(Debug)]
pub struct GpuBuffer {
    handle: BufferHandle,
    kind: BufferKind,
    hint: UsageHint,
    len: usize,
    element_size: usize,
}

impl GpuBuffer {
    /// Create a buffer holding `data`
    ///
    /// Storage is padded to a multiple of [`WRITE_ALIGNMENT`] bytes so any
    /// element range can be rewritten with aligned writes.
    pub fn new<T: Pod>(
        ctx: &mut RenderContext,
        kind: BufferKind,
        data: &[T],
        hint: UsageHint,
    ) -> RenderResult<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let handle = ctx.create_buffer(
            &BufferDescriptor {
                label: Some(format!("{:?} buffer", kind)),
                size: align_up(bytes.len() as u64),
                kind,
                hint,
            },
            Some(bytes),
        )?;
        Ok(Self {
            handle,
            kind,
            hint,
            len: data.len(),
            element_size: std::mem::size_of::<T>(),
        })
    }

    /// Create a buffer of `len` zeroed elements
    pub fn zeroed<T: Pod>(
        ctx: &mut RenderContext,
        kind: BufferKind,
        len: usize,
        hint: UsageHint,
    ) -> RenderResult<Self> {
        let element_size = std::mem::size_of::<T>();
        let handle = ctx.create_buffer(
            &BufferDescriptor {
                label: Some(format!("{:?} buffer", kind)),
                size: align_up((len * element_size) as u64),
                kind,
                hint,
            },
            None,
        )?;
        Ok(Self {
            handle,
            kind,
            hint,
            len,
            element_size,
        })
    }

    fn upload(&self, ctx: &mut RenderContext, offset: u64, bytes: &[u8]) -> RenderResult<()> {
        ctx.bind_buffer(self.kind, Some(self.handle))?;
        let result = ctx.write_buffer(self.kind, offset, bytes);
        ctx.bind_buffer(self.kind, None)?;
        result
    }

    /// Re-upload part of a dynamic buffer starting at element `offset`
    pub fn update<T: Pod>(
        &mut self,
        ctx: &mut RenderContext,
        offset: usize,
        data: &[T],
    ) -> RenderResult<()> {
        if self.hint != UsageHint::Dynamic {
            return Err(RenderError::InvalidOperation(
                "static buffers cannot be updated after creation".to_string(),
            ));
        }
        if std::mem::size_of::<T>() != self.element_size {
            return Err(RenderError::InvalidOperation(format!(
                "buffer holds {}-byte elements, update uses {}-byte elements",
                self.element_size,
                std::mem::size_of::<T>()
            )));
        }
        if offset + data.len() > self.len {
            return Err(RenderError::InvalidOperation(format!(
                "update of {} elements at {} overflows a buffer of {}",
                data.len(),
                offset,
                self.len
            )));
        }
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let start = (offset * self.element_size) as u64;
        let end = start + bytes.len() as u64;
        if start % WRITE_ALIGNMENT == 0 && end % WRITE_ALIGNMENT == 0 {
            return self.upload(ctx, start, bytes);
        }

        // Widen to aligned bounds, keeping the neighbouring bytes
        let window_start = start - start % WRITE_ALIGNMENT;
        let window_end = align_up(end);
        let current = ctx.read_buffer(self.handle)?;
        let mut window = current
            .get(window_start as usize..window_end as usize)
            .ok_or_else(|| {
                RenderError::InvalidOperation(format!(
                    "buffer storage is {} bytes, update needs {}",
                    current.len(),
                    window_end
                ))
            })?
            .to_vec();
        let patch = (start - window_start) as usize;
        window[patch..patch + bytes.len()].copy_from_slice(bytes);
        self.upload(ctx, window_start, &window)
    }

    /// Read the buffer back as elements of `T`
    pub fn read<T: Pod>(&self, ctx: &mut RenderContext) -> RenderResult<Vec<T>> {
        let mut bytes = ctx.read_buffer(self.handle)?;
        bytes.truncate(self.len * self.element_size);
        let size = std::mem::size_of::<T>();
        Ok(bytes
            .chunks_exact(size)
            .map(bytemuck::pod_read_unaligned::<T>)
            .collect())
    }

    pub fn bind(&self, ctx: &mut RenderContext) -> RenderResult<()> {
        ctx.bind_buffer(self.kind, Some(self.handle))
    }

    pub fn unbind(&self, ctx: &mut RenderContext) -> RenderResult<()> {
        ctx.bind_buffer(self.kind, None)
    }

    pub fn destroy(self, ctx: &mut RenderContext) -> RenderResult<()> {
        ctx.destroy_buffer(self.handle)
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn hint(&self) -> UsageHint {
        self.hint
    }

    /// Element count
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn byte_size(&self) -> u64 {
        (self.len * self.element_size) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    #[test]
    fn test_upload_leaves_slot_unbound() {
        let mut ctx = RenderContext::headless(8, 8);
        let buffer =
            GpuBuffer::new(&mut ctx, BufferKind::Vertex, &[1.0f32, 2.0, 3.0], UsageHint::Static)
                .unwrap();
        assert_eq!(buffer.len(), 3);
        assert!(ctx.state().buffers.get(&BufferKind::Vertex).is_none());
        let data = ctx
            .backend::<HeadlessBackend>()
            .unwrap()
            .buffer_data(buffer.handle())
            .unwrap();
        assert_eq!(data, bytemuck::cast_slice::<f32, u8>(&[1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_static_buffer_rejects_update() {
        let mut ctx = RenderContext::headless(8, 8);
        let mut buffer =
            GpuBuffer::new(&mut ctx, BufferKind::Vertex, &[0u32; 4], UsageHint::Static).unwrap();
        assert!(matches!(
            buffer.update(&mut ctx, 0, &[1u32]),
            Err(RenderError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_odd_length_u16_buffer() {
        let mut ctx = RenderContext::headless(8, 8);
        let mut buffer =
            GpuBuffer::new(&mut ctx, BufferKind::Index, &[0u16, 1, 2], UsageHint::Dynamic)
                .unwrap();
        assert_eq!(buffer.byte_size(), 6);
        assert_eq!(buffer.read::<u16>(&mut ctx).unwrap(), vec![0, 1, 2]);

        buffer.update(&mut ctx, 1, &[7u16]).unwrap();
        assert_eq!(buffer.read::<u16>(&mut ctx).unwrap(), vec![0, 7, 2]);
        buffer.update(&mut ctx, 2, &[9u16]).unwrap();
        assert_eq!(buffer.read::<u16>(&mut ctx).unwrap(), vec![0, 7, 9]);
        buffer.update(&mut ctx, 0, &[4u16, 5, 6]).unwrap();
        assert_eq!(buffer.read::<u16>(&mut ctx).unwrap(), vec![4, 5, 6]);
        assert!(buffer.update(&mut ctx, 2, &[1u16, 1]).is_err());

        let backend = ctx.backend::<HeadlessBackend>().unwrap();
        assert_eq!(backend.buffer_data(buffer.handle()).unwrap().len(), 8);
    }

    #[test]
    fn test_dynamic_update_and_read() {
        let mut ctx = RenderContext::headless(8, 8);
        let mut buffer =
            GpuBuffer::new(&mut ctx, BufferKind::Vertex, &[0u32; 4], UsageHint::Dynamic).unwrap();
        buffer.update(&mut ctx, 2, &[9u32, 10]).unwrap();
        assert_eq!(buffer.read::<u32>(&mut ctx).unwrap(), vec![0, 0, 9, 10]);
        assert!(buffer.update(&mut ctx, 3, &[1u32, 2]).is_err());
    }
}
