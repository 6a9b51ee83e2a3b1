//! Capture targets for feedback programs

use crate::backend::FeedbackHandle;
use crate::context::RenderContext;
use crate::error::RenderResult;
use crate::resources::GpuBuffer;

/// Buffers a feedback program writes, one per captured varying in order
#[derive(Debug)]
pub struct FeedbackTarget {
    handle: FeedbackHandle,
    buffer_count: usize,
}

impl FeedbackTarget {
    pub fn new(ctx: &mut RenderContext, buffers: &[&GpuBuffer]) -> RenderResult<Self> {
        let handles: Vec<_> = buffers.iter().map(|b| b.handle()).collect();
        let handle = ctx.create_feedback(&handles)?;
        log::debug!("Created feedback target {} over {} buffers", handle.id(), handles.len());
        Ok(Self {
            handle,
            buffer_count: handles.len(),
        })
    }

    pub fn handle(&self) -> FeedbackHandle {
        self.handle
    }

    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    /// Release the target; the buffers stay owned by their creator
    pub fn destroy(self, ctx: &mut RenderContext) -> RenderResult<()> {
        ctx.destroy_feedback(self.handle)
    }
}
