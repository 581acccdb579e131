//! wgpu buffer behind a segment allocator
//!
//! Growing a GPU buffer in place is not possible, so a resize creates a larger
//! buffer, copies the old contents on the queue and swaps it in. Offsets handed
//! out before the resize stay valid because segments only ever get appended.

use crate::context::GpuContext;
use crate::RenderError;
use latch_gpumem::{BackingStore, SegmentSettings};
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;

pub struct WgpuSegmentBacking {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    segment_size: u64,
    usage: wgpu::BufferUsages,
    buffer: RwLock<wgpu::Buffer>,
}

impl WgpuSegmentBacking {
    /// Allocate room for the initial segments of `settings`.
    ///
    /// The full `resource_size` is checked against the device limit up front,
    /// since growth happens inside the allocator and cannot report failure.
    pub fn new(
        ctx: &GpuContext,
        settings: &SegmentSettings,
        usage: wgpu::BufferUsages,
    ) -> Result<Self, RenderError> {
        let limit = ctx.capabilities.max_buffer_size;
        if settings.resource_size > limit {
            return Err(RenderError::BufferTooLarge {
                requested: settings.resource_size,
                limit,
            });
        }

        // Resizing copies the old contents over
        let usage = usage | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
        let initial = u64::from(settings.initial_segment_count.max(1)) * settings.segment_size;
        let buffer = ctx.create_buffer("segment backing", initial, usage)?;

        Ok(Self {
            device: Arc::clone(&ctx.device),
            queue: Arc::clone(&ctx.queue),
            segment_size: settings.segment_size,
            usage,
            buffer: RwLock::new(buffer),
        })
    }

    /// Current buffer. Hold the guard only while recording; a resize waits for it.
    pub fn buffer(&self) -> RwLockReadGuard<'_, wgpu::Buffer> {
        self.buffer.read()
    }

    pub fn size(&self) -> u64 {
        self.buffer.read().size()
    }
}

impl BackingStore for WgpuSegmentBacking {
    fn on_resize(&self, new_segment_count: u32) {
        let new_size = u64::from(new_segment_count) * self.segment_size;
        let mut buffer = self.buffer.write();
        let old_size = buffer.size();
        if new_size <= old_size {
            return;
        }

        let grown = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("segment backing"),
            size: new_size,
            usage: self.usage,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("segment backing resize"),
            });
        encoder.copy_buffer_to_buffer(&buffer, 0, &grown, 0, old_size);
        self.queue.submit(std::iter::once(encoder.finish()));

        tracing::debug!(old_size, new_size, new_segment_count, "segment backing resized");
        // The old buffer is kept alive by wgpu until the copy has executed
        *buffer = grown;
    }
}
