use crate::backing::BackingStore;
use crate::error::AllocError;
use crate::frame_ring::FrameRing;

/// Segment bookkeeping shared by all workers, always accessed under the
/// allocator's mutex.
pub(super) struct SegmentPool {
    /// Stack of free segment indices; the lowest index is popped first
    pub free: Vec<u32>,
    /// Segments the backing resource currently holds
    pub segment_count: u32,
    pub max_segments: u32,
    /// Full or closed segments waiting for their frame to retire
    pub live: FrameRing<u32>,
}

impl SegmentPool {
    pub fn new(initial_segments: u32, max_segments: u32) -> Self {
        debug_assert!(initial_segments <= max_segments);
        Self {
            free: (0..initial_segments).rev().collect(),
            segment_count: initial_segments,
            max_segments,
            live: FrameRing::new(),
        }
    }

    /// Pop a free segment, growing the pool when the stack is empty.
    pub fn acquire(&mut self, backing: &dyn BackingStore) -> Result<u32, AllocError> {
        if let Some(segment) = self.free.pop() {
            return Ok(segment);
        }
        self.grow(backing)?;
        self.free.pop().ok_or(AllocError::SegmentsExhausted {
            segment_count: self.segment_count,
        })
    }

    /// At most double the segment count, capped at `max_segments`.
    fn grow(&mut self, backing: &dyn BackingStore) -> Result<(), AllocError> {
        let old_count = self.segment_count;
        if old_count >= self.max_segments {
            tracing::error!(
                segment_count = old_count,
                "segment pool exhausted and cannot grow"
            );
            return Err(AllocError::SegmentsExhausted {
                segment_count: old_count,
            });
        }

        let new_count = old_count
            .saturating_mul(2)
            .max(old_count + 1)
            .min(self.max_segments);
        tracing::debug!(old_count, new_count, "growing segment pool");

        backing.on_resize(new_count);
        self.free.extend((old_count..new_count).rev());
        self.segment_count = new_count;
        Ok(())
    }
}
