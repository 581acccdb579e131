//! Growth hook toward the device layer
//!
//! The allocators only reason about byte ranges. Whoever owns the actual GPU
//! buffer implements [`BackingStore`] so the segment pool can ask for more
//! room when it grows.

/// Storage behind a [`SegmentAllocator`](crate::SegmentAllocator).
pub trait BackingStore: Send + Sync {
    /// Grow the backing resource to hold `new_segment_count` segments.
    ///
    /// Runs with the segment pool lock held; segments past the old count are
    /// handed out as soon as this returns.
    fn on_resize(&self, new_segment_count: u32);
}

/// Backing that needs no resizing (the resource was created at full size,
/// or nothing reads it, as in tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBacking;

impl BackingStore for NullBacking {
    fn on_resize(&self, _new_segment_count: u32) {}
}

impl<F> BackingStore for F
where
    F: Fn(u32) + Send + Sync,
{
    fn on_resize(&self, new_segment_count: u32) {
        self(new_segment_count)
    }
}
