//! Latch GPU Memory
//!
//! Sub-allocation of GPU buffers for a renderer that records several frames
//! ahead of the device:
//! - Free-list allocator (arbitrary sizes, coalescing, frame-gated frees)
//! - Segment allocator (per-worker bump allocation from fixed-size segments)
//! - Frame clock and frame-bucket bookkeeping shared by both
//!
//! Neither allocator touches buffer contents; they only partition byte ranges
//! of a resource owned by the device layer, and only hand a range out again
//! once the frame that last used it has retired.
//!
//! ```ignore
//! let clock = FrameClock::new();
//! let meshes = FreeListAllocator::new(&settings.free_list)?;
//! let transient = SegmentAllocator::new(&settings.segments, Arc::new(NullBacking))?;
//!
//! let frame = clock.begin_frame();
//! let vertices = meshes.alloc(4096)?;
//! let constants = transient.alloc(WorkerContext::new(worker, frame), 256)?;
//! // ... record and submit ...
//! meshes.dealloc(vertices, frame)?;
//! transient.sync(frame, clock.completed())?;
//! meshes.sync(clock.completed());
//! ```

pub mod backing;
pub mod config;
pub mod error;
pub mod frame;
pub mod free_list;
pub mod handle_table;
pub mod segment;
pub mod stats;

mod frame_ring;

pub use backing::{BackingStore, NullBacking};
pub use config::{FreeListSettings, GpuMemSettings, SegmentSettings};
pub use error::{AllocError, ConfigError, ListViolation};
pub use frame::{FrameClock, FrameIndex, WorkerContext, MAX_FRAMES};
pub use free_list::{AllocationHandle, FitPolicy, FreeListAllocator, ALIGNMENT};
pub use handle_table::{Handle, HandleTable};
pub use segment::SegmentAllocator;
pub use stats::{FreeListStats, SegmentStats};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }

    /// Both allocators paced by one clock, the way the renderer drives them.
    #[test]
    fn frame_loop_with_both_allocators() {
        let settings = GpuMemSettings {
            free_list: FreeListSettings {
                resource_size: 1 << 20,
                ..Default::default()
            },
            segments: SegmentSettings {
                resource_size: 1 << 20,
                segment_size: 4096,
                initial_segment_count: 2,
                worker_count: 2,
            },
        };
        let clock = FrameClock::new();
        let meshes = FreeListAllocator::new(&settings.free_list).unwrap();
        let transient = SegmentAllocator::new(&settings.segments, Arc::new(NullBacking)).unwrap();

        let mut resident = Vec::new();
        for _ in 0..40 {
            assert!(clock.has_capacity());
            let frame = clock.begin_frame();

            resident.push(meshes.alloc(1000 + frame * 8).unwrap());
            for worker in 0..2 {
                for _ in 0..10 {
                    transient.alloc(WorkerContext::new(worker, frame), 300).unwrap();
                }
            }
            if resident.len() > 4 {
                meshes.dealloc(resident.remove(0), frame).unwrap();
            }

            // Device runs two frames behind
            clock.mark_completed(frame.saturating_sub(2));
            transient.sync(frame, clock.completed()).unwrap();
            meshes.sync(clock.completed());
        }

        let stats = meshes.stats();
        assert_eq!(stats.allocated_bytes + stats.free_bytes, stats.resource_size);
        assert_eq!(stats.live_allocations, resident.len() + stats.pending_allocations);
        // Only the last two frames' segments are still held
        assert!(transient.collect_stats().live_segments <= 2 * 2 * 2);
    }
}
