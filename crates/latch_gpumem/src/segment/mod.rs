//! Per-worker bump allocation from fixed-size segments
//!
//! Built for many small transient allocations per frame (per-draw constants
//! and the like). Each worker bumps a cursor inside a segment it alone owns,
//! touching only its own slot; the shared mutex is taken only when a segment
//! fills up or a new one is needed.
//!
//! Segment lifecycle:
//!
//! ```text
//! Free --alloc--> Active --full / frame closed--> Live --frame retired--> Free
//! ```

mod active;
mod pool;

use crate::backing::BackingStore;
use crate::config::SegmentSettings;
use crate::error::{AllocError, ConfigError};
use crate::frame::{bucket_of, FrameIndex, WorkerContext, MAX_FRAMES};
use crate::stats::SegmentStats;
use active::{Active, ActiveSlot};
use parking_lot::Mutex;
use pool::SegmentPool;
use std::sync::Arc;

pub struct SegmentAllocator {
    segment_size: u64,
    /// One cursor slot per worker per frame bucket
    workers: Box<[[ActiveSlot; MAX_FRAMES]]>,
    pool: Mutex<SegmentPool>,
    backing: Arc<dyn BackingStore>,
}

impl SegmentAllocator {
    /// The backing store must already hold `initial_segment_count` segments;
    /// it is only asked to grow past that.
    pub fn new(settings: &SegmentSettings, backing: Arc<dyn BackingStore>) -> Result<Self, ConfigError> {
        settings.validate()?;
        // validate() guarantees the count fits below u32::MAX
        let max_segments = settings.max_segments() as u32;

        let workers = (0..settings.worker_count)
            .map(|_| std::array::from_fn(|_| ActiveSlot::new()))
            .collect();

        Ok(Self {
            segment_size: settings.segment_size,
            workers,
            pool: Mutex::new(SegmentPool::new(settings.initial_segment_count, max_segments)),
            backing,
        })
    }

    #[inline]
    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    #[inline]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn segment_count(&self) -> u32 {
        self.pool.lock().segment_count
    }

    /// Bump-allocate `size` bytes for `ctx.worker` in frame `ctx.frame` and
    /// return the absolute byte offset into the backing resource.
    pub fn alloc(&self, ctx: WorkerContext, size: u64) -> Result<u64, AllocError> {
        self.alloc_aligned(ctx, size, 1)
    }

    /// Like [`alloc`](Self::alloc), with the returned offset rounded up to
    /// `align` (a power of two dividing the segment size).
    pub fn alloc_aligned(&self, ctx: WorkerContext, size: u64, align: u64) -> Result<u64, AllocError> {
        if !align.is_power_of_two() || self.segment_size % align != 0 {
            return Err(AllocError::InvalidAlignment { align });
        }
        if size == 0 || size > self.segment_size {
            return Err(AllocError::InvalidSize {
                requested: size,
                max: self.segment_size,
            });
        }
        if ctx.frame == 0 {
            return Err(AllocError::ReservedFrame);
        }

        let slot = self.slot(ctx)?;
        let guard = slot.claim(ctx.worker);
        let current = guard.get();

        if let Some(active) = current {
            if active.frame != ctx.frame {
                tracing::error!(
                    worker = ctx.worker,
                    frame = ctx.frame,
                    open_frame = active.frame,
                    "worker still holds a segment from a frame that was never synced"
                );
                return Err(AllocError::FrameDistanceExceeded {
                    frame: ctx.frame,
                    pending_frame: active.frame,
                });
            }
            let start = align_up(active.cursor, align);
            if start + size <= self.segment_size {
                guard.set(Active {
                    cursor: start + size,
                    ..active
                });
                return Ok(self.offset_of(active.segment, start));
            }
        }

        // Slow path: retire the full segment (if any) and claim a fresh one.
        let segment = {
            let mut pool = self.pool.lock();
            if let Some(full) = current {
                pool.live.push(ctx.frame, full.segment)?;
                guard.take();
            }
            pool.acquire(&*self.backing)?
        };
        guard.set(Active {
            frame: ctx.frame,
            segment,
            cursor: size,
        });
        Ok(self.offset_of(segment, 0))
    }

    /// Claim a whole segment for `frame` and register it as live right away.
    /// Returns the segment's starting offset.
    pub fn alloc_full_segment(&self, frame: FrameIndex) -> Result<u64, AllocError> {
        if frame == 0 {
            return Err(AllocError::ReservedFrame);
        }
        let mut pool = self.pool.lock();
        let segment = pool.acquire(&*self.backing)?;
        if let Err(err) = pool.live.push(frame, segment) {
            pool.free.push(segment);
            return Err(err);
        }
        Ok(self.offset_of(segment, 0))
    }

    /// Advance the frame pipeline.
    ///
    /// Segments of every frame at or below `completed_frame` go back to the
    /// free stack, then every worker's segment for `current_frame` is closed
    /// out and registered as live until that frame retires. No worker may be
    /// allocating for `current_frame` while this runs.
    ///
    /// Returns the number of segments released.
    pub fn sync(&self, current_frame: FrameIndex, completed_frame: FrameIndex) -> Result<usize, AllocError> {
        if current_frame == 0 {
            return Err(AllocError::ReservedFrame);
        }
        let mut pool = self.pool.lock();

        let SegmentPool { free, live, .. } = &mut *pool;
        let released = live.retire(completed_frame, |segment| free.push(segment));

        let bucket = bucket_of(current_frame);
        let mut closed = 0;
        for (worker, slots) in self.workers.iter().enumerate() {
            let guard = slots[bucket].claim(worker);
            if let Some(active) = guard.get() {
                // Keep the segment parked in the slot if the live ring refuses it
                pool.live.push(active.frame, active.segment)?;
                guard.take();
                closed += 1;
            }
        }

        tracing::trace!(
            current_frame,
            completed_frame,
            released,
            closed,
            free_segments = pool.free.len(),
            "segment sync"
        );
        Ok(released)
    }

    /// Bytes held by live and active segments across all tracked frames.
    pub fn collect_stats(&self) -> SegmentStats {
        let pool = self.pool.lock();
        let active_segments = self
            .workers
            .iter()
            .flatten()
            .filter(|slot| slot.has_segment())
            .count();
        let live_segments = pool.live.len();

        SegmentStats {
            segment_size: self.segment_size,
            segment_count: pool.segment_count,
            max_segments: pool.max_segments,
            free_segments: pool.free.len(),
            live_segments,
            active_segments,
            bytes_in_use: (live_segments + active_segments) as u64 * self.segment_size,
        }
    }

    fn slot(&self, ctx: WorkerContext) -> Result<&ActiveSlot, AllocError> {
        self.workers
            .get(ctx.worker)
            .map(|slots| &slots[bucket_of(ctx.frame)])
            .ok_or(AllocError::WorkerOutOfRange {
                worker: ctx.worker,
                worker_count: self.workers.len(),
            })
    }

    #[inline]
    fn offset_of(&self, segment: u32, within: u64) -> u64 {
        u64::from(segment) * self.segment_size + within
    }
}

#[inline]
fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::NullBacking;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn allocator(resource_size: u64, segment_size: u64, initial: u32, workers: usize) -> SegmentAllocator {
        SegmentAllocator::new(
            &SegmentSettings {
                resource_size,
                segment_size,
                initial_segment_count: initial,
                worker_count: workers,
            },
            Arc::new(NullBacking),
        )
        .unwrap()
    }

    #[test]
    fn bump_then_spill_into_next_segment() {
        let alloc = allocator(1024, 256, 4, 1);
        let ctx = WorkerContext::new(0, 1);

        assert_eq!(alloc.alloc(ctx, 100).unwrap(), 0);
        // 100 + 200 does not fit in 256: segment 0 goes live, segment 1 opens
        assert_eq!(alloc.alloc(ctx, 200).unwrap(), 256);
        assert_eq!(alloc.alloc(ctx, 56).unwrap(), 456);

        let stats = alloc.collect_stats();
        assert_eq!(stats.live_segments, 1);
        assert_eq!(stats.active_segments, 1);
        assert_eq!(stats.free_segments, 2);
        assert_eq!(stats.bytes_in_use, 512);

        // Frame 1 is not complete yet: nothing comes back, segment 1 closes
        assert_eq!(alloc.sync(1, 0).unwrap(), 0);
        let stats = alloc.collect_stats();
        assert_eq!(stats.live_segments, 2);
        assert_eq!(stats.active_segments, 0);

        assert_eq!(alloc.sync(2, 1).unwrap(), 2);
        let stats = alloc.collect_stats();
        assert_eq!(stats.free_segments, 4);
        assert_eq!(stats.bytes_in_use, 0);
    }

    #[test]
    fn segments_are_not_reused_before_retirement() {
        let alloc = allocator(1024, 256, 2, 1);
        let first = alloc.alloc(WorkerContext::new(0, 1), 256).unwrap();
        alloc.sync(1, 0).unwrap();

        let second = alloc.alloc(WorkerContext::new(0, 2), 256).unwrap();
        assert_ne!(first / 256, second / 256);
        alloc.sync(2, 1).unwrap();

        // Segment 0 retired with frame 1 and is the next one popped
        let third = alloc.alloc(WorkerContext::new(0, 3), 16).unwrap();
        assert_eq!(third, first);
    }

    #[test]
    fn aligned_allocations() {
        let alloc = allocator(4096, 1024, 1, 1);
        let ctx = WorkerContext::new(0, 1);
        assert_eq!(alloc.alloc(ctx, 10).unwrap(), 0);
        assert_eq!(alloc.alloc_aligned(ctx, 10, 256).unwrap(), 256);
        assert_eq!(alloc.alloc(ctx, 1).unwrap(), 266);
        assert_eq!(alloc.alloc_aligned(ctx, 700, 256).unwrap(), 1024);

        assert_eq!(
            alloc.alloc_aligned(ctx, 10, 3).unwrap_err(),
            AllocError::InvalidAlignment { align: 3 }
        );
        assert_eq!(
            alloc.alloc_aligned(ctx, 10, 2048).unwrap_err(),
            AllocError::InvalidAlignment { align: 2048 }
        );
    }

    #[test]
    fn growth_calls_backing_and_stops_at_cap() {
        let resized = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&resized);
        let alloc = SegmentAllocator::new(
            &SegmentSettings {
                resource_size: 4 * 64,
                segment_size: 64,
                initial_segment_count: 1,
                worker_count: 1,
            },
            Arc::new(move |count: u32| seen.store(count, Ordering::Relaxed)),
        )
        .unwrap();

        for i in 0..4 {
            assert_eq!(alloc.alloc_full_segment(1).unwrap(), i * 64);
        }
        assert_eq!(resized.load(Ordering::Relaxed), 4);
        assert_eq!(alloc.segment_count(), 4);
        assert_eq!(
            alloc.alloc_full_segment(1).unwrap_err(),
            AllocError::SegmentsExhausted { segment_count: 4 }
        );
        assert_eq!(
            alloc.alloc(WorkerContext::new(0, 1), 8).unwrap_err(),
            AllocError::SegmentsExhausted { segment_count: 4 }
        );

        alloc.sync(1, 1).unwrap();
        assert_eq!(alloc.collect_stats().free_segments, 4);
    }

    #[test]
    fn full_segments_are_live_immediately() {
        let alloc = allocator(1024, 256, 4, 1);
        let offset = alloc.alloc_full_segment(3).unwrap();
        assert_eq!(offset, 0);
        let stats = alloc.collect_stats();
        assert_eq!(stats.live_segments, 1);
        assert_eq!(stats.active_segments, 0);

        assert_eq!(alloc.sync(3, 2).unwrap(), 0);
        assert_eq!(alloc.sync(4, 3).unwrap(), 1);
    }

    #[test]
    fn rejects_bad_requests() {
        let alloc = allocator(1024, 256, 4, 2);
        assert_eq!(
            alloc.alloc(WorkerContext::new(0, 1), 0).unwrap_err(),
            AllocError::InvalidSize { requested: 0, max: 256 }
        );
        assert!(matches!(
            alloc.alloc(WorkerContext::new(0, 1), 257),
            Err(AllocError::InvalidSize { .. })
        ));
        assert_eq!(
            alloc.alloc(WorkerContext::new(2, 1), 8).unwrap_err(),
            AllocError::WorkerOutOfRange {
                worker: 2,
                worker_count: 2
            }
        );
        assert_eq!(
            alloc.alloc(WorkerContext::new(0, 0), 8).unwrap_err(),
            AllocError::ReservedFrame
        );
        assert_eq!(alloc.alloc_full_segment(0).unwrap_err(), AllocError::ReservedFrame);
    }

    #[test]
    fn unsynced_frame_blocks_bucket_reuse() {
        let alloc = allocator(4096, 256, 4, 1);
        alloc.alloc(WorkerContext::new(0, 1), 8).unwrap();

        let late = 1 + MAX_FRAMES as u64;
        assert_eq!(
            alloc.alloc(WorkerContext::new(0, late), 8).unwrap_err(),
            AllocError::FrameDistanceExceeded {
                frame: late,
                pending_frame: 1
            }
        );
    }

    #[test]
    fn live_bucket_overflow_is_fatal() {
        let alloc = allocator(4096, 256, 4, 1);
        alloc.alloc_full_segment(2).unwrap();
        // Frame 2 never retired; frame 10 maps to the same bucket
        assert_eq!(
            alloc.alloc_full_segment(2 + MAX_FRAMES as u64).unwrap_err(),
            AllocError::FrameDistanceExceeded {
                frame: 2 + MAX_FRAMES as u64,
                pending_frame: 2
            }
        );
        assert_eq!(alloc.collect_stats().live_segments, 1);
    }

    #[test]
    fn failed_close_keeps_segment_accounted() {
        let alloc = allocator(4096, 256, 4, 1);
        alloc.alloc(WorkerContext::new(0, 1), 8).unwrap();
        // Frame 9 claims the live bucket that frame 1 needs at close
        alloc.alloc_full_segment(1 + MAX_FRAMES as u64).unwrap();

        assert_eq!(
            alloc.sync(1, 0).unwrap_err(),
            AllocError::FrameDistanceExceeded {
                frame: 1,
                pending_frame: 1 + MAX_FRAMES as u64
            }
        );
        let stats = alloc.collect_stats();
        assert_eq!(stats.active_segments, 1);
        assert_eq!(stats.live_segments, 1);
        assert_eq!(
            stats.free_segments + stats.live_segments + stats.active_segments,
            stats.segment_count as usize
        );
    }

    #[test]
    fn workers_never_share_segments() {
        const WORKERS: usize = 4;
        let alloc = allocator(64 * 1024 * 1024, 4096, 4, WORKERS);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(WORKERS)
            .build()
            .unwrap();

        for frame in 1..=20u64 {
            let per_worker: Vec<Vec<(u64, u64)>> = pool.broadcast(|ctx| {
                let wc = WorkerContext::new(ctx.index(), frame);
                (0..300u64)
                    .map(|i| {
                        let size = 16 + (i * 37 + ctx.index() as u64 * 11) % 500;
                        (alloc.alloc(wc, size).unwrap(), size)
                    })
                    .collect()
            });

            // Segment exclusivity: no segment shows up under two workers
            let mut owner = HashMap::new();
            for (worker, ranges) in per_worker.iter().enumerate() {
                for &(offset, _) in ranges {
                    let segment = offset / 4096;
                    assert_eq!(*owner.entry(segment).or_insert(worker), worker);
                }
            }

            // Disjointness across all workers
            let mut ranges: Vec<(u64, u64)> = per_worker.into_iter().flatten().collect();
            ranges.sort_unstable();
            for pair in ranges.windows(2) {
                assert!(pair[0].0 + pair[0].1 <= pair[1].0);
            }
            for &(offset, size) in &ranges {
                assert_eq!(offset / 4096, (offset + size - 1) / 4096, "allocation crosses a segment");
            }

            alloc.sync(frame, frame.saturating_sub(2)).unwrap();
        }

        let stats = alloc.collect_stats();
        assert_eq!(stats.active_segments, 0);
        assert!(stats.segment_count > 4);
        alloc.sync(21, 20).unwrap();
        let stats = alloc.collect_stats();
        assert_eq!(stats.live_segments, 0);
        assert_eq!(stats.free_segments as u32, stats.segment_count);
    }
}
