//! Frame clock and worker identity
//!
//! Submission epochs are numbered from 1. Frame 0 is never submitted and marks
//! an idle frame bucket.

use std::sync::atomic::{AtomicU64, Ordering};

/// Submission epoch identifier
pub type FrameIndex = u64;

/// Number of frame buckets tracked by both allocators.
///
/// The CPU may run at most this many frames ahead of the last frame the
/// device reported as retired.
pub const MAX_FRAMES: usize = 8;

/// Bucket slot for a frame
#[inline]
pub const fn bucket_of(frame: FrameIndex) -> usize {
    (frame % MAX_FRAMES as u64) as usize
}

/// Identity of the calling worker, passed explicitly into every
/// segment allocation instead of being read from thread-local state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct WorkerContext {
    /// Index assigned by the job scheduler (0-based, dense)
    pub worker: usize,
    /// Frame currently being recorded
    pub frame: FrameIndex,
}

impl WorkerContext {
    pub const fn new(worker: usize, frame: FrameIndex) -> Self {
        Self { worker, frame }
    }
}

/// Submission/retirement tracker shared between the frame loop and the
/// device layer.
///
/// The frame loop opens frames with [`FrameClock::begin_frame`]; the device
/// reports retirement with [`FrameClock::mark_completed`], typically from a
/// queue completion callback on another thread.
pub struct FrameClock {
    current: AtomicU64,
    completed: AtomicU64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self {
            current: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        }
    }

    /// Open the next frame and return its index (the first frame is 1).
    pub fn begin_frame(&self) -> FrameIndex {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Most recently opened frame (0 before the first frame).
    pub fn current(&self) -> FrameIndex {
        self.current.load(Ordering::Acquire)
    }

    /// Highest frame the device has finished executing.
    pub fn completed(&self) -> FrameIndex {
        self.completed.load(Ordering::Acquire)
    }

    /// Record that the device retired `frame`. Completion callbacks may
    /// arrive out of order, so the watermark only moves forward.
    pub fn mark_completed(&self, frame: FrameIndex) {
        self.completed.fetch_max(frame, Ordering::AcqRel);
    }

    pub fn frames_in_flight(&self) -> u64 {
        self.current().saturating_sub(self.completed())
    }

    /// Whether another frame can be opened without reusing a frame bucket
    /// that may still hold unretired work.
    pub fn has_capacity(&self) -> bool {
        self.frames_in_flight() < MAX_FRAMES as u64
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
