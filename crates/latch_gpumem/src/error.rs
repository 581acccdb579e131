use crate::frame::FrameIndex;
use thiserror::Error;

/// Errors returned by allocation, deallocation and frame sync.
///
/// None of these are recoverable by retrying: each one points at a sizing
/// or frame-pacing bug and is expected to propagate up to engine shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("allocation size {requested} is outside 1..={max}")]
    InvalidSize { requested: u64, max: u64 },

    #[error("alignment {align} is not a power of two dividing the segment size")]
    InvalidAlignment { align: u64 },

    #[error("out of memory: no free block of {requested} bytes (largest free block is {largest_free})")]
    OutOfMemory { requested: u64, largest_free: u64 },

    #[error("segment pool exhausted at {segment_count} segments")]
    SegmentsExhausted { segment_count: u32 },

    #[error("frame {frame} maps to a bucket still holding unretired frame {pending_frame}")]
    FrameDistanceExceeded {
        frame: FrameIndex,
        pending_frame: FrameIndex,
    },

    #[error("frame 0 is reserved for idle buckets")]
    ReservedFrame,

    #[error("allocation handle does not belong to this allocator")]
    InvalidHandle,

    #[error("worker {worker} is out of range (allocator has {worker_count} workers)")]
    WorkerOutOfRange { worker: usize, worker_count: usize },
}

/// Errors raised while loading or validating allocator settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid settings: {reason}")]
    Invalid { reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

/// Broken free-list invariant found by `FreeListAllocator::validate`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListViolation {
    #[error("free block at {offset} is not below its successor at {next}")]
    OutOfOrder { offset: u64, next: u64 },

    #[error("free block {offset}..{end} overlaps its successor at {next}")]
    Overlap { offset: u64, end: u64, next: u64 },

    #[error("free block at {offset} touches its successor at {next} without being merged")]
    Unmerged { offset: u64, next: u64 },

    #[error("free block at {offset} has a back-link that does not match its predecessor")]
    BrokenLink { offset: u64 },

    #[error("free block {offset}..{end} extends past the resource end {resource_size}")]
    OutOfBounds {
        offset: u64,
        end: u64,
        resource_size: u64,
    },
}
