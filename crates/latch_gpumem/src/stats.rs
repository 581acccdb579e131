//! Allocator usage snapshots
//!
//! Diagnostic only; nothing in the allocators reads these back.

use std::fmt;

/// Snapshot of a [`FreeListAllocator`](crate::FreeListAllocator).
///
/// `allocated_bytes + free_bytes == resource_size` at every snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreeListStats {
    pub resource_size: u64,
    pub free_bytes: u64,
    pub free_blocks: usize,
    pub largest_free_block: u64,
    /// Bytes held by allocation records, including ones awaiting retirement
    pub allocated_bytes: u64,
    pub live_allocations: usize,
    pub pending_allocations: usize,
    pub pending_bytes: u64,
}

impl FreeListStats {
    /// Share of free space lost to fragmentation (0 when the free space is one block)
    pub fn fragmentation(&self) -> f64 {
        if self.free_bytes == 0 {
            return 0.0;
        }
        1.0 - self.largest_free_block as f64 / self.free_bytes as f64
    }
}

impl fmt::Display for FreeListStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} bytes allocated ({} live, {} pending), {} free blocks, largest {} ({:.1}% fragmented)",
            self.allocated_bytes,
            self.resource_size,
            self.live_allocations,
            self.pending_allocations,
            self.free_blocks,
            self.largest_free_block,
            self.fragmentation() * 100.0
        )
    }
}

/// Snapshot of a [`SegmentAllocator`](crate::SegmentAllocator).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentStats {
    pub segment_size: u64,
    pub segment_count: u32,
    pub max_segments: u32,
    pub free_segments: usize,
    pub live_segments: usize,
    pub active_segments: usize,
    /// `(live + active) * segment_size`
    pub bytes_in_use: u64,
}

impl fmt::Display for SegmentStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes in use, segments {}/{} (free {}, live {}, active {})",
            self.bytes_in_use,
            self.segment_count,
            self.max_segments,
            self.free_segments,
            self.live_segments,
            self.active_segments
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragmentation_of_single_block_is_zero() {
        let stats = FreeListStats {
            free_bytes: 512,
            largest_free_block: 512,
            ..Default::default()
        };
        assert_eq!(stats.fragmentation(), 0.0);
    }

    #[test]
    fn fragmentation_of_split_space() {
        let stats = FreeListStats {
            free_bytes: 400,
            largest_free_block: 100,
            ..Default::default()
        };
        assert!((stats.fragmentation() - 0.75).abs() < 1e-9);
    }
}
