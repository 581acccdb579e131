//! General-purpose sub-allocator with frame-gated frees
//!
//! Hands out 16-byte aligned ranges of one backing resource. Freed ranges are
//! parked per retirement frame and only return to the free list once
//! [`FreeListAllocator::sync`] sees that frame completed, so the device never
//! sees a range reused while it may still be reading it.
//!
//! Every operation takes one mutex for its whole duration. Variable-size
//! allocation walks the free list, and this path is expected to be far
//! colder than segment allocation.

mod block_list;

use crate::config::FreeListSettings;
use crate::error::{AllocError, ConfigError, ListViolation};
use crate::frame::FrameIndex;
use crate::frame_ring::FrameRing;
use crate::handle_table::{Handle, HandleTable};
use crate::stats::FreeListStats;
use block_list::BlockList;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

/// Every offset and size handed out is a multiple of this.
pub const ALIGNMENT: u64 = 16;

/// Source of per-allocator owner tags carried by every handle
static NEXT_ALLOCATOR_ID: AtomicU32 = AtomicU32::new(0);

/// Block selection strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitPolicy {
    /// Lowest-addressed block that is large enough
    #[default]
    FirstFit,
    /// Smallest block that is large enough, lowest address on ties
    BestFit,
}

#[derive(Debug, Clone, Copy)]
struct Allocation {
    offset: u64,
    size: u64,
}

/// Exclusive claim on `[offset, offset + size)`.
///
/// Not `Clone`: giving it back through [`FreeListAllocator::dealloc`]
/// consumes it, so a range cannot be freed twice.
#[derive(Debug)]
#[must_use = "dropping the handle leaks its range for the allocator's lifetime"]
pub struct AllocationHandle {
    owner: u32,
    id: Handle<Allocation>,
    offset: u64,
    size: u64,
}

impl AllocationHandle {
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Size after alignment, which may exceed the requested size
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn range(&self) -> Range<u64> {
        self.offset..self.offset + self.size
    }
}

struct FreeListState {
    blocks: BlockList,
    allocations: HandleTable<Allocation>,
    pending: FrameRing<Handle<Allocation>>,
}

pub struct FreeListAllocator {
    id: u32,
    resource_size: u64,
    fit: FitPolicy,
    state: Mutex<FreeListState>,
}

impl FreeListAllocator {
    pub fn new(settings: &FreeListSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            id: NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed),
            resource_size: settings.resource_size,
            fit: settings.fit,
            state: Mutex::new(FreeListState {
                blocks: BlockList::new(settings.resource_size),
                allocations: HandleTable::with_capacity(settings.handle_capacity),
                pending: FrameRing::new(),
            }),
        })
    }

    #[inline]
    pub fn resource_size(&self) -> u64 {
        self.resource_size
    }

    #[inline]
    pub fn fit_policy(&self) -> FitPolicy {
        self.fit
    }

    /// Reserve at least `size` bytes.
    ///
    /// Running out of space is reported as [`AllocError::OutOfMemory`] and is
    /// not worth retrying: only a larger resource fixes it.
    pub fn alloc(&self, size: u64) -> Result<AllocationHandle, AllocError> {
        if size == 0 || size > self.resource_size {
            return Err(AllocError::InvalidSize {
                requested: size,
                max: self.resource_size,
            });
        }
        let size = align_up(size);

        let mut state = self.state.lock();
        let Some(block) = state.blocks.find(size, self.fit) else {
            let largest_free = state.blocks.largest();
            tracing::error!(
                requested = size,
                largest_free,
                free_bytes = state.blocks.free_bytes(),
                "free-list allocator out of memory"
            );
            return Err(AllocError::OutOfMemory {
                requested: size,
                largest_free,
            });
        };

        let offset = state.blocks.take_front(block, size);
        let id = state.allocations.insert(Allocation { offset, size });
        Ok(AllocationHandle {
            owner: self.id,
            id,
            offset,
            size,
        })
    }

    /// Release `handle` once the device has retired `retire_frame`.
    ///
    /// The range stays reserved until [`sync`](Self::sync) is called with a
    /// completed frame at or past `retire_frame`.
    pub fn dealloc(&self, handle: AllocationHandle, retire_frame: FrameIndex) -> Result<(), AllocError> {
        if retire_frame == 0 {
            return Err(AllocError::ReservedFrame);
        }

        if handle.owner != self.id {
            return Err(AllocError::InvalidHandle);
        }

        let mut state = self.state.lock();
        match state.allocations.get(handle.id) {
            Some(record) if record.offset == handle.offset && record.size == handle.size => {}
            _ => return Err(AllocError::InvalidHandle),
        }
        state.pending.push(retire_frame, handle.id)
    }

    /// Return every range whose retirement frame is at or below
    /// `completed_frame` to the free list. Returns the number of ranges released.
    pub fn sync(&self, completed_frame: FrameIndex) -> usize {
        let mut state = self.state.lock();
        let FreeListState {
            blocks,
            allocations,
            pending,
        } = &mut *state;

        let released = pending.retire(completed_frame, |id| match allocations.remove(id) {
            Some(record) => blocks.insert(record.offset, record.size),
            None => debug_assert!(false, "pending allocation {id:?} has no record"),
        });

        if released > 0 {
            tracing::trace!(
                completed_frame,
                released,
                free_bytes = blocks.free_bytes(),
                free_blocks = blocks.len(),
                "free list sync"
            );
        }

        #[cfg(debug_assertions)]
        {
            if let Err(violation) = blocks.validate(self.resource_size) {
                panic!("free list corrupted after sync: {violation}");
            }
        }

        released
    }

    /// Walk the free list and check its invariants.
    pub fn validate(&self) -> Result<(), ListViolation> {
        self.state.lock().blocks.validate(self.resource_size)
    }

    pub fn stats(&self) -> FreeListStats {
        let state = self.state.lock();
        let allocated_bytes = state.allocations.iter().map(|(_, a)| a.size).sum();
        let pending_bytes = state
            .pending
            .iter()
            .filter_map(|(_, &id)| state.allocations.get(id))
            .map(|a| a.size)
            .sum();

        FreeListStats {
            resource_size: self.resource_size,
            free_bytes: state.blocks.free_bytes(),
            free_blocks: state.blocks.len(),
            largest_free_block: state.blocks.largest(),
            allocated_bytes,
            live_allocations: state.allocations.len(),
            pending_allocations: state.pending.len(),
            pending_bytes,
        }
    }

    /// Free ranges in ascending address order
    pub fn free_ranges(&self) -> Vec<Range<u64>> {
        self.state
            .lock()
            .blocks
            .iter()
            .map(|b| b.offset..b.end())
            .collect()
    }
}

#[inline]
fn align_up(size: u64) -> u64 {
    (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}
