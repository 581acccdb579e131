//! Per-worker bump cursors
//!
//! Each worker owns one slot per frame bucket. Only the owning worker (or
//! `sync`, while no worker is recording that frame) touches a slot, so plain
//! relaxed atomics suffice; the busy flag turns any overlap into a panic
//! instead of two threads bumping the same cursor.

use crate::frame::FrameIndex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

const NO_SEGMENT: u32 = u32::MAX;

/// Segment currently claimed by a worker and its bump cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Active {
    pub frame: FrameIndex,
    pub segment: u32,
    pub cursor: u64,
}

#[repr(align(64))]
pub(super) struct ActiveSlot {
    busy: AtomicBool,
    frame: AtomicU64,
    segment: AtomicU32,
    cursor: AtomicU64,
}

impl ActiveSlot {
    pub fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            frame: AtomicU64::new(0),
            segment: AtomicU32::new(NO_SEGMENT),
            cursor: AtomicU64::new(0),
        }
    }

    /// Take exclusive use of the slot until the guard drops.
    ///
    /// # Panics
    /// If another thread holds the slot, i.e. two threads are running as the
    /// same worker index.
    pub fn claim(&self, worker: usize) -> SlotGuard<'_> {
        if self.busy.swap(true, Ordering::Acquire) {
            panic!("worker slot {worker} claimed by two threads at once");
        }
        SlotGuard { slot: self }
    }

    /// Whether a segment is parked in this slot. Unsynchronized peek for stats.
    pub fn has_segment(&self) -> bool {
        self.segment.load(Ordering::Relaxed) != NO_SEGMENT
    }
}

pub(super) struct SlotGuard<'a> {
    slot: &'a ActiveSlot,
}

impl SlotGuard<'_> {
    pub fn get(&self) -> Option<Active> {
        let segment = self.slot.segment.load(Ordering::Relaxed);
        (segment != NO_SEGMENT).then(|| Active {
            frame: self.slot.frame.load(Ordering::Relaxed),
            segment,
            cursor: self.slot.cursor.load(Ordering::Relaxed),
        })
    }

    pub fn set(&self, active: Active) {
        debug_assert_ne!(active.segment, NO_SEGMENT);
        self.slot.frame.store(active.frame, Ordering::Relaxed);
        self.slot.segment.store(active.segment, Ordering::Relaxed);
        self.slot.cursor.store(active.cursor, Ordering::Relaxed);
    }

    /// Empty the slot, returning what it held.
    pub fn take(&self) -> Option<Active> {
        let active = self.get();
        self.slot.segment.store(NO_SEGMENT, Ordering::Relaxed);
        self.slot.frame.store(0, Ordering::Relaxed);
        self.slot.cursor.store(0, Ordering::Relaxed);
        active
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.slot.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_take_roundtrip() {
        let slot = ActiveSlot::new();
        let guard = slot.claim(0);
        assert_eq!(guard.get(), None);

        let active = Active {
            frame: 3,
            segment: 7,
            cursor: 128,
        };
        guard.set(active);
        assert!(slot.has_segment());
        assert_eq!(guard.take(), Some(active));
        assert_eq!(guard.get(), None);
        assert!(!slot.has_segment());
    }

    #[test]
    fn guard_release_allows_reclaim() {
        let slot = ActiveSlot::new();
        drop(slot.claim(1));
        let _again = slot.claim(1);
    }

    #[test]
    #[should_panic(expected = "claimed by two threads")]
    fn concurrent_claim_panics() {
        let slot = ActiveSlot::new();
        let _first = slot.claim(2);
        let _second = slot.claim(2);
    }
}
