//! Frame-indexed ring of pending work
//!
//! Holds items that must outlive a frame's GPU execution. Each bucket is
//! tagged with the frame that filled it; tag 0 means idle.

use crate::error::AllocError;
use crate::frame::{bucket_of, FrameIndex, MAX_FRAMES};

struct FrameBucket<T> {
    frame: FrameIndex,
    items: Vec<T>,
}

pub(crate) struct FrameRing<T> {
    buckets: [FrameBucket<T>; MAX_FRAMES],
}

impl<T> FrameRing<T> {
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| FrameBucket {
                frame: 0,
                items: Vec::new(),
            }),
        }
    }

    /// Queue `item` until `frame` retires.
    ///
    /// Fails if the bucket still belongs to an older frame that has not been
    /// retired yet, meaning the CPU ran more than `MAX_FRAMES` ahead.
    pub fn push(&mut self, frame: FrameIndex, item: T) -> Result<(), AllocError> {
        if frame == 0 {
            return Err(AllocError::ReservedFrame);
        }
        let bucket = &mut self.buckets[bucket_of(frame)];
        if bucket.frame != 0 && bucket.frame != frame {
            tracing::error!(
                frame,
                pending_frame = bucket.frame,
                "frame bucket reused before its frame retired"
            );
            return Err(AllocError::FrameDistanceExceeded {
                frame,
                pending_frame: bucket.frame,
            });
        }
        bucket.frame = frame;
        bucket.items.push(item);
        Ok(())
    }

    /// Drain every bucket whose frame is at or below `completed` through
    /// `release`, oldest frame first, and mark those buckets idle.
    /// Returns the number of items released.
    pub fn retire(&mut self, completed: FrameIndex, mut release: impl FnMut(T)) -> usize {
        let mut order: Vec<usize> = (0..MAX_FRAMES)
            .filter(|&i| {
                let frame = self.buckets[i].frame;
                frame != 0 && frame <= completed
            })
            .collect();
        order.sort_unstable_by_key(|&i| self.buckets[i].frame);

        let mut released = 0;
        for i in order {
            let bucket = &mut self.buckets[i];
            released += bucket.items.len();
            bucket.items.drain(..).for_each(&mut release);
            bucket.frame = 0;
        }
        released
    }

    /// Total items waiting across all buckets
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.items.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FrameIndex, &T)> {
        self.buckets
            .iter()
            .flat_map(|b| b.items.iter().map(move |item| (b.frame, item)))
    }
}
