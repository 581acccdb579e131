//! Address-ordered, coalescing list of free ranges
//!
//! Nodes live in a [`HandleTable`] and are doubly linked through handles, so
//! splicing and unlinking never move other nodes.

use super::FitPolicy;
use crate::error::ListViolation;
use crate::handle_table::{Handle, HandleTable};

pub(super) type BlockId = Handle<FreeBlock>;

#[derive(Debug, Clone, Copy)]
pub(super) struct FreeBlock {
    pub offset: u64,
    pub size: u64,
    prev: Option<BlockId>,
    next: Option<BlockId>,
}

impl FreeBlock {
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

pub(super) struct BlockList {
    nodes: HandleTable<FreeBlock>,
    head: Option<BlockId>,
    free_bytes: u64,
}

impl BlockList {
    /// One free block spanning `[0, size)`.
    pub fn new(size: u64) -> Self {
        let mut nodes = HandleTable::with_capacity(64);
        let head = nodes.insert(FreeBlock {
            offset: 0,
            size,
            prev: None,
            next: None,
        });
        Self {
            nodes,
            head: Some(head),
            free_bytes: size,
        }
    }

    #[inline]
    pub fn free_bytes(&self) -> u64 {
        self.free_bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    fn walk(&self) -> impl Iterator<Item = (BlockId, &FreeBlock)> {
        std::iter::successors(self.head, move |&id| self.nodes[id].next)
            .map(move |id| (id, &self.nodes[id]))
    }

    /// Free blocks in ascending address order
    pub fn iter(&self) -> impl Iterator<Item = &FreeBlock> {
        self.walk().map(|(_, block)| block)
    }

    pub fn largest(&self) -> u64 {
        self.iter().map(|b| b.size).max().unwrap_or(0)
    }

    /// Pick a block of at least `size` bytes.
    pub fn find(&self, size: u64, fit: FitPolicy) -> Option<BlockId> {
        match fit {
            FitPolicy::FirstFit => self
                .walk()
                .find(|(_, block)| block.size >= size)
                .map(|(id, _)| id),
            FitPolicy::BestFit => {
                let mut best: Option<(BlockId, u64)> = None;
                for (id, block) in self.walk() {
                    if block.size == size {
                        return Some(id);
                    }
                    if block.size > size && best.map_or(true, |(_, s)| block.size < s) {
                        best = Some((id, block.size));
                    }
                }
                best.map(|(id, _)| id)
            }
        }
    }

    /// Carve `size` bytes off the front of block `id` and return their offset.
    /// An exact fit consumes the node.
    pub fn take_front(&mut self, id: BlockId, size: u64) -> u64 {
        let block = &mut self.nodes[id];
        debug_assert!(block.size >= size, "block too small for request");
        let offset = block.offset;
        if block.size == size {
            self.unlink(id);
        } else {
            block.offset += size;
            block.size -= size;
        }
        self.free_bytes -= size;
        offset
    }

    /// Return `[offset, offset + size)` to the list, merging with whichever
    /// neighbours it touches.
    pub fn insert(&mut self, offset: u64, size: u64) {
        debug_assert!(size > 0);

        // First block above the freed range; `prev` trails one behind.
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let block = &self.nodes[id];
            if block.offset > offset {
                break;
            }
            prev = Some(id);
            cursor = block.next;
        }
        let next = cursor;

        debug_assert!(
            prev.map_or(true, |p| self.nodes[p].end() <= offset),
            "freed range at {offset} overlaps a free block"
        );
        debug_assert!(
            next.map_or(true, |n| offset + size <= self.nodes[n].offset),
            "freed range at {offset} overlaps a free block"
        );

        let merge_left = prev.filter(|&p| self.nodes[p].end() == offset);
        let merge_right = next.filter(|&n| self.nodes[n].offset == offset + size);

        match (merge_left, merge_right) {
            (Some(left), Some(right)) => {
                let absorbed = self.nodes[right].size;
                self.nodes[left].size += size + absorbed;
                self.unlink(right);
            }
            (Some(left), None) => {
                self.nodes[left].size += size;
            }
            (None, Some(right)) => {
                let block = &mut self.nodes[right];
                block.offset = offset;
                block.size += size;
            }
            (None, None) => {
                let id = self.nodes.insert(FreeBlock {
                    offset,
                    size,
                    prev,
                    next,
                });
                match prev {
                    Some(p) => self.nodes[p].next = Some(id),
                    None => self.head = Some(id),
                }
                if let Some(n) = next {
                    self.nodes[n].prev = Some(id);
                }
            }
        }
        self.free_bytes += size;
    }

    fn unlink(&mut self, id: BlockId) {
        let Some(block) = self.nodes.remove(id) else {
            return;
        };
        match block.prev {
            Some(p) => self.nodes[p].next = block.next,
            None => self.head = block.next,
        }
        if let Some(n) = block.next {
            self.nodes[n].prev = block.prev;
        }
    }

    /// Check ordering, coalescing, back-links and bounds.
    pub fn validate(&self, resource_size: u64) -> Result<(), ListViolation> {
        let mut prev: Option<(BlockId, &FreeBlock)> = None;
        for (id, block) in self.walk() {
            if block.prev != prev.map(|(p, _)| p) {
                return Err(ListViolation::BrokenLink {
                    offset: block.offset,
                });
            }
            if block.end() > resource_size {
                return Err(ListViolation::OutOfBounds {
                    offset: block.offset,
                    end: block.end(),
                    resource_size,
                });
            }
            if let Some((_, before)) = prev {
                if before.offset >= block.offset {
                    return Err(ListViolation::OutOfOrder {
                        offset: before.offset,
                        next: block.offset,
                    });
                }
                if before.end() > block.offset {
                    return Err(ListViolation::Overlap {
                        offset: before.offset,
                        end: before.end(),
                        next: block.offset,
                    });
                }
                if before.end() == block.offset {
                    return Err(ListViolation::Unmerged {
                        offset: before.offset,
                        next: block.offset,
                    });
                }
            }
            prev = Some((id, block));
        }
        Ok(())
    }
}
