//! Generation-checked slot map
//!
//! Slots are either occupied by a value or threaded onto an intrusive free
//! list, so insertion and removal are O(1) and freed slots are recycled.
//! Every removal bumps the slot generation, turning outstanding handles to
//! that slot into misses instead of aliases of whatever is stored next.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// Typed handle into a [`HandleTable`].
///
/// Format: [32-bit index | 32-bit generation]
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

enum Slot<T> {
    Free { next: Option<u32> },
    Occupied(T),
}

struct Entry<T> {
    generation: u32,
    slot: Slot<T>,
}

pub struct HandleTable<T> {
    entries: Vec<Entry<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free_head: None,
            len: 0,
        }
    }

    /// Number of occupied slots
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Slots the table can hold before its storage reallocates
    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    pub fn insert(&mut self, value: T) -> Handle<T> {
        self.len += 1;
        if let Some(index) = self.free_head {
            let entry = &mut self.entries[index as usize];
            self.free_head = match entry.slot {
                Slot::Free { next } => next,
                Slot::Occupied(_) => unreachable!("free list points at an occupied slot"),
            };
            entry.slot = Slot::Occupied(value);
            return Handle::new(index, entry.generation);
        }

        let index = u32::try_from(self.entries.len()).expect("handle table exceeded u32 slots");
        self.entries.push(Entry {
            generation: 0,
            slot: Slot::Occupied(value),
        });
        Handle::new(index, 0)
    }

    /// Remove the value behind `handle`, invalidating every copy of it.
    /// Returns `None` if the handle is stale or was never issued here.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        let entry = self.entries.get_mut(handle.index as usize)?;
        if entry.generation != handle.generation || matches!(entry.slot, Slot::Free { .. }) {
            return None;
        }

        let freed = std::mem::replace(
            &mut entry.slot,
            Slot::Free {
                next: self.free_head,
            },
        );
        entry.generation = entry.generation.wrapping_add(1);
        self.free_head = Some(handle.index);
        self.len -= 1;

        match freed {
            Slot::Occupied(value) => Some(value),
            Slot::Free { .. } => None,
        }
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        match self.entries.get(handle.index as usize) {
            Some(Entry {
                generation,
                slot: Slot::Occupied(value),
            }) if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        match self.entries.get_mut(handle.index as usize) {
            Some(Entry {
                generation,
                slot: Slot::Occupied(value),
            }) if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    /// Iterate occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match &entry.slot {
                Slot::Occupied(value) => Some((Handle::new(index as u32, entry.generation), value)),
                Slot::Free { .. } => None,
            })
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Panics on stale handles. Reserved for handles the caller's own
/// bookkeeping guarantees are live.
impl<T> Index<Handle<T>> for HandleTable<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        self.get(handle).expect("stale handle")
    }
}

impl<T> IndexMut<Handle<T>> for HandleTable<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        self.get_mut(handle).expect("stale handle")
    }
}
