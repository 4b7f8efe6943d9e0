//! Generational arena used for the job tree.
//!
//! Slots are reused after removal, so every handed-out [`ArenaIndex`] carries
//! the generation it was issued with. A stale index (pointing at a slot that
//! has since been reused) never resolves.

use core::fmt;
use slab::Slab;

/// Index into an [`Arena`]: a slot number plus the generation it was issued at.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaIndex {
    index: u32,
    generation: u32,
}

impl ArenaIndex {
    /// Creates an index from raw parts.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns the slot number.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Returns the generation.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaIndex({}:{})", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: T,
}

/// A slab-backed arena with generation-checked lookups.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Slab<Slot<T>>,
    next_generation: u32,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Slab::new(),
            next_generation: 1,
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the arena holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Inserts a value, returning its index.
    pub fn insert(&mut self, value: T) -> ArenaIndex {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1).max(1);
        let key = self.slots.insert(Slot { generation, value });
        ArenaIndex::new(key as u32, generation)
    }

    /// Inserts a value built from its own index.
    pub fn insert_with(&mut self, f: impl FnOnce(ArenaIndex) -> T) -> ArenaIndex {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1).max(1);
        let entry = self.slots.vacant_entry();
        let index = ArenaIndex::new(entry.key() as u32, generation);
        entry.insert(Slot {
            generation,
            value: f(index),
        });
        index
    }

    /// Returns true if `index` refers to a live entry.
    #[must_use]
    pub fn contains(&self, index: ArenaIndex) -> bool {
        self.get(index).is_some()
    }

    /// Returns a shared reference to the entry at `index`.
    #[must_use]
    pub fn get(&self, index: ArenaIndex) -> Option<&T> {
        self.slots
            .get(index.index as usize)
            .filter(|slot| slot.generation == index.generation)
            .map(|slot| &slot.value)
    }

    /// Returns a mutable reference to the entry at `index`.
    pub fn get_mut(&mut self, index: ArenaIndex) -> Option<&mut T> {
        self.slots
            .get_mut(index.index as usize)
            .filter(|slot| slot.generation == index.generation)
            .map(|slot| &mut slot.value)
    }

    /// Removes and returns the entry at `index`.
    pub fn remove(&mut self, index: ArenaIndex) -> Option<T> {
        if !self.contains(index) {
            return None;
        }
        Some(self.slots.remove(index.index as usize).value)
    }

    /// Iterates over live entries.
    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> {
        self.slots.iter().map(|(key, slot)| {
            (
                ArenaIndex::new(key as u32, slot.generation),
                &slot.value,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.remove(b), Some("b"));
        assert_eq!(arena.get(b), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn stale_index_does_not_resolve_after_reuse() {
        let mut arena = Arena::new();
        let first = arena.insert(1);
        arena.remove(first);
        let second = arena.insert(2);
        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());
        assert_eq!(arena.get(first), None);
        assert_eq!(arena.remove(first), None);
        assert_eq!(arena.get(second), Some(&2));
    }

    #[test]
    fn insert_with_sees_own_index() {
        let mut arena = Arena::new();
        let idx = arena.insert_with(|idx| idx);
        assert_eq!(arena.get(idx), Some(&idx));
    }
}
