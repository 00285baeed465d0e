//! Fixed-capacity arenas that hand out integer handles instead of references.
//!
//! An [`Arena`] owns a bounded collection of same-typed values. Allocating from it
//! returns a small copyable [`Handle`] which can later be exchanged for a reference
//! through the arena. Values are never freed individually; they live until the
//! arena itself is dropped.
//!
//! This makes the arena a good fit for graph-shaped data structures whose nodes
//! reference each other: nodes store handles instead of pointers, so a stale
//! reference can at worst address the wrong node, never freed memory.

use core::fmt;
use core::marker::PhantomData;
use thiserror::Error;

/// The error returned when an [`Arena`] has no free slots left.
#[derive(Debug, Error, Eq, PartialEq)]
#[error("the arena is full ({capacity} slots allocated)")]
pub struct ArenaFull {
    /// The configured capacity of the arena that rejected the allocation
    pub capacity: usize,
}

/// A handle to a value stored in an [`Arena`].
///
/// Handles are only meaningful together with the arena that issued them.
/// Exchanging handles between different arenas of the same type is not detected
/// and yields whichever value occupies the slot in the other arena.
pub struct Handle<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// The slot index this handle refers to
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

// manual impls because deriving would needlessly bound T
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.index)
    }
}

/// A bounded arena of `T` values addressed by [`Handle`]s.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<T>,
    capacity: usize,
}

impl<T> Arena<T> {
    /// Create an empty arena that can hold at most `capacity` values.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity <= u32::MAX as usize);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Move `value` into the arena and return a handle to it.
    pub fn alloc(&mut self, value: T) -> Result<Handle<T>, ArenaFull> {
        if self.slots.len() >= self.capacity {
            return Err(ArenaFull {
                capacity: self.capacity,
            });
        }
        let index = self.slots.len() as u32;
        self.slots.push(value);
        Ok(Handle {
            index,
            _marker: PhantomData,
        })
    }

    /// Get a reference to the value behind `handle`.
    pub fn get(&self, handle: Handle<T>) -> &T {
        &self.slots[handle.index()]
    }

    /// Get a mutable reference to the value behind `handle`.
    pub fn get_mut(&mut self, handle: Handle<T>) -> &mut T {
        &mut self.slots[handle.index()]
    }

    /// Number of values currently allocated
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no value has been allocated yet
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The maximum number of values this arena can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> core::ops::Index<Handle<T>> for Arena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        self.get(handle)
    }
}

impl<T> core::ops::IndexMut<Handle<T>> for Arena<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        self.get_mut(handle)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, Eq, PartialEq)]
    struct Point {
        x: usize,
        y: usize,
    }

    #[test]
    fn alloc_returns_distinct_handles() {
        let mut arena = Arena::with_capacity(4);
        let a = arena.alloc(Point { x: 1, y: 2 }).unwrap();
        let b = arena.alloc(Point { x: 3, y: 4 }).unwrap();
        assert_ne!(a.index(), b.index());
        assert_eq!(arena[a], Point { x: 1, y: 2 });
        assert_eq!(arena[b], Point { x: 3, y: 4 });
    }

    #[test]
    fn handles_stay_valid_across_later_allocations() {
        let mut arena = Arena::with_capacity(16);
        let first = arena.alloc(Point { x: 7, y: 7 }).unwrap();
        for i in 0..15 {
            arena.alloc(Point { x: i, y: i }).unwrap();
        }
        assert_eq!(arena[first], Point { x: 7, y: 7 });
    }

    #[test]
    fn alloc_fails_when_full() {
        let mut arena = Arena::with_capacity(2);
        arena.alloc(Point { x: 0, y: 0 }).unwrap();
        arena.alloc(Point { x: 1, y: 1 }).unwrap();
        assert_eq!(
            arena.alloc(Point { x: 2, y: 2 }),
            Err(ArenaFull { capacity: 2 })
        );
    }

    #[test]
    fn mutation_through_handle() {
        let mut arena = Arena::with_capacity(1);
        let h = arena.alloc(Point { x: 0, y: 0 }).unwrap();
        arena[h].x = 42;
        assert_eq!(arena[h].x, 42);
    }
}
