// SPDX-License-Identifier: MIT
//! Generation-checked arena for per-run objects
//!
//! Container blocks, data-guide nodes and path-dictionary nodes only live for
//! one run block. They are allocated here and released together by
//! [`Arena::reset`]. Every handle remembers the generation it was issued in,
//! so a handle that survives a reset is rejected instead of silently aliasing
//! a newer object.

use std::fmt;
use std::marker::PhantomData;

/// Typed index into an [`Arena`]
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Position of the object inside its arena (dense, starting at 0)
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    /// Arena generation the handle was issued in
    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

// Manual impls: deriving would put bounds on T.
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

impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index, self.generation)
    }
}

/// Bulk-reset object pool
#[derive(Debug)]
pub struct Arena<T> {
    items: Vec<T>,
    generation: u32,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            generation: 0,
        }
    }

    /// Store `item` and return its handle
    #[inline]
    pub fn alloc(&mut self, item: T) -> Handle<T> {
        let index = self.items.len() as u32;
        self.items.push(item);
        Handle {
            index,
            generation: self.generation,
            _marker: PhantomData,
        }
    }

    /// Look up an object; `None` for handles from an earlier generation
    #[inline]
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        if handle.generation != self.generation {
            return None;
        }
        self.items.get(handle.index as usize)
    }

    #[inline]
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        if handle.generation != self.generation {
            return None;
        }
        self.items.get_mut(handle.index as usize)
    }

    /// Handle for the object at `index` in the current generation
    pub fn handle_at(&self, index: u32) -> Option<Handle<T>> {
        ((index as usize) < self.items.len()).then_some(Handle {
            index,
            generation: self.generation,
            _marker: PhantomData,
        })
    }

    /// Drop every object and invalidate all outstanding handles
    pub fn reset(&mut self) {
        self.items.clear();
        self.generation = self.generation.wrapping_add(1);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Objects in allocation order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::ops::Index<Handle<T>> for Arena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        assert_eq!(
            handle.generation, self.generation,
            "stale arena handle {:?}",
            handle
        );
        &self.items[handle.index as usize]
    }
}

impl<T> std::ops::IndexMut<Handle<T>> for Arena<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        assert_eq!(
            handle.generation, self.generation,
            "stale arena handle {:?}",
            handle
        );
        &mut self.items[handle.index as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_get() {
        let mut arena = Arena::new();
        let a = arena.alloc("a");
        let b = arena.alloc("b");
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(arena[a], "a");
        assert_eq!(arena.get(b), Some(&"b"));
    }

    #[test]
    fn test_reset_invalidates_handles() {
        let mut arena = Arena::new();
        let old = arena.alloc(1u32);
        arena.reset();
        let new = arena.alloc(2u32);

        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert!(arena.get(old).is_none());
        assert_eq!(arena.get(new), Some(&2));
    }

    #[test]
    #[should_panic(expected = "stale arena handle")]
    fn test_index_with_stale_handle_panics() {
        let mut arena = Arena::new();
        let old = arena.alloc(1u32);
        arena.reset();
        arena.alloc(2u32);
        let _ = arena[old];
    }

    #[test]
    fn test_handle_at() {
        let mut arena = Arena::new();
        let h = arena.alloc('x');
        assert_eq!(arena.handle_at(0), Some(h));
        assert_eq!(arena.handle_at(1), None);
    }
}
