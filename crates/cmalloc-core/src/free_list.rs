//! Free-list bookkeeping for size-class slabs.
//!
//! Blocks within a class are all the same size, so a free list is just a
//! stack of block indices. There is no splitting or merging of individual
//! blocks: fragmentation is bounded by the class rounding, and free space
//! recombines at slab granularity when every block of a slab is free.

/// LIFO stack of free block indices within one slab.
///
/// Seeded in reverse so that the first pops walk the slab in ascending
/// address order; recently released blocks are reused first afterwards.
#[derive(Debug, Clone)]
pub struct BlockStack {
    free: Vec<u32>,
    capacity: u32,
}

impl BlockStack {
    /// A stack holding every index in `0..capacity`.
    pub fn full(capacity: u32) -> Self {
        Self {
            free: (0..capacity).rev().collect(),
            capacity,
        }
    }

    #[inline]
    pub fn pop(&mut self) -> Option<u32> {
        self.free.pop()
    }

    /// Returns `index` to the stack.
    #[inline]
    pub fn push(&mut self, index: u32) {
        debug_assert!(index < self.capacity, "block index {index} out of range");
        debug_assert!(self.free.len() < self.capacity as usize, "stack overflow");
        self.free.push(index);
    }

    /// Number of free blocks.
    #[inline]
    pub fn len(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    /// True when every block of the slab is free.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.free.len() == self.capacity as usize
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// Set of slab ids in one class that still have at least one free block.
///
/// Each listed id remembers its position, so inserting twice is a no-op and
/// an id can be dropped in constant time before its slab is retired.
#[derive(Debug, Default, Clone)]
pub struct PartialSlabs {
    ids: Vec<u32>,
    position: Vec<Option<u32>>,
}

impl PartialSlabs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id` unless it is already listed.
    pub fn insert(&mut self, id: u32) {
        let slot = id as usize;
        if slot >= self.position.len() {
            self.position.resize(slot + 1, None);
        }
        if self.position[slot].is_none() {
            self.position[slot] = Some(self.ids.len() as u32);
            self.ids.push(id);
        }
    }

    /// Most recently listed slab, if any.
    #[inline]
    pub fn peek(&self) -> Option<u32> {
        self.ids.last().copied()
    }

    /// Removes `id`. Returns false if it was not listed.
    pub fn remove(&mut self, id: u32) -> bool {
        let Some(pos) = self.position.get_mut(id as usize).and_then(Option::take) else {
            return false;
        };
        self.ids.swap_remove(pos as usize);
        if let Some(&moved) = self.ids.get(pos as usize) {
            self.position[moved as usize] = Some(pos);
        }
        true
    }

    pub fn contains(&self, id: u32) -> bool {
        matches!(self.position.get(id as usize), Some(Some(_)))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_pops_ascending_then_lifo() {
        let mut stack = BlockStack::full(4);
        assert!(stack.is_full());
        assert_eq!(stack.pop(), Some(0));
        assert_eq!(stack.pop(), Some(1));
        stack.push(0);
        assert_eq!(stack.pop(), Some(0), "released block is reused first");
        assert_eq!(stack.pop(), Some(2));
        assert_eq!(stack.pop(), Some(3));
        assert_eq!(stack.pop(), None);
        assert!(stack.is_empty());
    }

    #[test]
    fn stack_full_after_all_returned() {
        let mut stack = BlockStack::full(3);
        let taken: Vec<u32> = std::iter::from_fn(|| stack.pop()).collect();
        assert_eq!(taken, vec![0, 1, 2]);
        for index in taken.into_iter().rev() {
            stack.push(index);
        }
        assert!(stack.is_full());
        assert_eq!(stack.len(), 3);
        assert_eq!(stack.capacity(), 3);
    }

    #[test]
    fn partial_insert_is_idempotent() {
        let mut partial = PartialSlabs::new();
        partial.insert(5);
        partial.insert(5);
        partial.insert(2);
        assert_eq!(partial.len(), 2);
        assert_eq!(partial.peek(), Some(2));
        assert!(partial.contains(5));
        assert!(!partial.contains(4));
    }

    #[test]
    fn partial_remove() {
        let mut partial = PartialSlabs::new();
        for id in 0..4 {
            partial.insert(id);
        }
        assert!(partial.remove(1));
        assert!(!partial.remove(1));
        assert!(!partial.remove(99));
        assert_eq!(partial.len(), 3);
        assert!(!partial.contains(1));
        partial.insert(1);
        assert_eq!(partial.peek(), Some(1));
        while let Some(id) = partial.peek() {
            partial.remove(id);
        }
        assert!(partial.is_empty());
    }
}
