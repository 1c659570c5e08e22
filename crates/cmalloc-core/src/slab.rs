//! Bucket allocator: slabs carved into equal blocks, grouped per size class.
//!
//! A slab is one anonymous mapping split into `objects_per_slab` blocks of
//! `block_stride(class)` bytes. Each block is a 16-byte header followed by
//! the payload. A [`SizeClassBin`] owns every slab of one class and is only
//! ever touched under that class's lock; mapping and unmapping slabs is
//! done by the caller with the lock released.

#![allow(unsafe_code)]

use core::ptr::NonNull;

use crate::free_list::{BlockStack, PartialSlabs};
use crate::header::{BlockHeader, HEADER_SIZE};
use crate::os;
use crate::size_class::{bin_size, block_stride, slab_bytes};

/// One mapped run of pages serving a single size class.
#[derive(Debug)]
pub struct Slab {
    base: NonNull<u8>,
    len: usize,
    class: usize,
    stride: usize,
    free: BlockStack,
}

// SAFETY: a Slab exclusively owns its mapping; the raw base pointer is never
// shared outside the bin that holds it, and bins live behind a mutex.
unsafe impl Send for Slab {}

impl Slab {
    /// Maps a fresh slab for `class`. Must be called without holding a lock.
    pub fn map(class: usize) -> Option<Self> {
        let len = slab_bytes(class);
        let stride = block_stride(class);
        let capacity = u32::try_from(len / stride).ok()?;
        let base = os::map_pages(len)?;
        Some(Self {
            base,
            len,
            class,
            stride,
            free: BlockStack::full(capacity),
        })
    }

    pub fn class(&self) -> usize {
        self.class
    }

    pub fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn capacity(&self) -> u32 {
        self.free.capacity()
    }

    pub fn free_blocks(&self) -> usize {
        self.free.len()
    }

    /// True when no block of this slab is handed out.
    pub fn is_unused(&self) -> bool {
        self.free.is_full()
    }

    /// Payload pointer of block `index`.
    fn payload(&self, index: u32) -> NonNull<u8> {
        debug_assert!(index < self.capacity());
        // SAFETY: index < capacity, so the block lies within the mapping.
        unsafe { self.base.add(index as usize * self.stride + HEADER_SIZE) }
    }

    /// Block index of `payload`, or `None` if it is not a block start in this slab.
    fn index_of(&self, payload: NonNull<u8>) -> Option<u32> {
        let offset = (payload.as_ptr() as usize)
            .checked_sub(self.base_addr())?
            .checked_sub(HEADER_SIZE)?;
        if offset % self.stride != 0 {
            return None;
        }
        let index = u32::try_from(offset / self.stride).ok()?;
        (index < self.capacity()).then_some(index)
    }
}

impl Drop for Slab {
    fn drop(&mut self) {
        // SAFETY: the slab owns [base, base + len) and is being destroyed.
        let _ = unsafe { os::unmap_pages(self.base, self.len) };
    }
}

/// All slabs of one size class plus its free-block bookkeeping.
#[derive(Debug)]
pub struct SizeClassBin {
    class: usize,
    slabs: Vec<Option<Slab>>,
    vacant: Vec<u32>,
    partial: PartialSlabs,
    /// Fully free slabs currently kept mapped.
    empty_slabs: usize,
    retain_empty: usize,
    free_blocks: usize,
    live_blocks: usize,
}

impl SizeClassBin {
    /// An empty bin that keeps up to `retain_empty` fully free slabs mapped.
    pub fn new(class: usize, retain_empty: usize) -> Self {
        Self {
            class,
            slabs: Vec::new(),
            vacant: Vec::new(),
            partial: PartialSlabs::new(),
            empty_slabs: 0,
            retain_empty,
            free_blocks: 0,
            live_blocks: 0,
        }
    }

    pub fn class(&self) -> usize {
        self.class
    }

    /// Hands out a free block, writing its header. `None` when every slab is full.
    pub fn pop(&mut self) -> Option<NonNull<u8>> {
        let id = self.partial.peek()?;
        let slab = self.slabs.get_mut(id as usize)?.as_mut()?;
        let was_unused = slab.is_unused();
        let index = slab.free.pop()?;
        let payload = slab.payload(index);
        if slab.free.is_empty() {
            self.partial.remove(id);
        }
        if was_unused {
            self.empty_slabs -= 1;
        }
        self.free_blocks -= 1;
        self.live_blocks += 1;
        // SAFETY: the header slot precedes the payload inside this slab.
        unsafe {
            BlockHeader::write(
                payload,
                BlockHeader::small(self.class, id, bin_size(self.class)),
            );
        }
        Some(payload)
    }

    /// Adds a freshly mapped slab and serves one block from the bin.
    pub fn install(&mut self, slab: Slab) -> Option<NonNull<u8>> {
        debug_assert_eq!(slab.class(), self.class);
        debug_assert!(slab.is_unused());
        let id = match self.vacant.pop() {
            Some(id) => id,
            None => {
                let id = u32::try_from(self.slabs.len()).ok()?;
                self.slabs.push(None);
                id
            }
        };
        self.free_blocks += slab.free_blocks();
        self.empty_slabs += 1;
        self.slabs[id as usize] = Some(slab);
        self.partial.insert(id);
        self.pop()
    }

    /// Returns `payload` to slab `id`.
    ///
    /// If the slab becomes fully free and the bin already retains enough empty
    /// slabs, the slab is detached and returned so the caller can drop (and
    /// thereby unmap) it after releasing the class lock.
    pub fn push(&mut self, id: u32, payload: NonNull<u8>) -> Option<Slab> {
        let slab = self.slabs.get_mut(id as usize)?.as_mut()?;
        let Some(index) = slab.index_of(payload) else {
            debug_assert!(false, "pointer {payload:p} does not belong to slab {id}");
            return None;
        };
        slab.free.push(index);
        self.free_blocks += 1;
        self.live_blocks -= 1;
        self.partial.insert(id);
        if !slab.is_unused() {
            return None;
        }
        if self.empty_slabs < self.retain_empty {
            self.empty_slabs += 1;
            return None;
        }
        self.partial.remove(id);
        let retired = self.slabs[id as usize].take()?;
        self.free_blocks -= retired.free_blocks();
        self.vacant.push(id);
        Some(retired)
    }

    /// Slabs currently mapped for this class.
    pub fn live_slabs(&self) -> usize {
        self.slabs.len() - self.vacant.len()
    }

    pub fn free_blocks(&self) -> usize {
        self.free_blocks
    }

    pub fn live_blocks(&self) -> usize {
        self.live_blocks
    }

    pub fn empty_slabs(&self) -> usize {
        self.empty_slabs
    }

    /// Bytes mapped for this class.
    pub fn mapped_bytes(&self) -> usize {
        self.slabs.iter().flatten().map(Slab::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{ALIGNMENT, BlockKind};
    use crate::size_class::{NUM_SIZE_CLASSES, init_size_classes};

    fn header_of(payload: NonNull<u8>) -> BlockHeader {
        // SAFETY: payload was produced by a bin in this test.
        unsafe { BlockHeader::read(payload) }
    }

    #[test]
    fn slab_maps_expected_capacity() {
        let classes = init_size_classes();
        for class in [0, 7, 21, NUM_SIZE_CLASSES - 1] {
            let slab = Slab::map(class).expect("slab mapping should succeed");
            assert_eq!(slab.capacity() as usize, classes[class].objects_per_slab);
            assert_eq!(slab.len(), classes[class].slab_bytes);
            assert!(slab.is_unused());
        }
    }

    #[test]
    fn index_of_rejects_interior_pointers() {
        let slab = Slab::map(3).expect("slab mapping should succeed");
        let first = slab.payload(0);
        assert_eq!(slab.index_of(first), Some(0));
        assert_eq!(slab.index_of(slab.payload(5)), Some(5));
        // SAFETY: still inside the mapping.
        let interior = unsafe { first.add(8) };
        assert_eq!(slab.index_of(interior), None);
        assert_eq!(slab.index_of(slab.base), None);
    }

    #[test]
    fn bin_serves_aligned_distinct_blocks() {
        let mut bin = SizeClassBin::new(2, 1);
        assert!(bin.pop().is_none(), "empty bin has nothing to serve");
        let slab = Slab::map(2).expect("slab mapping should succeed");
        let capacity = slab.capacity() as usize;
        let first = bin.install(slab).expect("install serves a block");
        let mut blocks = vec![first];
        while let Some(p) = bin.pop() {
            blocks.push(p);
        }
        assert_eq!(blocks.len(), capacity);
        assert_eq!(bin.free_blocks(), 0);
        assert_eq!(bin.live_blocks(), capacity);
        for pair in blocks.windows(2) {
            assert_eq!(
                pair[1].as_ptr() as usize - pair[0].as_ptr() as usize,
                block_stride(2),
                "fresh slab hands out blocks in address order"
            );
        }
        for &p in &blocks {
            assert_eq!(p.as_ptr() as usize % ALIGNMENT, 0);
            let header = header_of(p);
            assert_eq!(header.kind(), BlockKind::Small { class: 2, slab: 0 });
            assert_eq!(header.usable_size(), bin_size(2));
        }
        for p in blocks {
            assert!(bin.push(0, p).is_none(), "first empty slab is retained");
        }
        assert_eq!(bin.empty_slabs(), 1);
        assert_eq!(bin.live_slabs(), 1);
    }

    #[test]
    fn surplus_empty_slab_is_retired() {
        let mut bin = SizeClassBin::new(0, 1);
        let a = bin
            .install(Slab::map(0).expect("slab mapping should succeed"))
            .expect("block");
        // Fill slab 0 so the next install gets its own slab.
        let mut rest = Vec::new();
        while let Some(p) = bin.pop() {
            rest.push(p);
        }
        let b = bin
            .install(Slab::map(0).expect("slab mapping should succeed"))
            .expect("block");
        assert_eq!(bin.live_slabs(), 2);
        let BlockKind::Small { slab: slab_b, .. } = header_of(b).kind() else {
            panic!("small block expected");
        };
        assert_eq!(slab_b, 1);

        // Emptying slab 1 keeps it: nothing else is retained yet.
        assert!(bin.push(1, b).is_none());
        assert_eq!(bin.empty_slabs(), 1);

        // Emptying slab 0 too exceeds the retention limit.
        assert!(bin.push(0, a).is_none());
        let mut retired = None;
        for p in rest {
            if let Some(slab) = bin.push(0, p) {
                retired = Some(slab);
            }
        }
        let retired = retired.expect("second empty slab should be retired");
        assert!(retired.is_unused());
        drop(retired);
        assert_eq!(bin.live_slabs(), 1);
        assert_eq!(bin.empty_slabs(), 1);

        // The vacated id is recycled.
        let c = bin
            .install(Slab::map(0).expect("slab mapping should succeed"))
            .expect("block");
        let BlockKind::Small { slab, .. } = header_of(c).kind() else {
            panic!("small block expected");
        };
        assert!(slab == 0 || slab == 1);
        assert_eq!(bin.live_slabs(), 2);
    }

    #[test]
    fn zero_retention_unmaps_immediately() {
        let mut bin = SizeClassBin::new(5, 0);
        let p = bin
            .install(Slab::map(5).expect("slab mapping should succeed"))
            .expect("block");
        let retired = bin.push(0, p);
        assert!(retired.is_some());
        assert_eq!(bin.live_slabs(), 0);
        assert_eq!(bin.free_blocks(), 0);
        assert_eq!(bin.mapped_bytes(), 0);
    }
}
