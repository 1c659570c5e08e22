//! Large allocation handling (>32KB) and over-aligned requests.
//!
//! Each large block gets its own anonymous mapping. The payload sits at an
//! `offset` past the mapping base, leaving room for the block header and for
//! any alignment padding. The directory here only records mappings; the
//! actual mmap/munmap/mremap calls are issued by `MallocState` while the
//! directory lock is released.

use std::collections::BTreeMap;

use crate::header::{ALIGNMENT, HEADER_SIZE};
use crate::os::page_align;

/// Metadata for a large allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LargeAllocation {
    /// Start address of the mapping.
    pub base: usize,
    /// Total size of the mapped region (including header and padding).
    pub mapped_size: usize,
    /// Distance from `base` to the payload.
    pub offset: usize,
}

impl LargeAllocation {
    /// Bytes usable behind the payload.
    pub fn usable(&self) -> usize {
        self.mapped_size - self.offset
    }
}

/// Page-rounded mapping length for `size` payload bytes aligned to `align`.
///
/// `align` must be a power of two. The mapping base is page-aligned, so at
/// most `max(align, HEADER_SIZE)` bytes precede the payload.
pub fn mapping_len(size: usize, align: usize) -> Option<usize> {
    page_align(size.checked_add(align.max(HEADER_SIZE))?)
}

/// Offset of the first `align`-aligned address that leaves room for a header.
pub fn payload_offset(base: usize, align: usize) -> usize {
    let align = align.max(ALIGNMENT);
    let start = base + HEADER_SIZE;
    ((start + align - 1) & !(align - 1)) - base
}

/// Directory of live large mappings, keyed by mapping base.
#[derive(Debug, Default)]
pub struct LargeAllocator {
    allocations: BTreeMap<usize, LargeAllocation>,
    /// Total bytes currently mapped.
    total_mapped: usize,
}

impl LargeAllocator {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a mapping.
    pub fn insert(&mut self, alloc: LargeAllocation) {
        self.total_mapped += alloc.mapped_size;
        if let Some(previous) = self.allocations.insert(alloc.base, alloc) {
            self.total_mapped -= previous.mapped_size;
        }
    }

    /// Drops the record for the mapping at `base`, returning it for unmapping.
    pub fn remove(&mut self, base: usize) -> Option<LargeAllocation> {
        let alloc = self.allocations.remove(&base)?;
        self.total_mapped -= alloc.mapped_size;
        Some(alloc)
    }

    /// Looks up a large allocation by mapping base.
    pub fn lookup(&self, base: usize) -> Option<&LargeAllocation> {
        self.allocations.get(&base)
    }

    /// Returns the total number of active large allocations.
    pub fn active_count(&self) -> usize {
        self.allocations.len()
    }

    /// Returns the total bytes currently mapped.
    pub fn total_mapped(&self) -> usize {
        self.total_mapped
    }

    /// Removes every record, for teardown.
    pub fn take_all(&mut self) -> Vec<LargeAllocation> {
        self.total_mapped = 0;
        std::mem::take(&mut self.allocations).into_values().collect()
    }
}
