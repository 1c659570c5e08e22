//! Core allocator state.
//!
//! `MallocState` owns one lock domain per size class, one for the large
//! mapping directory and one for the lifecycle log. Small requests are served
//! from slabs of their class; requests above `MAX_SMALL_SIZE`, and requests
//! with alignment beyond 16 bytes, get a dedicated mapping.
//!
//! OS calls (mmap, munmap, mremap) are always issued with every lock
//! released. Only the bookkeeping that follows them takes a lock.

#![allow(unsafe_code)]

use core::ptr::{self, NonNull};

use crate::config::AllocatorConfig;
use crate::events::{AllocatorEvent, AllocatorLogRecord, EventDraft, EventLog};
use crate::guard::{Guarded, LockContention, LockDomain};
use crate::header::{ALIGNMENT, BlockHeader, BlockKind};
use crate::large::{self, LargeAllocation, LargeAllocator};
use crate::os;
use crate::size_class::{self, NUM_SIZE_CLASSES};
use crate::slab::{SizeClassBin, Slab};
use crate::stats::{self, AllocatorStats, StatsSnapshot};

/// Why a request produced no block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    /// The byte count cannot be represented once header and padding are added.
    SizeOverflow,
    OutOfMemory,
}

/// Global allocator state.
///
/// All methods take `&self`; the state is shared between threads and every
/// mutation happens inside the lock domain owning the data.
#[derive(Debug)]
pub struct MallocState {
    bins: Box<[Guarded<SizeClassBin>]>,
    large: Guarded<LargeAllocator>,
    events: Guarded<EventLog>,
    stats: AllocatorStats,
    config: AllocatorConfig,
}

impl MallocState {
    /// Creates an allocator with default configuration.
    pub fn new() -> Self {
        Self::with_config(AllocatorConfig::default())
    }

    pub fn with_config(config: AllocatorConfig) -> Self {
        let bins = (0..NUM_SIZE_CLASSES)
            .map(|class| {
                Guarded::new(
                    LockDomain::Class(class),
                    SizeClassBin::new(class, config.retain_empty_slabs),
                )
            })
            .collect();
        Self {
            bins,
            large: Guarded::new(LockDomain::Large, LargeAllocator::new()),
            events: Guarded::new(
                LockDomain::Events,
                EventLog::new(config.event_log_capacity),
            ),
            stats: AllocatorStats::new(),
            config,
        }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    fn record(&self, draft: EventDraft) {
        if self.config.event_log_capacity == 0 {
            return;
        }
        self.events.lock().record(draft);
    }

    fn fail(
        &self,
        symbol: &'static str,
        size: usize,
        bin: Option<usize>,
        failure: Failure,
    ) -> Option<NonNull<u8>> {
        let (counter, event, outcome) = match failure {
            Failure::SizeOverflow => (
                &self.stats.overflow_rejections,
                AllocatorEvent::SizeOverflow,
                "denied",
            ),
            Failure::OutOfMemory => (&self.stats.oom_events, AllocatorEvent::OutOfMemory, "oom"),
        };
        stats::bump(counter);
        self.record(EventDraft {
            symbol,
            event,
            ptr: None,
            size: Some(size),
            bin,
            outcome,
        });
        None
    }

    fn finish(
        &self,
        symbol: &'static str,
        size: usize,
        result: Result<NonNull<u8>, Failure>,
    ) -> Option<NonNull<u8>> {
        match result {
            Ok(payload) => {
                stats::bump(&self.stats.allocations);
                Some(payload)
            }
            Err(failure) => self.fail(symbol, size, Some(size_class::bin_index(size)), failure),
        }
    }

    fn allocate_in(&self, symbol: &'static str, size: usize) -> Result<NonNull<u8>, Failure> {
        let bin = size_class::bin_index(size);
        if bin < NUM_SIZE_CLASSES {
            self.allocate_small(symbol, bin)
        } else {
            self.allocate_large(symbol, size, ALIGNMENT)
        }
    }

    fn allocate_small(&self, symbol: &'static str, bin: usize) -> Result<NonNull<u8>, Failure> {
        let domain = &self.bins[bin];
        if let Some(payload) = domain.lock().pop() {
            return Ok(payload);
        }
        // Another thread may install a slab meanwhile; ours then just adds capacity.
        let slab = Slab::map(bin).ok_or(Failure::OutOfMemory)?;
        let (base, len) = (slab.base_addr(), slab.len());
        let payload = domain.lock().install(slab).ok_or(Failure::OutOfMemory)?;
        stats::bump(&self.stats.slab_maps);
        self.record(EventDraft {
            symbol,
            event: AllocatorEvent::SlabMap,
            ptr: Some(base),
            size: Some(len),
            bin: Some(bin),
            outcome: "mapped",
        });
        Ok(payload)
    }

    fn allocate_large(
        &self,
        symbol: &'static str,
        size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, Failure> {
        let len = large::mapping_len(size, align).ok_or(Failure::SizeOverflow)?;
        let base = os::map_pages(len).ok_or(Failure::OutOfMemory)?;
        let offset = large::payload_offset(base.as_ptr() as usize, align);
        let alloc = LargeAllocation {
            base: base.as_ptr() as usize,
            mapped_size: len,
            offset,
        };
        // SAFETY: offset <= max(align, HEADER_SIZE) and the mapping adds that
        // much room on top of `size`, so header and payload are in bounds.
        let payload = unsafe { base.add(offset) };
        // SAFETY: the header slot lies inside the fresh mapping and is aligned.
        unsafe { BlockHeader::write(payload, BlockHeader::large(offset, alloc.usable())) };
        self.large.lock().insert(alloc);
        stats::bump(&self.stats.large_maps);
        self.record(EventDraft {
            symbol,
            event: AllocatorEvent::LargeMap,
            ptr: Some(alloc.base),
            size: Some(len),
            bin: Some(NUM_SIZE_CLASSES),
            outcome: "mapped",
        });
        Ok(payload)
    }

    /// Allocates `size` bytes aligned to 16.
    ///
    /// Size 0 yields a distinct minimal block. Returns `None` when the size is
    /// unrepresentable or the OS refuses memory.
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.finish("malloc", size, self.allocate_in("malloc", size))
    }

    /// Returns a block to the allocator. `None` is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be `None` or a live pointer returned by this `MallocState`
    /// that has not been released yet.
    pub unsafe fn release(&self, ptr: Option<NonNull<u8>>) {
        let Some(payload) = ptr else {
            return;
        };
        // SAFETY: forwarded from the caller.
        unsafe { self.release_in("free", payload) }
    }

    unsafe fn release_in(&self, symbol: &'static str, payload: NonNull<u8>) {
        stats::bump(&self.stats.releases);
        // SAFETY: caller guarantees `payload` is a live block of this state.
        let header = unsafe { BlockHeader::read(payload) };
        match header.kind() {
            BlockKind::Small { class, slab } => {
                let Some(domain) = self.bins.get(class) else {
                    return;
                };
                let retired = domain.lock().push(slab, payload);
                if let Some(retired) = retired {
                    let (base, len) = (retired.base_addr(), retired.len());
                    drop(retired);
                    stats::bump(&self.stats.slab_retirements);
                    self.record(EventDraft {
                        symbol,
                        event: AllocatorEvent::SlabRetire,
                        ptr: Some(base),
                        size: Some(len),
                        bin: Some(class),
                        outcome: "unmapped",
                    });
                }
            }
            BlockKind::Large { offset } => {
                // SAFETY: the header records how far the payload sits past its mapping base.
                let base = unsafe { payload.sub(offset) };
                let Some(alloc) = self.large.lock().remove(base.as_ptr() as usize) else {
                    return;
                };
                // SAFETY: the record was just removed, so nobody else can reach this mapping.
                let outcome = match unsafe { os::unmap_pages(base, alloc.mapped_size) } {
                    Ok(()) => "unmapped",
                    Err(_) => "unmap_failed",
                };
                stats::bump(&self.stats.large_unmaps);
                self.record(EventDraft {
                    symbol,
                    event: AllocatorEvent::LargeUnmap,
                    ptr: Some(alloc.base),
                    size: Some(alloc.mapped_size),
                    bin: Some(NUM_SIZE_CLASSES),
                    outcome,
                });
            }
        }
    }

    /// Resizes a block, preserving the first `min(old usable, new_size)` bytes.
    ///
    /// - `None` behaves as [`Self::allocate`].
    /// - `new_size == 0` releases `ptr` and returns a fresh zero-size block.
    /// - A block stays put if the new size fits and keeps at least half of it.
    /// - A large block growing or shrinking within the large range is remapped
    ///   when enabled.
    /// - Otherwise a new block is allocated, the data copied and the old block
    ///   released.
    ///
    /// On failure `None` is returned and the old block is left untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must be `None` or a live pointer returned by this `MallocState`.
    /// If a different pointer is returned, `ptr` must no longer be used.
    pub unsafe fn resize(&self, ptr: Option<NonNull<u8>>, new_size: usize) -> Option<NonNull<u8>> {
        let Some(old) = ptr else {
            return self.finish("realloc", new_size, self.allocate_in("realloc", new_size));
        };
        if new_size == 0 {
            // SAFETY: forwarded from the caller.
            unsafe { self.release_in("realloc", old) };
            return self.finish("realloc", 0, self.allocate_in("realloc", 0));
        }

        // SAFETY: caller guarantees `old` is live.
        let header = unsafe { BlockHeader::read(old) };
        if fits_in_place(&header, new_size) {
            stats::bump(&self.stats.resizes_in_place);
            return Some(old);
        }

        if let BlockKind::Large { offset } = header.kind() {
            if self.config.remap_large
                && size_class::bin_index(new_size) == NUM_SIZE_CLASSES
                && offset <= os::page_size()
            {
                // SAFETY: `old` is a live large block with this offset.
                if let Some(moved) = unsafe { self.remap_large(old, offset, new_size) } {
                    return Some(moved);
                }
            }
        }

        let fresh = self.finish("realloc", new_size, self.allocate_in("realloc", new_size))?;
        let keep = header.usable_size().min(new_size);
        // SAFETY: both blocks hold at least `keep` bytes and are distinct live blocks.
        unsafe { ptr::copy_nonoverlapping(old.as_ptr(), fresh.as_ptr(), keep) };
        // SAFETY: the contents now live in `fresh`; `old` is released exactly once.
        unsafe { self.release_in("realloc", old) };
        stats::bump(&self.stats.resizes_moved);
        Some(fresh)
    }

    /// Moves a large block to a mapping sized for `new_size` via mremap.
    ///
    /// Returns `None`, leaving the block intact, when remapping is not possible.
    unsafe fn remap_large(
        &self,
        payload: NonNull<u8>,
        offset: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let new_len = large::mapping_len(new_size, offset)?;
        // SAFETY: the header records how far the payload sits past its mapping base.
        let base = unsafe { payload.sub(offset) };
        let old_base = base.as_ptr() as usize;
        // The record stays out of the directory while the mapping moves, so a
        // base the kernel frees up can be reused by another thread safely.
        let old = self.large.lock().remove(old_base)?;
        // SAFETY: the caller owns the block and its record is detached.
        let Some(moved) = (unsafe { os::remap_pages(base, old.mapped_size, new_len) }) else {
            self.large.lock().insert(old);
            return None;
        };
        let alloc = LargeAllocation {
            base: moved.as_ptr() as usize,
            mapped_size: new_len,
            offset,
        };
        // SAFETY: the remapped region is `new_len` bytes, which covers offset + new_size.
        let new_payload = unsafe { moved.add(offset) };
        // SAFETY: the header slot lies inside the remapped region.
        unsafe { BlockHeader::write(new_payload, BlockHeader::large(offset, alloc.usable())) };
        self.large.lock().insert(alloc);
        stats::bump(&self.stats.large_remaps);
        self.record(EventDraft {
            symbol: "realloc",
            event: AllocatorEvent::LargeRemap,
            ptr: Some(alloc.base),
            size: Some(new_len),
            bin: Some(NUM_SIZE_CLASSES),
            outcome: if alloc.base == old_base { "in_place" } else { "moved" },
        });
        Some(new_payload)
    }

    /// Allocates `count * size` zeroed bytes. Overflow yields `None` before any OS call.
    pub fn zero_allocate(&self, count: usize, size: usize) -> Option<NonNull<u8>> {
        let Some(total) = count.checked_mul(size) else {
            return self.fail("calloc", size, None, Failure::SizeOverflow);
        };
        let bin = size_class::bin_index(total);
        let payload = self.finish("calloc", total, self.allocate_in("calloc", total))?;
        // Large blocks are always fresh anonymous mappings, already zero.
        if bin < NUM_SIZE_CLASSES {
            // SAFETY: the block holds at least `total` bytes.
            unsafe { payload.as_ptr().write_bytes(0, total) };
        }
        Some(payload)
    }

    /// Allocates `size` bytes aligned to `align`, which must be a power of two.
    ///
    /// Alignments up to 16 use the normal path; larger ones get a dedicated
    /// mapping with the payload placed on the requested boundary. That holds
    /// for small sizes too, so each over-aligned block costs at least a page
    /// plus an mmap/munmap pair.
    pub fn aligned_allocate(&self, align: usize, size: usize) -> Option<NonNull<u8>> {
        if !align.is_power_of_two() {
            return None;
        }
        if align <= ALIGNMENT {
            return self.finish("aligned_alloc", size, self.allocate_in("aligned_alloc", size));
        }
        let result = self.allocate_large("aligned_alloc", size, align);
        match result {
            Ok(payload) => {
                stats::bump(&self.stats.allocations);
                Some(payload)
            }
            Err(failure) => self.fail("aligned_alloc", size, Some(NUM_SIZE_CLASSES), failure),
        }
    }

    /// Usable bytes behind `ptr`, at least the size originally requested. 0 for `None`.
    ///
    /// # Safety
    ///
    /// `ptr` must be `None` or a live pointer returned by this `MallocState`.
    pub unsafe fn usable_size(&self, ptr: Option<NonNull<u8>>) -> usize {
        match ptr {
            // SAFETY: forwarded from the caller.
            Some(payload) => unsafe { BlockHeader::read(payload) }.usable_size(),
            None => 0,
        }
    }

    /// Per-domain lock acquisition counters.
    pub fn lock_contention(&self) -> Vec<LockContention> {
        self.bins
            .iter()
            .map(Guarded::contention)
            .chain([self.large.contention(), self.events.contention()])
            .collect()
    }

    /// Counters plus gauges read from every lock domain, one domain at a time.
    ///
    /// Gauge reads are not counted as lock acquisitions.
    pub fn stats(&self) -> StatsSnapshot {
        let mut snap = self.stats.counters();
        for domain in self.bins.iter() {
            let bin = domain.lock_uncounted();
            snap.live_slabs += bin.live_slabs();
            snap.slab_mapped_bytes += bin.mapped_bytes();
            snap.live_small_blocks += bin.live_blocks();
            snap.free_small_blocks += bin.free_blocks();
        }
        {
            let large = self.large.lock_uncounted();
            snap.large_active = large.active_count();
            snap.large_mapped_bytes = large.total_mapped();
        }
        snap.lifecycle_dropped = self.events.lock_uncounted().dropped();
        for contention in self.lock_contention() {
            snap.lock_acquisitions += contention.acquisitions;
            snap.lock_contended += contention.contended;
        }
        snap
    }

    /// Removes and returns buffered lifecycle records.
    pub fn drain_lifecycle_logs(&self) -> Vec<AllocatorLogRecord> {
        self.events.lock().drain()
    }

    /// Copies buffered lifecycle records.
    pub fn lifecycle_logs(&self) -> Vec<AllocatorLogRecord> {
        self.events.lock().snapshot()
    }
}

impl Default for MallocState {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MallocState {
    fn drop(&mut self) {
        // Slabs unmap themselves when the bins drop; large mappings are
        // only known to the directory.
        for alloc in self.large.get_mut().take_all() {
            if let Some(base) = NonNull::new(alloc.base as *mut u8) {
                // SAFETY: the state is being destroyed, so no block it handed out may be used.
                let _ = unsafe { os::unmap_pages(base, alloc.mapped_size) };
            }
        }
    }
}

/// Whether a block can serve `new_size` without moving.
fn fits_in_place(header: &BlockHeader, new_size: usize) -> bool {
    let usable = header.usable_size();
    if new_size > usable {
        return false;
    }
    match header.kind() {
        BlockKind::Small { class, .. } => {
            size_class::bin_index(new_size) == class || new_size >= usable / 2
        }
        BlockKind::Large { .. } => new_size >= usable / 2,
    }
}
