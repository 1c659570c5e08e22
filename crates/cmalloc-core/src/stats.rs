//! Allocator counters.
//!
//! Hot-path counters are relaxed atomics bumped outside any lock. Gauges that
//! live inside lock domains (free blocks, live slabs, mapped bytes) are
//! gathered when a snapshot is taken.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic event counters.
#[derive(Debug, Default)]
pub struct AllocatorStats {
    pub allocations: AtomicU64,
    pub releases: AtomicU64,
    pub resizes_in_place: AtomicU64,
    pub resizes_moved: AtomicU64,
    pub slab_maps: AtomicU64,
    pub slab_retirements: AtomicU64,
    pub large_maps: AtomicU64,
    pub large_unmaps: AtomicU64,
    pub large_remaps: AtomicU64,
    pub oom_events: AtomicU64,
    pub overflow_rejections: AtomicU64,
}

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl AllocatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the counters into a fresh snapshot; gauges are left at zero.
    pub fn counters(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            allocations: load(&self.allocations),
            releases: load(&self.releases),
            resizes_in_place: load(&self.resizes_in_place),
            resizes_moved: load(&self.resizes_moved),
            slab_maps: load(&self.slab_maps),
            slab_retirements: load(&self.slab_retirements),
            large_maps: load(&self.large_maps),
            large_unmaps: load(&self.large_unmaps),
            large_remaps: load(&self.large_remaps),
            oom_events: load(&self.oom_events),
            overflow_rejections: load(&self.overflow_rejections),
            ..StatsSnapshot::default()
        }
    }
}

/// Point-in-time view of allocator activity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub allocations: u64,
    pub releases: u64,
    pub resizes_in_place: u64,
    pub resizes_moved: u64,
    pub slab_maps: u64,
    pub slab_retirements: u64,
    pub large_maps: u64,
    pub large_unmaps: u64,
    pub large_remaps: u64,
    pub oom_events: u64,
    pub overflow_rejections: u64,
    /// Slabs currently mapped across all classes.
    pub live_slabs: usize,
    /// Bytes mapped for slabs.
    pub slab_mapped_bytes: usize,
    /// Small blocks handed out.
    pub live_small_blocks: usize,
    /// Small blocks available without mapping.
    pub free_small_blocks: usize,
    /// Large mappings currently live.
    pub large_active: usize,
    /// Bytes mapped for large blocks.
    pub large_mapped_bytes: usize,
    pub lock_acquisitions: u64,
    pub lock_contended: u64,
    /// Lifecycle records evicted from the full event ring.
    pub lifecycle_dropped: u64,
}

impl StatsSnapshot {
    /// Allocations not yet released.
    pub fn outstanding(&self) -> u64 {
        self.allocations.saturating_sub(self.releases)
    }

    /// Total bytes obtained from the OS and still mapped.
    pub fn mapped_bytes(&self) -> usize {
        self.slab_mapped_bytes + self.large_mapped_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let stats = AllocatorStats::new();
        assert_eq!(stats.counters(), StatsSnapshot::default());
    }

    #[test]
    fn bump_and_snapshot() {
        let stats = AllocatorStats::new();
        bump(&stats.allocations);
        bump(&stats.allocations);
        bump(&stats.releases);
        bump(&stats.large_remaps);
        let snap = stats.counters();
        assert_eq!(snap.allocations, 2);
        assert_eq!(snap.releases, 1);
        assert_eq!(snap.large_remaps, 1);
        assert_eq!(snap.outstanding(), 1);
    }

    #[test]
    fn mapped_bytes_sums_both_paths() {
        let snap = StatsSnapshot {
            slab_mapped_bytes: 65536,
            large_mapped_bytes: 8192,
            ..StatsSnapshot::default()
        };
        assert_eq!(snap.mapped_bytes(), 73728);
    }
}
