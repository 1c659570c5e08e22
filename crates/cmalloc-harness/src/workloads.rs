//! Seeded allocation workloads.
//!
//! Every workload runs against a caller-supplied `MallocState`, checks the
//! contents of each block before it is resized or released, and finishes
//! with nothing outstanding. Failures come back as [`HarnessError`] rather
//! than panics so the CLI can log them.

#![allow(unsafe_code)]

use std::ptr::NonNull;
use std::thread;
use std::time::Instant;

use cmalloc_core::{MAX_SMALL_SIZE, MallocState, StatsSnapshot, os};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

/// Harness failure.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("{workload}: allocation of {size} bytes failed")]
    AllocationFailed { workload: &'static str, size: usize },
    #[error("{workload}: block contents corrupted ({detail})")]
    Corruption {
        workload: &'static str,
        detail: String,
    },
    #[error("{workload}: {outstanding} allocations outstanding after completion")]
    Leak {
        workload: &'static str,
        outstanding: u64,
    },
    #[error("{workload}: worker thread panicked")]
    WorkerPanicked { workload: &'static str },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Available workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Workload {
    /// Random malloc/realloc/free over a slot table, sizes below 4096.
    Fuzz,
    /// Random malloc/free of small blocks, sizes 1..256.
    Stress,
    /// Several threads allocating and releasing concurrently.
    Threads,
    /// Release every other block, then refill the gaps.
    Fragmentation,
    /// Binary search tree whose nodes live in allocator blocks.
    Tree,
    /// Singly linked list whose nodes live in allocator blocks.
    List,
    /// Allocate a batch, release it in shuffled order.
    Shuffle,
    /// Grow and shrink blocks across the small and large paths.
    ReallocChain,
    /// 1 MiB and 100 MiB blocks touched on every page.
    Large,
    /// Sizes at class edges and page boundaries.
    Boundary,
    /// Same-size loops, pyramids, in-order release, alternating sizes.
    Pathological,
}

impl Workload {
    /// Every workload, in suite order.
    pub const ALL: [Workload; 11] = [
        Workload::Fuzz,
        Workload::Stress,
        Workload::Threads,
        Workload::Fragmentation,
        Workload::Tree,
        Workload::List,
        Workload::Shuffle,
        Workload::ReallocChain,
        Workload::Large,
        Workload::Boundary,
        Workload::Pathological,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Fuzz => "fuzz",
            Self::Stress => "stress",
            Self::Threads => "threads",
            Self::Fragmentation => "fragmentation",
            Self::Tree => "tree",
            Self::List => "list",
            Self::Shuffle => "shuffle",
            Self::ReallocChain => "realloc-chain",
            Self::Large => "large",
            Self::Boundary => "boundary",
            Self::Pathological => "pathological",
        }
    }

    /// Operation count used when none is given.
    pub const fn default_ops(self) -> usize {
        match self {
            Self::Fuzz => 200_000,
            Self::Stress | Self::List => 100_000,
            Self::Threads | Self::Tree => 20_000,
            Self::Shuffle | Self::Pathological => 10_000,
            Self::Fragmentation => 1000,
            Self::ReallocChain => 500,
            Self::Large => 2,
            Self::Boundary => 1,
        }
    }

    /// Runs the workload and checks that nothing is left outstanding.
    pub fn run(
        self,
        state: &MallocState,
        options: &WorkloadOptions,
    ) -> Result<WorkloadReport, HarnessError> {
        let ops = options.ops.unwrap_or_else(|| self.default_ops());
        let ctx = Ctx {
            state,
            workload: self.name(),
        };
        let started = Instant::now();
        match self {
            Self::Fuzz => churn(&ctx, options.seed, ops, 4096, true)?,
            Self::Stress => churn(&ctx, options.seed, ops, 256, false)?,
            Self::Threads => threads(&ctx, options.seed, ops, options.threads.max(1))?,
            Self::Fragmentation => fragmentation(&ctx, ops)?,
            Self::Tree => tree(&ctx, options.seed, ops)?,
            Self::List => list(&ctx, ops)?,
            Self::Shuffle => shuffle(&ctx, options.seed, ops)?,
            Self::ReallocChain => realloc_chains(&ctx, options.seed, ops)?,
            Self::Large => large(&ctx)?,
            Self::Boundary => boundary(&ctx)?,
            Self::Pathological => pathological(&ctx, ops)?,
        }
        let duration_ms = started.elapsed().as_millis() as u64;

        let stats = state.stats();
        if stats.outstanding() != 0 {
            return Err(HarnessError::Leak {
                workload: self.name(),
                outstanding: stats.outstanding(),
            });
        }
        Ok(WorkloadReport {
            workload: self,
            seed: options.seed,
            ops,
            duration_ms,
            stats: stats.into(),
        })
    }
}

/// Knobs shared by all workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadOptions {
    pub seed: u64,
    /// Overrides [`Workload::default_ops`].
    pub ops: Option<usize>,
    pub threads: usize,
}

impl Default for WorkloadOptions {
    fn default() -> Self {
        Self {
            seed: 12345,
            ops: None,
            threads: 4,
        }
    }
}

/// Result of a completed workload.
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadReport {
    pub workload: Workload,
    pub seed: u64,
    pub ops: usize,
    pub duration_ms: u64,
    pub stats: StatsView,
}

/// Serializable copy of [`StatsSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsView {
    pub allocations: u64,
    pub releases: u64,
    pub resizes_in_place: u64,
    pub resizes_moved: u64,
    pub slab_maps: u64,
    pub slab_retirements: u64,
    pub live_slabs: usize,
    pub slab_mapped_bytes: usize,
    pub large_maps: u64,
    pub large_unmaps: u64,
    pub large_remaps: u64,
    pub large_active: usize,
    pub large_mapped_bytes: usize,
    pub oom_events: u64,
    pub overflow_rejections: u64,
    pub lock_acquisitions: u64,
    pub lock_contended: u64,
    pub lifecycle_dropped: u64,
}

impl From<StatsSnapshot> for StatsView {
    fn from(s: StatsSnapshot) -> Self {
        Self {
            allocations: s.allocations,
            releases: s.releases,
            resizes_in_place: s.resizes_in_place,
            resizes_moved: s.resizes_moved,
            slab_maps: s.slab_maps,
            slab_retirements: s.slab_retirements,
            live_slabs: s.live_slabs,
            slab_mapped_bytes: s.slab_mapped_bytes,
            large_maps: s.large_maps,
            large_unmaps: s.large_unmaps,
            large_remaps: s.large_remaps,
            large_active: s.large_active,
            large_mapped_bytes: s.large_mapped_bytes,
            oom_events: s.oom_events,
            overflow_rejections: s.overflow_rejections,
            lock_acquisitions: s.lock_acquisitions,
            lock_contended: s.lock_contended,
            lifecycle_dropped: s.lifecycle_dropped,
        }
    }
}

// ---------------------------------------------------------------------------
// Block helpers
// ---------------------------------------------------------------------------

/// Allocator plus the workload name used in errors.
struct Ctx<'a> {
    state: &'a MallocState,
    workload: &'static str,
}

impl Ctx<'_> {
    fn alloc(&self, size: usize) -> Result<NonNull<u8>, HarnessError> {
        self.state
            .allocate(size)
            .ok_or(HarnessError::AllocationFailed {
                workload: self.workload,
                size,
            })
    }

    /// `p` must be a live block owned by the caller; it is consumed on success.
    fn resize(&self, p: NonNull<u8>, size: usize) -> Result<NonNull<u8>, HarnessError> {
        // SAFETY: callers pass only live blocks they own and drop them afterwards.
        unsafe { self.state.resize(Some(p), size) }.ok_or(HarnessError::AllocationFailed {
            workload: self.workload,
            size,
        })
    }

    /// `p` must be a live block owned by the caller.
    fn release(&self, p: NonNull<u8>) {
        // SAFETY: callers pass only live blocks they own, once.
        unsafe { self.state.release(Some(p)) };
    }

    fn corrupted(&self, detail: impl Into<String>) -> HarnessError {
        HarnessError::Corruption {
            workload: self.workload,
            detail: detail.into(),
        }
    }

    fn check(&self, p: NonNull<u8>, tag: u8, len: usize, what: &str) -> Result<(), HarnessError> {
        if holds(p, tag, len) {
            Ok(())
        } else {
            Err(self.corrupted(what))
        }
    }
}

fn fill(p: NonNull<u8>, tag: u8, len: usize) {
    // SAFETY: callers only fill blocks they own, within the requested size.
    unsafe { p.as_ptr().write_bytes(tag, len) };
}

fn holds(p: NonNull<u8>, tag: u8, len: usize) -> bool {
    // SAFETY: callers only read blocks they own, within the requested size.
    unsafe { std::slice::from_raw_parts(p.as_ptr(), len) }
        .iter()
        .all(|&b| b == tag)
}

#[derive(Clone, Copy)]
struct Slot {
    ptr: NonNull<u8>,
    size: usize,
    tag: u8,
}

// ---------------------------------------------------------------------------
// Workloads
// ---------------------------------------------------------------------------

fn churn(
    ctx: &Ctx<'_>,
    seed: u64,
    ops: usize,
    max_size: usize,
    with_resize: bool,
) -> Result<(), HarnessError> {
    const SLOTS: usize = 1000;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut slots: Vec<Option<Slot>> = vec![None; SLOTS];

    for op in 0..ops {
        let idx = rng.random_range(0..SLOTS);
        let tag = (op % 251) as u8;
        match slots[idx] {
            None => {
                let size = rng.random_range(0..max_size);
                let ptr = ctx.alloc(size)?;
                fill(ptr, tag, size);
                slots[idx] = Some(Slot { ptr, size, tag });
            }
            Some(slot) => {
                ctx.check(slot.ptr, slot.tag, slot.size, &format!("op {op}, slot {idx}"))?;
                if with_resize && rng.random_bool(0.5) {
                    let size = rng.random_range(0..max_size);
                    let ptr = ctx.resize(slot.ptr, size)?;
                    ctx.check(ptr, slot.tag, slot.size.min(size), &format!("op {op}, resize"))?;
                    fill(ptr, tag, size);
                    slots[idx] = Some(Slot { ptr, size, tag });
                } else {
                    ctx.release(slot.ptr);
                    slots[idx] = None;
                }
            }
        }
    }

    for slot in slots.into_iter().flatten() {
        ctx.check(slot.ptr, slot.tag, slot.size, "final sweep")?;
        ctx.release(slot.ptr);
    }
    Ok(())
}

fn threads(ctx: &Ctx<'_>, seed: u64, ops: usize, workers: usize) -> Result<(), HarnessError> {
    const MAX_LIVE: usize = 64;
    let state = ctx.state;
    let workload = ctx.workload;

    let results: Vec<Result<(), HarnessError>> = thread::scope(|s| {
        let handles: Vec<_> = (0..workers as u64)
            .map(|worker| {
                s.spawn(move || {
                    let ctx = Ctx { state, workload };
                    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(worker));
                    let tag = worker as u8 ^ 0x5a;
                    let mut live: Vec<(NonNull<u8>, usize)> = Vec::new();
                    let mut outcome = Ok(());
                    for _ in 0..ops {
                        if live.is_empty() || (live.len() < MAX_LIVE && rng.random_bool(0.6)) {
                            let size = rng.random_range(1..512);
                            match ctx.alloc(size) {
                                Ok(p) => {
                                    fill(p, tag, size);
                                    live.push((p, size));
                                }
                                Err(e) => {
                                    outcome = Err(e);
                                    break;
                                }
                            }
                        } else {
                            let (p, size) = live.swap_remove(rng.random_range(0..live.len()));
                            if !holds(p, tag, size) {
                                outcome = Err(ctx.corrupted(format!("worker {worker}")));
                            }
                            ctx.release(p);
                            if outcome.is_err() {
                                break;
                            }
                        }
                    }
                    for (p, _) in live {
                        ctx.release(p);
                    }
                    outcome
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or(Err(HarnessError::WorkerPanicked { workload }))
            })
            .collect()
    });
    results.into_iter().collect()
}

fn fragmentation(ctx: &Ctx<'_>, count: usize) -> Result<(), HarnessError> {
    let mut blocks: Vec<Option<NonNull<u8>>> = Vec::with_capacity(count);
    for i in 0..count {
        blocks.push(Some(ctx.alloc(16 + i % 64)?));
    }
    for slot in blocks.iter_mut().step_by(2) {
        if let Some(p) = slot.take() {
            ctx.release(p);
        }
    }
    for slot in blocks.iter_mut().step_by(2) {
        *slot = Some(ctx.alloc(64)?);
    }
    let mut addrs: Vec<usize> = blocks.iter().flatten().map(|p| p.as_ptr() as usize).collect();
    addrs.sort_unstable();
    addrs.dedup();
    let distinct = addrs.len();
    for p in blocks.into_iter().flatten() {
        ctx.release(p);
    }
    if distinct != count {
        return Err(ctx.corrupted(format!("{distinct} distinct blocks out of {count}")));
    }
    Ok(())
}

#[repr(C)]
struct TreeNode {
    left: *mut TreeNode,
    right: *mut TreeNode,
    key: u32,
}

fn tree(ctx: &Ctx<'_>, seed: u64, count: usize) -> Result<(), HarnessError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut root: *mut TreeNode = std::ptr::null_mut();
    let mut inserted: Vec<u32> = Vec::with_capacity(count);
    let mut failure = None;

    for _ in 0..count {
        let key: u32 = rng.random();
        let node = match ctx.alloc(size_of::<TreeNode>()) {
            Ok(p) => p.cast::<TreeNode>(),
            Err(e) => {
                failure = Some(e);
                break;
            }
        };
        // SAFETY: `node` is a fresh block sized and aligned for a TreeNode;
        // every link points at `root` or a child field of a live node.
        unsafe {
            node.as_ptr().write(TreeNode {
                left: std::ptr::null_mut(),
                right: std::ptr::null_mut(),
                key,
            });
            let mut link: *mut *mut TreeNode = &raw mut root;
            while let Some(current) = NonNull::new(*link) {
                let current = current.as_ptr();
                link = if key < (*current).key {
                    &raw mut (*current).left
                } else {
                    &raw mut (*current).right
                };
            }
            *link = node.as_ptr();
        }
        inserted.push(key);
    }

    let mut keys = Vec::with_capacity(inserted.len());
    drain_tree(ctx, root, &mut keys);
    if let Some(e) = failure {
        return Err(e);
    }
    inserted.sort_unstable();
    if keys != inserted {
        return Err(ctx.corrupted("in-order walk does not match inserted keys"));
    }
    Ok(())
}

/// In-order walk releasing each node after its subtrees.
fn drain_tree(ctx: &Ctx<'_>, node: *mut TreeNode, keys: &mut Vec<u32>) {
    let Some(node) = NonNull::new(node) else {
        return;
    };
    // SAFETY: each node is reachable once and read before it is released.
    let TreeNode { left, right, key } = unsafe { node.as_ptr().read() };
    drain_tree(ctx, left, keys);
    keys.push(key);
    drain_tree(ctx, right, keys);
    ctx.release(node.cast());
}

#[repr(C)]
struct ListNode {
    next: *mut ListNode,
    value: u64,
}

fn list(ctx: &Ctx<'_>, count: usize) -> Result<(), HarnessError> {
    let mut head: *mut ListNode = std::ptr::null_mut();
    let mut built = 0u64;
    let mut failure = None;
    for value in 0..count as u64 {
        match ctx.alloc(size_of::<ListNode>()) {
            Ok(p) => {
                let node = p.cast::<ListNode>();
                // SAFETY: fresh block sized and aligned for a ListNode.
                unsafe { node.as_ptr().write(ListNode { next: head, value }) };
                head = node.as_ptr();
                built += 1;
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    let mut expected = built;
    let mut mismatch = false;
    while let Some(node) = NonNull::new(head) {
        expected = expected.wrapping_sub(1);
        // SAFETY: every node in the chain is live until released below.
        let ListNode { next, value } = unsafe { node.as_ptr().read() };
        mismatch |= value != expected;
        head = next;
        ctx.release(node.cast());
    }
    if let Some(e) = failure {
        return Err(e);
    }
    if mismatch || expected != 0 {
        return Err(ctx.corrupted("list values out of sequence"));
    }
    Ok(())
}

fn shuffle(ctx: &Ctx<'_>, seed: u64, count: usize) -> Result<(), HarnessError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut blocks = Vec::with_capacity(count);
    for i in 0..count {
        let size = rng.random_range(1..=1024);
        let tag = (i % 256) as u8;
        match ctx.alloc(size) {
            Ok(p) => {
                fill(p, tag, size);
                blocks.push(Slot { ptr: p, size, tag });
            }
            Err(e) => {
                for slot in blocks {
                    ctx.release(slot.ptr);
                }
                return Err(e);
            }
        }
    }
    blocks.shuffle(&mut rng);
    let mut corrupt = 0usize;
    for slot in blocks {
        if !holds(slot.ptr, slot.tag, slot.size) {
            corrupt += 1;
        }
        ctx.release(slot.ptr);
    }
    let live = ctx.state.stats().live_small_blocks;
    if corrupt != 0 || live != 0 {
        return Err(ctx.corrupted(format!("{corrupt} corrupt blocks, {live} still live")));
    }
    Ok(())
}

fn realloc_chains(ctx: &Ctx<'_>, seed: u64, chains: usize) -> Result<(), HarnessError> {
    let mut rng = StdRng::seed_from_u64(seed);
    for chain in 0..chains {
        let tag = (chain % 251) as u8 + 1;
        let mut size = rng.random_range(1..64);
        let mut p = ctx.alloc(size)?;
        fill(p, tag, size);
        let steps = [
            size * 2,
            rng.random_range(100..MAX_SMALL_SIZE),
            rng.random_range(MAX_SMALL_SIZE + 1..4 * MAX_SMALL_SIZE),
            rng.random_range(4 * MAX_SMALL_SIZE..16 * MAX_SMALL_SIZE),
            rng.random_range(1..256),
            0,
        ];
        for new_size in steps {
            p = ctx.resize(p, new_size)?;
            let keep = size.min(new_size);
            if !holds(p, tag, keep) {
                ctx.release(p);
                return Err(ctx.corrupted(format!("chain {chain} lost data at {new_size}")));
            }
            fill(p, tag, new_size);
            size = new_size;
        }
        ctx.release(p);
    }
    Ok(())
}

fn large(ctx: &Ctx<'_>) -> Result<(), HarnessError> {
    let page = os::page_size();
    for size in [1 << 20, 100 << 20] {
        let p = ctx.alloc(size)?;
        for offset in (0..size).step_by(page) {
            // SAFETY: offset < size.
            unsafe { *p.as_ptr().add(offset) = (offset / page) as u8 };
        }
        let intact = (0..size)
            .step_by(page)
            // SAFETY: offset < size.
            .all(|offset| unsafe { *p.as_ptr().add(offset) } == (offset / page) as u8);
        ctx.release(p);
        if !intact {
            return Err(ctx.corrupted(format!("{size}-byte block")));
        }
    }
    Ok(())
}

fn boundary(ctx: &Ctx<'_>) -> Result<(), HarnessError> {
    let page = os::page_size();
    let mut sizes = vec![0, 1, 15, 16, 17, 1023, 1024, 1025];
    sizes.extend([page - 1, page, page + 1, 2 * page - 16, 2 * page + 16]);
    sizes.extend([MAX_SMALL_SIZE - 1, MAX_SMALL_SIZE, MAX_SMALL_SIZE + 1]);
    let mut blocks = Vec::with_capacity(sizes.len());
    for (i, &size) in sizes.iter().enumerate() {
        let p = ctx.alloc(size)?;
        fill(p, i as u8, size);
        blocks.push(Slot {
            ptr: p,
            size,
            tag: i as u8,
        });
    }
    let mut bad = None;
    for slot in blocks {
        if !holds(slot.ptr, slot.tag, slot.size) {
            bad.get_or_insert(slot.size);
        }
        ctx.release(slot.ptr);
    }
    match bad {
        Some(size) => Err(ctx.corrupted(format!("{size}-byte block"))),
        None => Ok(()),
    }
}

fn pathological(ctx: &Ctx<'_>, ops: usize) -> Result<(), HarnessError> {
    for _ in 0..ops {
        let p = ctx.alloc(48)?;
        ctx.release(p);
    }

    let mut pyramid = Vec::new();
    for size in (1..=4096).step_by(37) {
        pyramid.push(ctx.alloc(size)?);
    }
    while let Some(p) = pyramid.pop() {
        ctx.release(p);
    }

    let mut in_order = Vec::with_capacity(ops / 3);
    for _ in 0..ops / 3 {
        in_order.push(ctx.alloc(24)?);
    }
    for p in in_order {
        ctx.release(p);
    }

    let mut mixed = Vec::with_capacity(ops / 5);
    for i in 0..ops / 5 {
        let size = if i % 2 == 0 { 8 } else { 4096 };
        let p = ctx.alloc(size)?;
        fill(p, i as u8, size);
        mixed.push(Slot {
            ptr: p,
            size,
            tag: i as u8,
        });
    }
    let mut corrupt = false;
    for slot in mixed {
        corrupt |= !holds(slot.ptr, slot.tag, slot.size);
        ctx.release(slot.ptr);
    }
    if corrupt {
        return Err(ctx.corrupted("alternating sizes"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(ops: usize) -> WorkloadOptions {
        WorkloadOptions {
            seed: 7,
            ops: Some(ops),
            threads: 2,
        }
    }

    #[test]
    fn names_are_unique_and_kebab_case() {
        let mut names: Vec<_> = Workload::ALL.iter().map(|w| w.name()).collect();
        assert!(names.iter().all(|n| !n.contains('_') && n.to_lowercase() == *n));
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Workload::ALL.len());
    }

    #[test]
    fn serde_name_matches_name() {
        for w in Workload::ALL {
            let json = serde_json::to_value(w).unwrap();
            assert_eq!(json, w.name());
        }
    }

    #[test]
    fn fuzz_runs_clean() {
        let state = MallocState::new();
        let report = Workload::Fuzz.run(&state, &quick(5000)).unwrap();
        assert_eq!(report.ops, 5000);
        assert_eq!(report.stats.allocations, report.stats.releases);
        assert!(report.stats.allocations > 0);
    }

    #[test]
    fn threads_run_clean() {
        let state = MallocState::new();
        let report = Workload::Threads.run(&state, &quick(2000)).unwrap();
        assert_eq!(report.stats.large_active, 0);
    }

    #[test]
    fn realloc_chain_touches_large_path() {
        let state = MallocState::new();
        let report = Workload::ReallocChain.run(&state, &quick(10)).unwrap();
        assert!(report.stats.large_maps > 0);
        assert_eq!(report.stats.large_mapped_bytes, 0);
    }

    #[test]
    fn leak_is_reported() {
        let state = MallocState::new();
        let stray = state.allocate(32).unwrap();
        let err = Workload::Boundary
            .run(&state, &WorkloadOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Leak {
                workload: "boundary",
                outstanding: 1
            }
        ));
        // SAFETY: `stray` is live.
        unsafe { state.release(Some(stray)) };
    }
}
