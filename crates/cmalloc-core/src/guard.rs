//! Concurrency guard for allocator state.
//!
//! Every mutable piece of shared state lives in its own lock domain: one per
//! size class, one for the large-mapping directory, one for the lifecycle
//! event ring. Operations on different domains never block each other.
//!
//! Lock ordering: an operation holds at most one of the class/large domains
//! at a time. `Events` is a leaf and is only taken with no other domain held.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

/// Identifies which piece of allocator state a lock protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockDomain {
    Class(usize),
    Large,
    Events,
}

/// Acquisition counters for one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockContention {
    pub domain: LockDomain,
    pub acquisitions: u64,
    /// Acquisitions that found the lock held and had to block.
    pub contended: u64,
}

/// A `parking_lot::Mutex` that counts how often callers had to wait.
#[derive(Debug)]
pub struct Guarded<T> {
    domain: LockDomain,
    inner: Mutex<T>,
    acquisitions: AtomicU64,
    contended: AtomicU64,
}

impl<T> Guarded<T> {
    pub fn new(domain: LockDomain, value: T) -> Self {
        Self {
            domain,
            inner: Mutex::new(value),
            acquisitions: AtomicU64::new(0),
            contended: AtomicU64::new(0),
        }
    }

    /// Acquires the lock, trying the uncontended path first.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        if let Some(guard) = self.inner.try_lock() {
            return guard;
        }
        self.contended.fetch_add(1, Ordering::Relaxed);
        self.inner.lock()
    }

    /// Acquires the lock without touching the counters, for readers that
    /// only gather gauges.
    #[inline]
    pub fn lock_uncounted(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }

    #[must_use]
    pub fn contention(&self) -> LockContention {
        LockContention {
            domain: self.domain,
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
        }
    }

    /// Direct access when the caller already has exclusive ownership.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}
