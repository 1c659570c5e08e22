//! Process-wide allocator.
//!
//! The global `MallocState` is created on first use with configuration read
//! from the environment, and lives for the rest of the process.

use core::ptr::NonNull;
use std::sync::OnceLock;

use crate::allocator::MallocState;
use crate::config::AllocatorConfig;
use crate::events::AllocatorLogRecord;
use crate::stats::StatsSnapshot;

static GLOBAL: OnceLock<MallocState> = OnceLock::new();

/// The process-wide allocator state.
pub fn global() -> &'static MallocState {
    GLOBAL.get_or_init(|| MallocState::with_config(AllocatorConfig::from_env()))
}

/// See [`MallocState::allocate`].
#[inline]
pub fn allocate(size: usize) -> Option<NonNull<u8>> {
    global().allocate(size)
}

/// See [`MallocState::release`].
///
/// # Safety
///
/// `ptr` must be `None` or a live pointer obtained from this module.
#[inline]
#[allow(unsafe_code)]
pub unsafe fn release(ptr: Option<NonNull<u8>>) {
    // SAFETY: forwarded from the caller.
    unsafe { global().release(ptr) }
}

/// See [`MallocState::resize`].
///
/// # Safety
///
/// `ptr` must be `None` or a live pointer obtained from this module.
#[inline]
#[allow(unsafe_code)]
pub unsafe fn resize(ptr: Option<NonNull<u8>>, new_size: usize) -> Option<NonNull<u8>> {
    // SAFETY: forwarded from the caller.
    unsafe { global().resize(ptr, new_size) }
}

/// See [`MallocState::zero_allocate`].
#[inline]
pub fn zero_allocate(count: usize, size: usize) -> Option<NonNull<u8>> {
    global().zero_allocate(count, size)
}

/// See [`MallocState::aligned_allocate`].
#[inline]
pub fn aligned_allocate(align: usize, size: usize) -> Option<NonNull<u8>> {
    global().aligned_allocate(align, size)
}

/// See [`MallocState::usable_size`].
///
/// # Safety
///
/// `ptr` must be `None` or a live pointer obtained from this module.
#[inline]
#[allow(unsafe_code)]
pub unsafe fn usable_size(ptr: Option<NonNull<u8>>) -> usize {
    // SAFETY: forwarded from the caller.
    unsafe { global().usable_size(ptr) }
}

pub fn stats() -> StatsSnapshot {
    global().stats()
}

pub fn drain_lifecycle_logs() -> Vec<AllocatorLogRecord> {
    global().drain_lifecycle_logs()
}
