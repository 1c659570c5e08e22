//! ABI layer for the `cm_*` allocation family.
//!
//! Each entry point converts between raw C pointers and the safe
//! `Option<NonNull<u8>>` surface of `cmalloc_core::api`, and reports
//! failures through `errno` the way the POSIX counterparts do.

use std::ffi::{c_int, c_void};
use std::ptr::{self, NonNull};

use cmalloc_core::api;

use crate::errno::{EINVAL, ENOMEM, set_errno};

#[inline]
fn to_c(block: Option<NonNull<u8>>) -> *mut c_void {
    match block {
        Some(p) => p.as_ptr().cast(),
        None => {
            set_errno(ENOMEM);
            ptr::null_mut()
        }
    }
}

#[inline]
fn from_c(ptr: *mut c_void) -> Option<NonNull<u8>> {
    NonNull::new(ptr.cast())
}

// ---------------------------------------------------------------------------
// malloc / free / realloc / calloc
// ---------------------------------------------------------------------------

/// `malloc` counterpart -- returns a 16-byte aligned block of at least
/// `size` bytes, or null with `errno = ENOMEM`.
///
/// `cm_malloc(0)` returns a unique non-null pointer.
///
/// # Safety
///
/// Always safe to call; the returned pointer must be released with `cm_free`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cm_malloc(size: usize) -> *mut c_void {
    to_c(api::allocate(size))
}

/// `free` counterpart. Null is a no-op.
///
/// # Safety
///
/// `ptr` must be null or a live pointer returned by this family that has not
/// been freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cm_free(ptr: *mut c_void) {
    // SAFETY: caller guarantees `ptr` is null or a live block.
    unsafe { api::release(from_c(ptr)) }
}

/// `realloc` counterpart -- resizes the block at `ptr` to `size` bytes.
///
/// Null `ptr` behaves as `cm_malloc(size)`. On failure the old block is left
/// untouched and null is returned with `errno = ENOMEM`.
///
/// # Safety
///
/// `ptr` must be null or a live pointer returned by this family. On success
/// the old pointer must not be used again.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cm_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    // SAFETY: caller guarantees `ptr` is null or a live block.
    to_c(unsafe { api::resize(from_c(ptr), size) })
}

/// `calloc` counterpart -- zeroed storage for `nmemb * size` bytes.
///
/// Returns null with `errno = ENOMEM` when the product overflows.
///
/// # Safety
///
/// Always safe to call; the returned pointer must be released with `cm_free`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cm_calloc(nmemb: usize, size: usize) -> *mut c_void {
    to_c(api::zero_allocate(nmemb, size))
}

// ---------------------------------------------------------------------------
// aligned_alloc / posix_memalign
// ---------------------------------------------------------------------------

/// `aligned_alloc` counterpart.
///
/// Returns null with `errno = EINVAL` when `alignment` is not a power of two,
/// or with `errno = ENOMEM` when storage is exhausted.
///
/// # Safety
///
/// Always safe to call; the returned pointer must be released with `cm_free`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cm_aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
    if !alignment.is_power_of_two() {
        set_errno(EINVAL);
        return ptr::null_mut();
    }
    to_c(api::aligned_allocate(alignment, size))
}

/// `posix_memalign` counterpart.
///
/// Returns `EINVAL` if `alignment` is not a power-of-two multiple of
/// `sizeof(void *)`, `ENOMEM` on exhaustion, and 0 on success. `errno` is
/// not modified, and `*memptr` is only written on success.
///
/// # Safety
///
/// `memptr` must be valid for a pointer-sized write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cm_posix_memalign(
    memptr: *mut *mut c_void,
    alignment: usize,
    size: usize,
) -> c_int {
    if memptr.is_null()
        || !alignment.is_power_of_two()
        || alignment % size_of::<*mut c_void>() != 0
    {
        return EINVAL;
    }
    match api::aligned_allocate(alignment, size) {
        Some(p) => {
            // SAFETY: caller guarantees `memptr` is writable.
            unsafe { *memptr = p.as_ptr().cast() };
            0
        }
        None => ENOMEM,
    }
}

// ---------------------------------------------------------------------------
// introspection
// ---------------------------------------------------------------------------

/// `malloc_usable_size` counterpart. Null yields 0.
///
/// # Safety
///
/// `ptr` must be null or a live pointer returned by this family.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cm_malloc_usable_size(ptr: *mut c_void) -> usize {
    // SAFETY: caller guarantees `ptr` is null or a live block.
    unsafe { api::usable_size(from_c(ptr)) }
}
