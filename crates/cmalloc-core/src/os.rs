//! Page source: anonymous mappings from the operating system.
//!
//! Every byte the allocator hands out is backed by one of these mappings,
//! either a slab of a size class or a dedicated large-block mapping.
//! Nothing here takes a lock; callers must invoke these outside the
//! class and large-directory locks.

#![allow(unsafe_code)]

use core::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

const FALLBACK_PAGE_SIZE: usize = 4096;

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Returns the system page size, queried once via `sysconf(_SC_PAGESIZE)`.
#[inline]
pub fn page_size() -> usize {
    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    // SAFETY: sysconf has no memory-safety preconditions.
    let queried = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let size = if queried > 0 && (queried as usize).is_power_of_two() {
        queried as usize
    } else {
        FALLBACK_PAGE_SIZE
    };
    PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}

/// Rounds `len` up to a whole number of pages. `None` on overflow.
#[inline]
pub fn page_align(len: usize) -> Option<usize> {
    let mask = page_size() - 1;
    len.checked_add(mask).map(|rounded| rounded & !mask)
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::ENOMEM)
}

/// Maps `len` bytes of zero-filled, private, read/write memory.
///
/// Returns `None` for a zero length or when the kernel refuses the mapping.
/// `len` should already be page-aligned.
pub fn map_pages(len: usize) -> Option<NonNull<u8>> {
    if len == 0 {
        return None;
    }
    // SAFETY: anonymous private mapping with no address hint and no fd.
    let ptr = unsafe {
        libc::mmap(
            core::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return None;
    }
    NonNull::new(ptr.cast::<u8>())
}

/// Returns a mapping to the operating system.
///
/// On failure the errno value is returned and the range stays mapped.
///
/// # Safety
///
/// `[ptr, ptr + len)` must be exactly a range obtained from [`map_pages`] or
/// [`remap_pages`] and no live reference into it may remain.
pub unsafe fn unmap_pages(ptr: NonNull<u8>, len: usize) -> Result<(), i32> {
    // SAFETY: caller guarantees ptr/len describe an owned mapping.
    let rc = unsafe { libc::munmap(ptr.as_ptr().cast(), len) };
    if rc == 0 { Ok(()) } else { Err(last_errno()) }
}

/// Grows or shrinks a mapping, letting the kernel move it.
///
/// Contents up to `min(old_len, new_len)` are preserved and any new tail is
/// zero-filled. On failure the original mapping is left untouched.
///
/// # Safety
///
/// `[ptr, ptr + old_len)` must be a mapping owned by the caller. On success
/// the old range must no longer be used.
#[cfg(target_os = "linux")]
pub unsafe fn remap_pages(ptr: NonNull<u8>, old_len: usize, new_len: usize) -> Option<NonNull<u8>> {
    if new_len == 0 {
        return None;
    }
    // SAFETY: caller guarantees the old mapping; MREMAP_MAYMOVE lets the
    // kernel pick a new address, so no fixed range is clobbered.
    let moved = unsafe {
        libc::mremap(
            ptr.as_ptr().cast(),
            old_len,
            new_len,
            libc::MREMAP_MAYMOVE,
        )
    };
    if moved == libc::MAP_FAILED {
        return None;
    }
    NonNull::new(moved.cast::<u8>())
}

/// Remapping is unavailable off Linux; callers fall back to copy.
///
/// # Safety
///
/// Never touches memory.
#[cfg(not(target_os = "linux"))]
pub unsafe fn remap_pages(
    _ptr: NonNull<u8>,
    _old_len: usize,
    _new_len: usize,
) -> Option<NonNull<u8>> {
    None
}
