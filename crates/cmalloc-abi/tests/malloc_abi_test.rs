//! Integration tests for the `cm_*` entry points.

use std::ffi::c_void;
use std::ptr;

use cmalloc_abi::errno::{EINVAL, ENOMEM, get_errno, set_errno};
use cmalloc_abi::*;

#[test]
fn malloc_free_round_trip() {
    // SAFETY: every pointer is freed once.
    unsafe {
        let p = cm_malloc(64);
        assert!(!p.is_null());
        assert_eq!(p as usize % 16, 0);
        ptr::write_bytes(p.cast::<u8>(), 0x42, 64);
        assert!(cm_malloc_usable_size(p) >= 64);
        cm_free(p);
    }
}

#[test]
fn malloc_zero_is_unique() {
    // SAFETY: both pointers are freed once.
    unsafe {
        let a = cm_malloc(0);
        let b = cm_malloc(0);
        assert!(!a.is_null() && !b.is_null());
        assert_ne!(a, b);
        cm_free(a);
        cm_free(b);
    }
}

#[test]
fn free_null_is_noop() {
    // SAFETY: null is accepted.
    unsafe { cm_free(ptr::null_mut()) };
}

#[test]
fn realloc_null_allocates_and_preserves_on_grow() {
    // SAFETY: pointers are used only while live.
    unsafe {
        let p = cm_realloc(ptr::null_mut(), 100);
        assert!(!p.is_null());
        ptr::write_bytes(p.cast::<u8>(), 0xaa, 100);
        let q = cm_realloc(p, 200_000);
        assert!(!q.is_null());
        let data = std::slice::from_raw_parts(q.cast::<u8>(), 100);
        assert!(data.iter().all(|&b| b == 0xaa));
        cm_free(q);
    }
}

#[test]
fn realloc_failure_keeps_old_block() {
    // SAFETY: p stays live after the failed realloc and is freed once.
    unsafe {
        let p = cm_malloc(32);
        ptr::write_bytes(p.cast::<u8>(), 0x5a, 32);
        set_errno(0);
        let q = cm_realloc(p, usize::MAX);
        assert!(q.is_null());
        #[cfg(target_os = "linux")]
        assert_eq!(get_errno(), ENOMEM);
        let data = std::slice::from_raw_parts(p.cast::<u8>(), 32);
        assert!(data.iter().all(|&b| b == 0x5a));
        cm_free(p);
    }
}

#[test]
fn calloc_zeroes_and_rejects_overflow() {
    // SAFETY: p is freed once.
    unsafe {
        let p = cm_calloc(100, 10);
        assert!(!p.is_null());
        let data = std::slice::from_raw_parts(p.cast::<u8>(), 1000);
        assert!(data.iter().all(|&b| b == 0));
        cm_free(p);

        set_errno(0);
        assert!(cm_calloc(usize::MAX, 2).is_null());
        #[cfg(target_os = "linux")]
        assert_eq!(get_errno(), ENOMEM);
    }
}

#[test]
fn aligned_alloc_honours_alignment() {
    // SAFETY: every pointer is freed once.
    unsafe {
        for align in [8usize, 16, 64, 4096, 1 << 16] {
            let p = cm_aligned_alloc(align, 100);
            assert!(!p.is_null(), "align {align}");
            assert_eq!(p as usize % align, 0, "align {align}");
            ptr::write_bytes(p.cast::<u8>(), 1, 100);
            cm_free(p);
        }
    }
}

#[test]
fn aligned_alloc_rejects_bad_alignment() {
    set_errno(0);
    // SAFETY: no block is returned.
    let p = unsafe { cm_aligned_alloc(24, 64) };
    assert!(p.is_null());
    #[cfg(target_os = "linux")]
    assert_eq!(get_errno(), EINVAL);
}

#[test]
fn posix_memalign_contract() {
    let mut out: *mut c_void = ptr::null_mut();
    // SAFETY: `out` is a valid slot; the block is freed once.
    unsafe {
        assert_eq!(cm_posix_memalign(&mut out, 256, 1000), 0);
        assert!(!out.is_null());
        assert_eq!(out as usize % 256, 0);
        cm_free(out);

        let mut untouched: *mut c_void = ptr::null_mut();
        assert_eq!(cm_posix_memalign(&mut untouched, 4, 16), EINVAL);
        assert_eq!(cm_posix_memalign(&mut untouched, 48, 16), EINVAL);
        assert!(untouched.is_null());
        assert_eq!(cm_posix_memalign(&mut untouched, 64, usize::MAX), ENOMEM);
        assert!(untouched.is_null());
    }
}

#[test]
fn usable_size_of_null_is_zero() {
    // SAFETY: null is accepted.
    assert_eq!(unsafe { cm_malloc_usable_size(ptr::null_mut()) }, 0);
}
