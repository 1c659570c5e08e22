//! Thread-local `errno` access.

use std::ffi::c_int;

pub use libc::{EINVAL, ENOMEM};

/// Sets the calling thread's `errno`.
#[cfg(target_os = "linux")]
pub fn set_errno(value: c_int) {
    // SAFETY: __errno_location returns a valid pointer to this thread's errno.
    unsafe { *libc::__errno_location() = value };
}

#[cfg(not(target_os = "linux"))]
pub fn set_errno(_value: c_int) {}

/// Reads the calling thread's `errno`.
#[cfg(target_os = "linux")]
pub fn get_errno() -> c_int {
    // SAFETY: __errno_location returns a valid pointer to this thread's errno.
    unsafe { *libc::__errno_location() }
}

#[cfg(not(target_os = "linux"))]
pub fn get_errno() -> c_int {
    0
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn errno_round_trip() {
        set_errno(ENOMEM);
        assert_eq!(get_errno(), ENOMEM);
        set_errno(0);
        assert_eq!(get_errno(), 0);
    }
}
