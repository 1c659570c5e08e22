//! # cmalloc-abi
//!
//! C-callable allocation entry points backed by the process-wide
//! `cmalloc_core` allocator. Symbols carry a `cm_` prefix so loading the
//! library never replaces the host's own `malloc`.

pub mod errno;
pub mod malloc_abi;

pub use malloc_abi::{
    cm_aligned_alloc, cm_calloc, cm_free, cm_malloc, cm_malloc_usable_size, cm_posix_memalign,
    cm_realloc,
};
