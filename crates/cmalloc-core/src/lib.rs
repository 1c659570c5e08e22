//! # cmalloc-core
//!
//! Concurrent general-purpose memory allocator engine.
//!
//! Small requests (up to 32 KiB) are rounded to one of 32 size classes and
//! carved from per-class slabs; larger or over-aligned requests get their own
//! anonymous mapping. Every payload is preceded by a 16-byte header so that
//! release and resize recover everything they need from the pointer alone.
//!
//! Each size class, the large directory and the lifecycle log sit behind
//! their own lock, so threads working on different classes never contend.
//!
//! The engine exports no C symbols itself; see `cmalloc-abi` for the
//! `extern "C"` surface.

#![deny(unsafe_code)]

pub mod allocator;
pub mod api;
pub mod config;
pub mod events;
pub mod free_list;
pub mod guard;
pub mod header;
pub mod large;
pub mod os;
pub mod size_class;
pub mod slab;
pub mod stats;

pub use allocator::MallocState;
pub use config::{AllocatorConfig, ConfigError};
pub use events::{AllocatorEvent, AllocatorLogLevel, AllocatorLogRecord};
pub use header::{ALIGNMENT, HEADER_SIZE};
pub use size_class::{MAX_SMALL_SIZE, NUM_SIZE_CLASSES};
pub use stats::StatsSnapshot;
