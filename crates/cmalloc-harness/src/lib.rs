//! Workload harness for cmalloc.
//!
//! This crate provides:
//! - Workloads: seeded programs that drive a `MallocState` the way real
//!   callers do (fuzz, stress, threads, fragmentation, pointer structures)
//! - Runner: executes workloads against fresh allocator instances and turns
//!   their results plus drained lifecycle records into log entries
//! - Structured logs: the JSONL record format shared by the CLI and tests

#![deny(unsafe_code)]

pub mod runner;
pub mod structured_log;
pub mod workloads;

pub use runner::WorkloadRunner;
pub use structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
pub use workloads::{HarnessError, Workload, WorkloadOptions, WorkloadReport};
