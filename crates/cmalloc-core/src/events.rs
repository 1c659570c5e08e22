//! Allocator lifecycle records.
//!
//! Only coarse events are recorded: slabs and large blocks being mapped,
//! remapped or returned to the OS, plus failed requests. Per-block traffic is
//! never logged. Records are plain `Copy` data kept in a bounded ring, so
//! recording never formats strings or grows without bound.

use std::collections::VecDeque;

use crate::size_class::NUM_SIZE_CLASSES;

/// Allocator lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AllocatorLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl AllocatorLogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocatorEvent {
    SlabMap,
    SlabRetire,
    LargeMap,
    LargeUnmap,
    LargeRemap,
    OutOfMemory,
    SizeOverflow,
}

impl AllocatorEvent {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SlabMap => "slab_map",
            Self::SlabRetire => "slab_retire",
            Self::LargeMap => "large_map",
            Self::LargeUnmap => "large_unmap",
            Self::LargeRemap => "large_remap",
            Self::OutOfMemory => "oom",
            Self::SizeOverflow => "size_overflow",
        }
    }

    /// Default severity of this event.
    pub const fn level(self) -> AllocatorLogLevel {
        match self {
            Self::SlabMap | Self::SlabRetire => AllocatorLogLevel::Debug,
            Self::LargeMap | Self::LargeUnmap | Self::LargeRemap => AllocatorLogLevel::Trace,
            Self::SizeOverflow => AllocatorLogLevel::Warn,
            Self::OutOfMemory => AllocatorLogLevel::Error,
        }
    }
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    pub level: AllocatorLogLevel,
    /// Entry point that caused the event (`malloc`, `free`, `realloc`, ...).
    pub symbol: &'static str,
    pub event: AllocatorEvent,
    /// Mapping or payload address involved in the event.
    pub ptr: Option<usize>,
    /// Byte count involved in the event.
    pub size: Option<usize>,
    /// Size-class bin (`NUM_SIZE_CLASSES` for large allocations).
    pub bin: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
}

impl AllocatorLogRecord {
    /// Correlation id for this record.
    pub fn trace_id(&self) -> String {
        format!("core::malloc::{}::{:016x}", self.symbol, self.decision_id)
    }

    /// True if the record concerns the large path.
    pub fn is_large(&self) -> bool {
        self.bin == Some(NUM_SIZE_CLASSES)
    }
}

/// Fields supplied by the caller; the log fills in id and level.
#[derive(Debug, Clone, Copy)]
pub struct EventDraft {
    pub symbol: &'static str,
    pub event: AllocatorEvent,
    pub ptr: Option<usize>,
    pub size: Option<usize>,
    pub bin: Option<usize>,
    pub outcome: &'static str,
}

/// Bounded ring of lifecycle records. The oldest record is evicted when full.
#[derive(Debug)]
pub struct EventLog {
    records: VecDeque<AllocatorLogRecord>,
    capacity: usize,
    next_decision_id: u64,
    dropped: u64,
}

impl EventLog {
    /// A ring holding at most `capacity` records; 0 disables recording.
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            next_decision_id: 1,
            dropped: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    /// Appends a record and returns its decision id (0 when disabled).
    pub fn record(&mut self, draft: EventDraft) -> u64 {
        if !self.is_enabled() {
            return 0;
        }
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        if self.records.len() == self.capacity {
            self.records.pop_front();
            self.dropped += 1;
        }
        self.records.push_back(AllocatorLogRecord {
            decision_id,
            level: draft.event.level(),
            symbol: draft.symbol,
            event: draft.event,
            ptr: draft.ptr,
            size: draft.size,
            bin: draft.bin,
            outcome: draft.outcome,
        });
        decision_id
    }

    /// Removes and returns every buffered record, oldest first.
    pub fn drain(&mut self) -> Vec<AllocatorLogRecord> {
        self.records.drain(..).collect()
    }

    /// Copies the buffered records without removing them.
    pub fn snapshot(&self) -> Vec<AllocatorLogRecord> {
        self.records.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records evicted because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
