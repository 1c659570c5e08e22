//! Workload execution engine.

use cmalloc_core::{AllocatorConfig, MallocState};

use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
use crate::workloads::{HarnessError, Workload, WorkloadOptions, WorkloadReport};

/// Runs workloads against fresh allocator instances and logs the results.
#[derive(Debug, Clone, Copy)]
pub struct WorkloadRunner {
    pub config: AllocatorConfig,
    pub options: WorkloadOptions,
}

/// Outcome counts for a batch of workloads.
#[derive(Debug, Default)]
pub struct SuiteSummary {
    pub reports: Vec<WorkloadReport>,
    pub failures: Vec<(Workload, String)>,
}

impl SuiteSummary {
    pub fn passed(&self) -> usize {
        self.reports.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

impl WorkloadRunner {
    #[must_use]
    pub fn new(config: AllocatorConfig, options: WorkloadOptions) -> Self {
        Self { config, options }
    }

    /// Run one workload on its own `MallocState`.
    ///
    /// Emits `workload_start`, every drained lifecycle record, then
    /// `workload_result`. Workload failures are logged and returned; only
    /// log I/O failures take precedence.
    pub fn run(
        &self,
        workload: Workload,
        emitter: &mut LogEmitter,
    ) -> Result<WorkloadReport, HarnessError> {
        let state = MallocState::with_config(self.config);
        let start = LogEntry::new(emitter.next_trace_id(), LogLevel::Info, "workload_start")
            .with_workload(workload.name())
            .with_seed(self.options.seed)
            .with_details(serde_json::json!({
                "retain_empty_slabs": self.config.retain_empty_slabs,
                "event_log_capacity": self.config.event_log_capacity,
                "remap_large": self.config.remap_large,
                "threads": self.options.threads,
            }));
        emitter.emit_entry(start)?;

        let result = workload.run(&state, &self.options);

        for record in state.drain_lifecycle_logs() {
            emitter.emit_entry(LogEntry::from(&record).with_workload(workload.name()))?;
        }

        let entry = LogEntry::new(emitter.next_trace_id(), LogLevel::Info, "workload_result")
            .with_workload(workload.name())
            .with_seed(self.options.seed);
        let entry = match &result {
            Ok(report) => entry
                .with_outcome(Outcome::Pass)
                .with_duration_ms(report.duration_ms)
                .with_details(serde_json::to_value(report)?),
            Err(err) => {
                let mut entry = entry
                    .with_outcome(Outcome::Fail)
                    .with_details(serde_json::json!({ "error": err.to_string() }));
                entry.level = LogLevel::Error;
                entry
            }
        };
        emitter.emit_entry(entry)?;
        result
    }

    /// Run every workload in `workloads`, continuing past failures.
    pub fn run_all(
        &self,
        workloads: &[Workload],
        emitter: &mut LogEmitter,
    ) -> Result<SuiteSummary, HarnessError> {
        let mut summary = SuiteSummary::default();
        for &workload in workloads {
            match self.run(workload, emitter) {
                Ok(report) => summary.reports.push(report),
                Err(err @ (HarnessError::Io(_) | HarnessError::Json(_))) => return Err(err),
                Err(err) => summary.failures.push((workload, err.to_string())),
            }
        }
        let level = if summary.failures.is_empty() {
            LogLevel::Info
        } else {
            LogLevel::Error
        };
        let outcome = if summary.failures.is_empty() {
            Outcome::Pass
        } else {
            Outcome::Fail
        };
        let entry = LogEntry::new(emitter.next_trace_id(), level, "suite_result")
            .with_seed(self.options.seed)
            .with_outcome(outcome)
            .with_details(serde_json::json!({
                "passed": summary.passed(),
                "failed": summary.failed(),
                "failures": summary
                    .failures
                    .iter()
                    .map(|(w, e)| serde_json::json!({ "workload": w.name(), "error": e }))
                    .collect::<Vec<_>>(),
            }));
        emitter.emit_entry(entry)?;
        emitter.flush()?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(ops: usize) -> WorkloadRunner {
        WorkloadRunner::new(
            AllocatorConfig::default(),
            WorkloadOptions {
                seed: 3,
                ops: Some(ops),
                threads: 2,
            },
        )
    }

    #[test]
    fn run_emits_start_and_result() {
        let mut emitter = LogEmitter::to_buffer("unit");
        let report = runner(500).run(Workload::Stress, &mut emitter).unwrap();
        assert_eq!(report.workload, Workload::Stress);
        // start + at least one slab_map record + result
        assert!(emitter.lines() >= 3);
    }

    #[test]
    fn run_all_counts_every_workload() {
        let mut emitter = LogEmitter::to_buffer("unit");
        let workloads = [Workload::Fragmentation, Workload::Boundary, Workload::List];
        let summary = runner(200).run_all(&workloads, &mut emitter).unwrap();
        assert_eq!(summary.passed(), 3);
        assert_eq!(summary.failed(), 0);
    }
}
