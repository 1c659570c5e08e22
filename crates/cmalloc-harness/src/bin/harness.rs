//! CLI entrypoint for the cmalloc workload harness.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use cmalloc_core::AllocatorConfig;
use cmalloc_harness::structured_log::validate_log_file;
use cmalloc_harness::{LogEmitter, Workload, WorkloadOptions, WorkloadRunner};

/// Workload tooling for cmalloc.
#[derive(Debug, Parser)]
#[command(name = "cmalloc-harness")]
#[command(about = "Seeded allocation workloads with JSONL structured logs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a single workload.
    Run {
        /// Workload to run.
        #[arg(value_enum)]
        workload: Workload,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Run every workload.
    Suite {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// List workloads and their default operation counts.
    List,
    /// Validate a JSONL log produced by `run` or `suite`.
    ValidateLog {
        /// JSONL log path.
        #[arg(long)]
        log: PathBuf,
    },
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// Root seed (decimal or 0x...).
    #[arg(long, default_value = "12345")]
    seed: String,
    /// Operation count override.
    #[arg(long)]
    ops: Option<usize>,
    /// Worker threads for the `threads` workload.
    #[arg(long, default_value_t = 4)]
    threads: usize,
    /// Output JSONL path (if omitted, prints to stdout).
    #[arg(long)]
    log: Option<PathBuf>,
    /// Run identifier embedded in trace ids.
    #[arg(long, default_value = "local")]
    run_id: String,
    /// Empty slabs kept per class (overrides CMALLOC_RETAIN_SLABS).
    #[arg(long)]
    retain_slabs: Option<usize>,
    /// Lifecycle ring capacity (overrides CMALLOC_EVENT_LOG).
    #[arg(long)]
    event_log: Option<usize>,
    /// Disable mremap for large blocks.
    #[arg(long)]
    no_remap: bool,
}

impl CommonArgs {
    fn runner(&self) -> Result<WorkloadRunner, Box<dyn std::error::Error>> {
        let mut config = AllocatorConfig::try_from_env()?;
        if let Some(retain) = self.retain_slabs {
            config.retain_empty_slabs = retain;
        }
        if let Some(capacity) = self.event_log {
            config.event_log_capacity = capacity;
        }
        if self.no_remap {
            config.remap_large = false;
        }
        let options = WorkloadOptions {
            seed: parse_seed(&self.seed)?,
            ops: self.ops,
            threads: self.threads,
        };
        Ok(WorkloadRunner::new(config, options))
    }

    fn emitter(&self) -> std::io::Result<LogEmitter> {
        match &self.log {
            Some(path) => LogEmitter::to_file(path, &self.run_id),
            None => Ok(LogEmitter::to_stdout(&self.run_id)),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { workload, common } => {
            let runner = common.runner()?;
            let mut emitter = common.emitter()?;
            eprintln!("Running {} (seed {})", workload.name(), runner.options.seed);
            let result = runner.run(workload, &mut emitter);
            emitter.flush()?;
            let report = result?;
            eprintln!(
                "{} passed in {} ms: live_slabs={}, slab_mapped_bytes={}, large_mapped_bytes={}",
                workload.name(),
                report.duration_ms,
                report.stats.live_slabs,
                report.stats.slab_mapped_bytes,
                report.stats.large_mapped_bytes,
            );
        }
        Command::Suite { common } => {
            let runner = common.runner()?;
            let mut emitter = common.emitter()?;
            let summary = runner.run_all(&Workload::ALL, &mut emitter)?;
            for report in &summary.reports {
                eprintln!(
                    "PASS {:<14} {:>6} ms  live_slabs={} mapped={}",
                    report.workload.name(),
                    report.duration_ms,
                    report.stats.live_slabs,
                    report.stats.slab_mapped_bytes + report.stats.large_mapped_bytes,
                );
            }
            for (workload, error) in &summary.failures {
                eprintln!("FAIL {:<14} {error}", workload.name());
            }
            eprintln!(
                "Suite complete: passed={}, failed={}",
                summary.passed(),
                summary.failed()
            );
            if summary.failed() > 0 {
                return Err(format!("{} workload(s) failed", summary.failed()).into());
            }
        }
        Command::List => {
            for workload in Workload::ALL {
                println!("{:<14} {}", workload.name(), workload.default_ops());
            }
        }
        Command::ValidateLog { log } => {
            let (lines, errors) = validate_log_file(&log)?;
            for error in &errors {
                eprintln!("{error}");
            }
            eprintln!("Validated {lines} line(s), {} error(s)", errors.len());
            if !errors.is_empty() {
                return Err(format!("{} invalid log field(s)", errors.len()).into());
            }
        }
    }

    Ok(())
}

fn parse_seed(raw: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let cleaned = raw.trim().replace('_', "");
    let seed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16)?,
        None => cleaned.parse()?,
    };
    Ok(seed)
}
