//! End-to-end: run the full suite at reduced scale and validate the JSONL log.

use cmalloc_core::AllocatorConfig;
use cmalloc_harness::structured_log::{validate_log_file, validate_log_line};
use cmalloc_harness::{LogEmitter, Workload, WorkloadOptions, WorkloadRunner};

fn scratch_log(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("cmalloc-harness-{name}-{}.jsonl", std::process::id()))
}

fn small_runner(config: AllocatorConfig) -> WorkloadRunner {
    WorkloadRunner::new(
        config,
        WorkloadOptions {
            seed: 12345,
            ops: Some(2000),
            threads: 3,
        },
    )
}

#[test]
fn suite_passes_and_log_validates() {
    let path = scratch_log("suite");
    let mut emitter = LogEmitter::to_file(&path, "it-suite").unwrap();
    let summary = small_runner(AllocatorConfig::default())
        .run_all(&Workload::ALL, &mut emitter)
        .unwrap();
    drop(emitter);

    assert_eq!(summary.failed(), 0, "failures: {:?}", summary.failures);
    assert_eq!(summary.passed(), Workload::ALL.len());
    for report in &summary.reports {
        assert_eq!(report.stats.allocations, report.stats.releases, "{:?}", report.workload);
        assert_eq!(report.stats.large_active, 0);
        assert_eq!(report.stats.large_mapped_bytes, 0);
    }

    let (lines, errors) = validate_log_file(&path).unwrap();
    assert!(errors.is_empty(), "{}", errors[0]);
    // start + result per workload + suite_result, plus lifecycle records.
    assert!(lines > 2 * Workload::ALL.len());

    let content = std::fs::read_to_string(&path).unwrap();
    let entries: Vec<_> = content
        .lines()
        .enumerate()
        .map(|(i, line)| validate_log_line(line, i + 1).unwrap())
        .collect();
    assert_eq!(entries.last().unwrap().event, "suite_result");
    let results = entries.iter().filter(|e| e.event == "workload_result").count();
    assert_eq!(results, Workload::ALL.len());
    assert!(entries.iter().any(|e| e.event == "slab_map"));
    assert!(entries.iter().any(|e| e.event == "large_map"));
    std::fs::remove_file(&path).ok();
}

#[test]
fn retirement_is_visible_with_no_retained_slabs() {
    let config = AllocatorConfig {
        retain_empty_slabs: 0,
        ..AllocatorConfig::default()
    };
    let mut emitter = LogEmitter::to_buffer("it-retire");
    let report = small_runner(config)
        .run(Workload::Shuffle, &mut emitter)
        .unwrap();
    assert_eq!(report.stats.live_slabs, 0);
    assert_eq!(report.stats.slab_mapped_bytes, 0);
    assert_eq!(report.stats.slab_maps, report.stats.slab_retirements);
}

#[test]
fn remap_disabled_still_passes_realloc_chains() {
    let config = AllocatorConfig {
        remap_large: false,
        ..AllocatorConfig::default()
    };
    let mut emitter = LogEmitter::to_buffer("it-noremap");
    let report = small_runner(config)
        .run(Workload::ReallocChain, &mut emitter)
        .unwrap();
    assert_eq!(report.stats.large_remaps, 0);
    assert!(report.stats.large_maps > 0);
}

#[test]
fn evicted_lifecycle_records_are_counted() {
    let config = AllocatorConfig {
        event_log_capacity: 1,
        ..AllocatorConfig::default()
    };
    let mut emitter = LogEmitter::to_buffer("it-evict");
    let report = small_runner(config)
        .run(Workload::Large, &mut emitter)
        .unwrap();
    // Two maps and two unmaps through a one-record ring.
    assert_eq!(report.stats.lifecycle_dropped, 3);
}
