//! Integration tests: bundled traces and stress seeds replay cleanly.
//!
//! Validates:
//! 1. Every trace under `traces/` parses and replays with the validator after
//!    each op.
//! 2. The coalescing trace ends with a fully merged heap.
//! 3. Verify-mode allocators produce no error records on clean runs.
//! 4. Several stress seeds run to completion with periodic checks.

use std::path::{Path, PathBuf};

use segalloc_core::{AllocatorConfig, AllocatorLogLevel, CheckMode};
use segalloc_harness::{ReplayOptions, StressConfig, Trace, TraceOp, replay, run_stress};

fn traces_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("traces")
}

fn bundled_traces() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(traces_dir())
        .expect("traces dir")
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().and_then(|s| s.to_str()) == Some("rep"))
        .collect();
    paths.sort();
    paths
}

fn checked() -> ReplayOptions {
    ReplayOptions {
        check_each_op: true,
        config: AllocatorConfig::default().with_check_mode(CheckMode::Verify),
    }
}

#[test]
fn bundled_traces_replay_with_checks() {
    let paths = bundled_traces();
    assert!(paths.len() >= 4, "expected bundled traces, found {paths:?}");
    for path in paths {
        let trace = Trace::from_file(&path).expect("parse trace");
        let report = replay(&trace, &checked())
            .unwrap_or_else(|err| panic!("{}: {err}", path.display()));
        assert_eq!(report.ops, trace.num_ops, "{}", path.display());
        assert_eq!(report.checks_run, trace.num_ops + 1);
        assert!(report.utilization > 0.0 && report.utilization <= 1.0);
        assert!(
            report
                .records
                .iter()
                .all(|r| r.level < AllocatorLogLevel::Error),
            "{}: {:?}",
            path.display(),
            report.records
        );
    }
}

#[test]
fn coalesce_trace_reuses_merged_space() {
    let trace = Trace::from_file(&traces_dir().join("coalesce.rep")).expect("parse");
    let full = replay(&trace, &checked()).expect("replay");

    // Same trace without the final 300-byte request and its free.
    let mut prefix = trace.clone();
    prefix.ops.truncate(prefix.ops.len() - 2);
    prefix.num_ops = prefix.ops.len();
    let before = replay(&prefix, &checked()).expect("replay prefix");

    assert_eq!(full.final_heap_size, before.final_heap_size);
    assert_eq!(full.extend_count, before.extend_count);
}

#[test]
fn binary_trace_counts_ops() {
    let trace = Trace::from_file(&traces_dir().join("binary.rep")).expect("parse");
    let allocs = trace
        .ops
        .iter()
        .filter(|op| matches!(op, TraceOp::Alloc { .. }))
        .count();
    let report = replay(&trace, &ReplayOptions::default()).expect("replay");
    assert_eq!(report.allocs, allocs);
    assert_eq!(report.frees, trace.ops.len() - allocs);
    assert_eq!(report.checks_run, 1);
}

#[test]
fn stress_seeds_stay_valid() {
    for seed in [1u64, 0xDEAD_BEEF, 0x1234_5678_9ABC] {
        let report = run_stress(&StressConfig {
            seed,
            ops: 2_000,
            max_size: 2048,
            slots: 64,
            check_every: 7,
            config: AllocatorConfig::default().with_max_heap(8 << 20),
        })
        .unwrap_or_else(|err| panic!("seed {seed:#x}: {err}"));
        assert_eq!(report.ops, 2_000);
        assert_eq!(report.checks_run, 2_000 / 7 + 1);
        assert!(report.final_heap_size <= 8 << 20);
    }
}
