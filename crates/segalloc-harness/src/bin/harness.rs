//! CLI entrypoint for the segalloc harness.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use segalloc_core::config::parse_size;
use segalloc_core::{AllocatorConfig, AllocatorLogLevel, CheckMode};
use segalloc_harness::structured_log::{LogEmitter, LogEntry, LogLevel};
use segalloc_harness::trace::sha256_hex;
use segalloc_harness::{ReplayOptions, StressConfig, Trace, replay, run_stress};

/// Trace replay and stress tooling for segalloc.
#[derive(Debug, Parser)]
#[command(name = "segalloc-harness")]
#[command(about = "Replay malloclab traces and run randomized stress against segalloc")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Args)]
struct HeapArgs {
    /// Heap-growth chunk (accepts k/m suffixes).
    #[arg(long, value_parser = size_arg)]
    chunk_size: Option<usize>,
    /// Region capacity (accepts k/m/g suffixes).
    #[arg(long, value_parser = size_arg)]
    max_heap: Option<usize>,
    /// Validator mode inside the allocator.
    #[arg(long, value_enum, default_value_t = CheckArg::Off)]
    check_mode: CheckArg,
    /// Lifecycle log threshold.
    #[arg(long, value_enum, default_value_t = LevelArg::Warn)]
    log_level: LevelArg,
    /// Write lifecycle records as JSONL to this path.
    #[arg(long)]
    log: Option<PathBuf>,
    /// Write the JSON report here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

impl HeapArgs {
    fn config(&self) -> AllocatorConfig {
        let mut config = AllocatorConfig::default()
            .with_check_mode(self.check_mode.into())
            .with_log_level(self.log_level.into());
        if let Some(chunk) = self.chunk_size {
            config = config.with_chunk_size(chunk);
        }
        if let Some(max_heap) = self.max_heap {
            config = config.with_max_heap(max_heap);
        }
        config
    }
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum CheckArg {
    /// No validation
    Off,
    /// Validate after every operation and log violations
    Verify,
    /// Validate after every operation and panic on the first violation
    Abort,
}

impl From<CheckArg> for CheckMode {
    fn from(arg: CheckArg) -> Self {
        match arg {
            CheckArg::Off => Self::Off,
            CheckArg::Verify => Self::Verify,
            CheckArg::Abort => Self::Abort,
        }
    }
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum LevelArg {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    /// Record nothing
    Off,
}

impl From<LevelArg> for Option<AllocatorLogLevel> {
    fn from(arg: LevelArg) -> Self {
        match arg {
            LevelArg::Trace => Some(AllocatorLogLevel::Trace),
            LevelArg::Debug => Some(AllocatorLogLevel::Debug),
            LevelArg::Info => Some(AllocatorLogLevel::Info),
            LevelArg::Warn => Some(AllocatorLogLevel::Warn),
            LevelArg::Error => Some(AllocatorLogLevel::Error),
            LevelArg::Off => None,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay one or more `.rep` traces on fresh allocators.
    Replay {
        /// Trace files to replay, in order.
        #[arg(long = "trace", required = true)]
        traces: Vec<PathBuf>,
        /// Run the heap validator after every trace op.
        #[arg(long)]
        check: bool,
        #[command(flatten)]
        heap: HeapArgs,
    },
    /// Run a seeded random operation mix.
    Stress {
        #[arg(long, default_value_t = 0x5EED_A110C)]
        seed: u64,
        #[arg(long, default_value_t = 10_000)]
        ops: usize,
        /// Largest single request (accepts k/m suffixes).
        #[arg(long, default_value = "4096", value_parser = size_arg)]
        max_size: usize,
        /// Number of ids the mix cycles through.
        #[arg(long, default_value_t = 256)]
        slots: usize,
        /// Validate every N ops; 0 validates only at the end.
        #[arg(long, default_value_t = 1)]
        check_every: usize,
        #[command(flatten)]
        heap: HeapArgs,
    },
}

fn size_arg(raw: &str) -> Result<usize, String> {
    parse_size(raw).ok_or_else(|| format!("invalid size '{raw}'"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            traces,
            check,
            heap,
        } => {
            let options = ReplayOptions {
                check_each_op: check,
                config: heap.config(),
            };
            let mut emitter = open_log(heap.log.as_deref(), "replay")?;
            let mut reports = Vec::with_capacity(traces.len());
            for path in &traces {
                eprintln!("Replaying {}", path.display());
                let raw = std::fs::read(path)?;
                let trace = Trace::parse(&String::from_utf8_lossy(&raw))?;
                let mut report = match replay(&trace, &options) {
                    Ok(report) => report,
                    Err(err) => {
                        if let Some(emitter) = emitter.as_mut() {
                            emitter.emit_entry(
                                LogEntry::new("", LogLevel::Error, "replay_failed")
                                    .with_details(serde_json::json!({
                                        "trace": path.display().to_string(),
                                        "error": err.to_string(),
                                    })),
                            )?;
                            emitter.flush()?;
                        }
                        return Err(format!("{}: {err}", path.display()).into());
                    }
                };
                report.trace_sha256 = Some(sha256_hex(&raw));
                if let Some(emitter) = emitter.as_mut() {
                    emitter.emit_records(&report.records)?;
                }
                eprintln!(
                    "  {} ops, utilization {:.1}%",
                    report.ops,
                    report.utilization * 100.0
                );
                reports.push(serde_json::json!({
                    "trace": path.display().to_string(),
                    "report": report,
                }));
            }
            if let Some(emitter) = emitter.as_mut() {
                emitter.emit(LogLevel::Info, "replay_complete")?;
                emitter.flush()?;
            }
            write_report(heap.output.as_deref(), &serde_json::Value::Array(reports))?;
        }
        Command::Stress {
            seed,
            ops,
            max_size,
            slots,
            check_every,
            heap,
        } => {
            let config = StressConfig {
                seed,
                ops,
                max_size,
                slots,
                check_every,
                config: heap.config(),
            };
            eprintln!("Stress seed={seed:#x} ops={ops}");
            let report = run_stress(&config).map_err(|err| format!("seed {seed:#x}: {err}"))?;
            if let Some(mut emitter) = open_log(heap.log.as_deref(), "stress")? {
                emitter.emit_entry(
                    LogEntry::new("", LogLevel::Info, "stress_complete")
                        .with_details(serde_json::to_value(&report)?),
                )?;
                emitter.flush()?;
            }
            write_report(heap.output.as_deref(), &serde_json::to_value(&report)?)?;
        }
    }

    Ok(())
}

fn open_log(path: Option<&Path>, run_id: &str) -> std::io::Result<Option<LogEmitter>> {
    path.map(|path| LogEmitter::to_file(path, run_id))
        .transpose()
}

fn write_report(
    output: Option<&Path>,
    value: &serde_json::Value,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            eprintln!("Report written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
