//! Test harness for the segalloc allocator.
//!
//! This crate provides:
//! - Trace parsing: the malloclab `.rep` trace format
//! - Replay: run a trace against a fresh allocator with payload and layout checks
//! - Stress: seeded random operation mixes with periodic validation
//! - Structured logging: lifecycle records as JSONL

#![forbid(unsafe_code)]

pub mod replay;
pub mod stress;
pub mod structured_log;
pub mod trace;

pub use replay::{ReplayError, ReplayOptions, ReplayReport, replay};
pub use stress::{StressConfig, StressReport, run_stress};
pub use structured_log::{LogEmitter, LogEntry, LogLevel};
pub use trace::{Trace, TraceError, TraceOp};
