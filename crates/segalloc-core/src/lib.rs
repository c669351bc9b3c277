//! # segalloc-core
//!
//! Safe Rust implementation of a segregated-fit `malloc`/`free`/`realloc`/`calloc`
//! replacement that manages a single, monotonically growing arena.
//!
//! The arena is addressed purely by offsets from its base, so the allocator
//! itself needs no `unsafe` code. The heap-growth primitive is abstracted behind
//! [`malloc::HeapRegion`]; the ABI crate supplies an `mmap`-backed region and
//! converts addresses to raw pointers.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod malloc;

pub use config::{AllocatorConfig, CheckMode};
pub use error::{HeapCorruption, HeapError, Violation};
pub use malloc::{
    AllocatorLogLevel, AllocatorLogRecord, HeapDump, HeapRegion, HeapStats, Offset, SegAllocator,
    VecRegion,
};
