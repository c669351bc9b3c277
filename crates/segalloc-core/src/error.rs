//! Error taxonomy for the allocator core.
//!
//! Runtime failures (`OutOfMemory`, `InvalidArgument`) never escape the public
//! allocation API as errors: they are recorded in the lifecycle log and surface
//! as a `None` return. `HeapCorruption` is produced only by the validator.

use thiserror::Error;

/// Failure of an internal allocator step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    /// The heap-growth primitive could not satisfy a request.
    #[error("out of memory: requested {requested} bytes with {available} bytes left in the region")]
    OutOfMemory { requested: usize, available: usize },
    /// A request that cannot be represented (multiplication overflow, size
    /// beyond the 32-bit header range).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The region could not be set up at all.
    #[error("region setup failed: {0}")]
    RegionSetup(String),
}

/// A single violated heap invariant, located by absolute address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("bad prologue header at {addr:#x}: size {size}, allocated {allocated}")]
    BadPrologue {
        addr: usize,
        size: u32,
        allocated: bool,
    },
    #[error("bad epilogue header at {addr:#x}: size {size}, allocated {allocated}")]
    BadEpilogue {
        addr: usize,
        size: u32,
        allocated: bool,
    },
    #[error("epilogue at {addr:#x} does not end the heap (heap_high {heap_high:#x})")]
    EpilogueNotAtEnd { addr: usize, heap_high: usize },
    #[error("block {addr:#x} payload is not 8-byte aligned")]
    Misaligned { addr: usize },
    #[error("block {addr:#x} has invalid size {size}")]
    BadSize { addr: usize, size: u32 },
    #[error("block {addr:#x} runs past the end of the heap (size {size})")]
    Overrun { addr: usize, size: u32 },
    #[error("free block {addr:#x} header {header:#010x} does not match footer {footer:#010x}")]
    FooterMismatch { addr: usize, header: u32, footer: u32 },
    #[error("block {addr:#x} prev-allocated bit is {recorded} but its predecessor allocated is {actual}")]
    PrevAllocMismatch {
        addr: usize,
        recorded: bool,
        actual: bool,
    },
    #[error("adjacent free blocks at {prev:#x} and {addr:#x}")]
    AdjacentFree { prev: usize, addr: usize },
    #[error("free-list class {class} member {addr:#x} lies outside [heap_low, heap_high)")]
    OutOfHeap { class: usize, addr: usize },
    #[error("free-list class {class} member {addr:#x} is marked allocated")]
    AllocatedInFreeList { class: usize, addr: usize },
    #[error("free-list class {class} member {addr:#x} has size {size} outside the class range")]
    WrongClass { class: usize, addr: usize, size: u32 },
    #[error("free-list class {class}: next of {addr:#x} is {next:#x} but its prev link is {back:?}")]
    LinkMismatch {
        class: usize,
        addr: usize,
        next: usize,
        back: Option<usize>,
    },
    #[error("free-list class {class} head {addr:#x} has a prev link")]
    HeadHasPrev { class: usize, addr: usize },
    #[error("free-list class {class} is not address-ordered at {addr:#x}")]
    Unordered { class: usize, addr: usize },
    #[error("free-list class {class} tail is {recorded:?} but traversal ended at {actual:?}")]
    TailMismatch {
        class: usize,
        recorded: Option<usize>,
        actual: Option<usize>,
    },
    #[error("free-list class {class} does not terminate (cycle suspected near {addr:#x})")]
    Cycle { class: usize, addr: usize },
    #[error("{listed} blocks are listed in free lists but the heap walk found {walked} free blocks")]
    FreeCountMismatch { listed: usize, walked: usize },
    #[error("heap-end marker is {recorded:?} but the trailing free block is {actual:?}")]
    HeapEndMismatch {
        recorded: Option<usize>,
        actual: Option<usize>,
    },
}

/// Result of a failed heap check: every violation found in one pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("heap check found {} violation(s)", .violations.len())]
pub struct HeapCorruption {
    pub violations: Vec<Violation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_messages_carry_address() {
        let v = Violation::FooterMismatch {
            addr: 0x1000,
            header: 0x20,
            footer: 0x30,
        };
        let msg = v.to_string();
        assert!(msg.contains("0x1000"), "{msg}");
        assert!(msg.contains("footer"), "{msg}");
    }

    #[test]
    fn test_corruption_counts_violations() {
        let err = HeapCorruption {
            violations: vec![
                Violation::Misaligned { addr: 0x11 },
                Violation::AdjacentFree {
                    prev: 0x20,
                    addr: 0x40,
                },
            ],
        };
        assert_eq!(err.to_string(), "heap check found 2 violation(s)");
    }

    #[test]
    fn test_oom_message() {
        let err = HeapError::OutOfMemory {
            requested: 4096,
            available: 16,
        };
        assert!(err.to_string().starts_with("out of memory"));
    }
}
