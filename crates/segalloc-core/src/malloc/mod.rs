//! Memory allocation.
//!
//! Segregated-fit allocator with boundary-tag coalescing:
//! - sixteen power-of-two size classes, each an address-ordered free list
//! - headers on every block, footers only on free blocks
//! - immediate coalescing on free, splitting on place
//! - a growable region supplying memory in chunk-sized steps

pub mod allocator;
pub mod block;
pub mod checkheap;
pub mod lifecycle;
pub mod region;
pub mod seglist;

pub use allocator::{HeapStats, SegAllocator};
pub use checkheap::{BlockDump, BucketDump, HeapDump};
pub use lifecycle::{AllocatorLogLevel, AllocatorLogRecord};
pub use region::{HeapRegion, Offset, VecRegion};
