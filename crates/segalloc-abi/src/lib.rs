//! # segalloc-abi
//!
//! extern "C" boundary for the segregated-fit allocator.
//!
//! This crate produces a `cdylib` (`libsegalloc.so`) exporting `seg_malloc`,
//! `seg_free`, `seg_realloc`, `seg_calloc`, `seg_checkheap`,
//! `seg_usable_size` and `seg_init`. Each entry point locks the process-wide
//! allocator, delegates to the safe implementation in `segalloc-core`, and
//! converts arena addresses to raw pointers.
//!
//! ```text
//! C caller -> seg_* entry (this crate) -> global Mutex -> SegAllocator<MmapRegion>
//! ```

pub mod malloc_abi;
pub mod mmap_region;

pub use mmap_region::MmapRegion;
