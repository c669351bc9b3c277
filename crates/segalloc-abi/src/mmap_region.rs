//! `mmap`-backed heap region.
//!
//! The full capacity is reserved once as an anonymous private mapping; the
//! break then moves forward inside it. Pages are only touched (and so only
//! committed) as the allocator writes into them.
//!
//! Live payloads belong to C callers, who write them through raw pointers
//! outside the allocator lock. The region therefore never builds a slice over
//! the arena: every access is a raw read, write, copy, or fill of exactly the
//! bytes the allocator owns at that moment.

use std::ffi::{c_int, c_void};
use std::ptr::NonNull;

use segalloc_core::config::MAX_REGION_BYTES;
use segalloc_core::{HeapError, HeapRegion};

const WORD: usize = std::mem::size_of::<u32>();

#[cfg(target_os = "linux")]
const MAP_FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;
#[cfg(not(target_os = "linux"))]
const MAP_FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANON;

/// Anonymous mapping of `reserved` bytes with a break at `brk`.
#[derive(Debug)]
pub struct MmapRegion {
    base: NonNull<u8>,
    reserved: usize,
    brk: usize,
}

// SAFETY: the mapping is owned exclusively by this value; no thread-local
// state is involved.
unsafe impl Send for MmapRegion {}

impl MmapRegion {
    /// Reserve `max_heap` bytes of address space.
    pub fn reserve(max_heap: usize) -> Result<Self, HeapError> {
        let reserved = max_heap.min(MAX_REGION_BYTES);
        if reserved == 0 {
            return Err(HeapError::InvalidArgument("zero-sized region"));
        }
        // SAFETY: a fresh anonymous mapping with no address hint cannot alias
        // any existing memory.
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                reserved,
                libc::PROT_READ | libc::PROT_WRITE,
                MAP_FLAGS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(HeapError::RegionSetup(format!(
                "mmap of {reserved} bytes failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        let base = NonNull::new(raw.cast::<u8>())
            .ok_or_else(|| HeapError::RegionSetup("mmap returned null".into()))?;
        Ok(Self {
            base,
            reserved,
            brk: 0,
        })
    }

    /// Raw pointer for an absolute address inside the region, derived from
    /// the mapping base.
    #[must_use]
    pub fn pointer(&self, addr: usize) -> *mut c_void {
        let offset = addr.wrapping_sub(self.base.as_ptr() as usize);
        debug_assert!(offset < self.brk);
        self.base.as_ptr().wrapping_add(offset).cast()
    }

    /// Pointer to `len` bytes at `at`, panicking when the range leaves the
    /// region.
    fn span(&self, at: usize, len: usize) -> *mut u8 {
        let in_bounds = at.checked_add(len).is_some_and(|end| end <= self.brk);
        assert!(
            in_bounds,
            "region access [{at:#x}, +{len}) past break {:#x}",
            self.brk
        );
        // SAFETY: `at + len <= brk <= reserved`, so the result stays inside
        // the mapping.
        unsafe { self.base.as_ptr().add(at) }
    }
}

impl HeapRegion for MmapRegion {
    fn extend(&mut self, delta: usize) -> Result<segalloc_core::Offset, HeapError> {
        let old = self.brk;
        let oom = HeapError::OutOfMemory {
            requested: delta,
            available: self.reserved - old,
        };
        let new_brk = old
            .checked_add(delta)
            .filter(|&end| end <= self.reserved)
            .ok_or_else(|| oom.clone())?;
        let start = segalloc_core::Offset::from_usize(old).ok_or(oom)?;
        self.brk = new_brk;
        Ok(start)
    }

    fn heap_low(&self) -> usize {
        self.base.as_ptr() as usize
    }

    fn len(&self) -> usize {
        self.brk
    }

    fn read_word(&self, at: usize) -> u32 {
        let ptr = self.span(at, WORD).cast::<u32>();
        // SAFETY: `span` checked the four bytes are inside the mapping, which
        // is readable and zero-initialized.
        unsafe { ptr.read_unaligned() }
    }

    fn write_word(&mut self, at: usize, value: u32) {
        let ptr = self.span(at, WORD).cast::<u32>();
        // SAFETY: as in `read_word`; the mapping is writable.
        unsafe { ptr.write_unaligned(value) }
    }

    fn copy(&mut self, src: usize, dst: usize, len: usize) {
        let from = self.span(src, len);
        let to = self.span(dst, len);
        // SAFETY: both ranges are inside the mapping; `ptr::copy` allows
        // overlap.
        unsafe { std::ptr::copy(from, to, len) }
    }

    fn fill(&mut self, at: usize, len: usize, byte: u8) {
        let ptr = self.span(at, len);
        // SAFETY: the range is inside the writable mapping.
        unsafe { std::ptr::write_bytes(ptr, byte, len) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: `base`/`reserved` describe exactly the mapping created in
        // `reserve`, and it is unmapped only here.
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.reserved);
        }
    }
}
