//! Heap region management.
//!
//! A region is a contiguous byte range that only ever grows at its end,
//! like a program break moved by `sbrk`. Everything inside the allocator is
//! addressed by [`Offset`] from the region base; converting between offsets
//! and absolute addresses is the region's job alone.

use crate::config::MAX_REGION_BYTES;
use crate::error::HeapError;

use super::block::ALIGNMENT;

const WORD: usize = std::mem::size_of::<u32>();

/// Byte offset from the region base.
///
/// Offsets are 32-bit so they fit in a header-sized word inside free blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset(u32);

impl Offset {
    /// Encoded "no block". Offset 0 is inside the bucket table, so it never
    /// names a block payload.
    pub const NIL: u32 = 0;

    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Convert a byte index, rejecting anything past the 32-bit range.
    #[must_use]
    pub fn from_usize(raw: usize) -> Option<Self> {
        u32::try_from(raw).ok().map(Self)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[must_use]
    pub const fn add(self, bytes: u32) -> Self {
        Self(self.0 + bytes)
    }

    #[must_use]
    pub const fn sub(self, bytes: u32) -> Self {
        Self(self.0 - bytes)
    }

    /// Decode a stored link word.
    #[must_use]
    pub const fn from_link(raw: u32) -> Option<Self> {
        if raw == Self::NIL { None } else { Some(Self(raw)) }
    }

    /// Encode an optional link into its stored word.
    #[must_use]
    pub const fn to_link(link: Option<Self>) -> u32 {
        match link {
            Some(off) => off.0,
            None => Self::NIL,
        }
    }
}

/// A monotonically growing arena.
///
/// All access goes through word, copy and fill operations on offsets, so an
/// implementation never has to hand out a reference spanning the whole
/// arena. Out-of-range offsets panic, like slice indexing.
pub trait HeapRegion {
    /// Grow the region by `delta` bytes and return the offset of the old end
    /// (the first new byte). Never shrinks; fails without side effects.
    fn extend(&mut self, delta: usize) -> Result<Offset, HeapError>;

    /// Absolute address of the first byte.
    fn heap_low(&self) -> usize;

    /// Current size in bytes.
    fn len(&self) -> usize;

    /// Native-endian word at `at`.
    fn read_word(&self, at: usize) -> u32;

    fn write_word(&mut self, at: usize, value: u32);

    /// Copy `len` bytes from `src` to `dst`; the ranges may overlap.
    fn copy(&mut self, src: usize, dst: usize, len: usize);

    /// Set `len` bytes starting at `at` to `byte`.
    fn fill(&mut self, at: usize, len: usize, byte: u8);

    /// Word at `at`, or `None` when it is not fully inside the region.
    fn try_read_word(&self, at: usize) -> Option<u32> {
        let end = at.checked_add(WORD)?;
        (end <= self.len()).then(|| self.read_word(at))
    }

    /// Absolute address one past the last byte.
    fn heap_high(&self) -> usize {
        self.heap_low() + self.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Absolute address of an offset.
    fn addr_of(&self, off: Offset) -> usize {
        self.heap_low() + off.index()
    }

    /// Offset of an absolute address inside `[heap_low, heap_high)`.
    fn offset_of(&self, addr: usize) -> Option<Offset> {
        let low = self.heap_low();
        if addr < low || addr >= self.heap_high() {
            return None;
        }
        Offset::from_usize(addr - low)
    }
}

/// Region backed by a heap buffer reserved up front, the in-process
/// equivalent of a simulated `sbrk` arena.
///
/// The buffer never reallocates, so addresses handed out stay valid for the
/// life of the region.
#[derive(Debug)]
pub struct VecRegion {
    buf: Box<[u8]>,
    /// Padding that aligns the region base to `ALIGNMENT`.
    pad: usize,
    brk: usize,
    max: usize,
}

impl VecRegion {
    /// Reserve a region of at most `max_heap` bytes.
    pub fn with_capacity(max_heap: usize) -> Result<Self, HeapError> {
        let max = max_heap.min(MAX_REGION_BYTES);
        let len = max
            .checked_add(ALIGNMENT)
            .ok_or(HeapError::InvalidArgument("region capacity overflows"))?;
        let buf = vec![0u8; len].into_boxed_slice();
        let pad = buf.as_ptr().align_offset(ALIGNMENT);
        if pad >= ALIGNMENT {
            return Err(HeapError::RegionSetup(format!(
                "cannot align region base (offset {pad})"
            )));
        }
        Ok(Self {
            buf,
            pad,
            brk: 0,
            max,
        })
    }

    /// Current contents, `[heap_low, heap_high)`.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buf[self.pad..self.pad + self.brk]
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.pad..self.pad + self.brk]
    }
}

impl HeapRegion for VecRegion {
    fn extend(&mut self, delta: usize) -> Result<Offset, HeapError> {
        let old = self.brk;
        let new_brk = old
            .checked_add(delta)
            .filter(|&end| end <= self.max)
            .ok_or(HeapError::OutOfMemory {
                requested: delta,
                available: self.max - old,
            })?;
        let start = Offset::from_usize(old).ok_or(HeapError::OutOfMemory {
            requested: delta,
            available: 0,
        })?;
        self.brk = new_brk;
        Ok(start)
    }

    fn heap_low(&self) -> usize {
        self.buf.as_ptr() as usize + self.pad
    }

    fn len(&self) -> usize {
        self.brk
    }

    fn read_word(&self, at: usize) -> u32 {
        let mut raw = [0u8; WORD];
        raw.copy_from_slice(&self.bytes()[at..at + WORD]);
        u32::from_ne_bytes(raw)
    }

    fn write_word(&mut self, at: usize, value: u32) {
        self.bytes_mut()[at..at + WORD].copy_from_slice(&value.to_ne_bytes());
    }

    fn copy(&mut self, src: usize, dst: usize, len: usize) {
        self.bytes_mut().copy_within(src..src + len, dst);
    }

    fn fill(&mut self, at: usize, len: usize, byte: u8) {
        self.bytes_mut()[at..at + len].fill(byte);
    }
}
