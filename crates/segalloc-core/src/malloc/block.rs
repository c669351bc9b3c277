//! Block layout codec.
//!
//! ```text
//!   allocated:  | hdr |            payload ...                     |
//!   free:       | hdr | prev | next |      ...          | ftr |
//!                     ^ bp                                     ^ bp + size - 4
//! ```
//!
//! Every block starts with a 4-byte header packing `size | prev_alloc << 1 |
//! alloc`. A block is named by its payload offset `bp`; its header lives at
//! `bp - 4`. Only free blocks carry a footer (a copy of the header in the last
//! word) and the two free-list link words. Allocated blocks reuse that space
//! as payload, so their predecessor's state is tracked through the
//! prev-allocated bit of the following header instead of a footer read.

use super::region::{HeapRegion, Offset};

/// Header/footer/link word size in bytes.
pub const WSIZE: u32 = 4;

/// Payload alignment and size granularity.
pub const ALIGNMENT: usize = 8;

/// Smallest block: header, two links, footer.
pub const MIN_BLOCK_SIZE: u32 = 16;

/// Size of the zero-payload prologue block.
pub const PROLOGUE_SIZE: u32 = 4;

const ALLOC_BIT: u32 = 0x1;
const PREV_ALLOC_BIT: u32 = 0x2;
const SIZE_MASK: u32 = !0x3;

/// Decoded header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    pub size: u32,
    pub allocated: bool,
    pub prev_allocated: bool,
}

impl Header {
    #[must_use]
    pub const fn new(size: u32, allocated: bool, prev_allocated: bool) -> Self {
        Self {
            size,
            allocated,
            prev_allocated,
        }
    }

    /// Epilogue header: size 0, allocated.
    #[must_use]
    pub const fn epilogue(prev_allocated: bool) -> Self {
        Self::new(0, true, prev_allocated)
    }

    #[must_use]
    pub const fn encode(self) -> u32 {
        let mut word = self.size & SIZE_MASK;
        if self.allocated {
            word |= ALLOC_BIT;
        }
        if self.prev_allocated {
            word |= PREV_ALLOC_BIT;
        }
        word
    }

    #[must_use]
    pub const fn decode(word: u32) -> Self {
        Self {
            size: word & SIZE_MASK,
            allocated: word & ALLOC_BIT != 0,
            prev_allocated: word & PREV_ALLOC_BIT != 0,
        }
    }

    #[must_use]
    pub const fn is_epilogue(self) -> bool {
        self.size == 0 && self.allocated
    }
}

/// Offset of the header word of block `bp`.
#[must_use]
pub const fn header_at(bp: Offset) -> usize {
    bp.index() - WSIZE as usize
}

/// Offset of the footer word of a block of `size` bytes at `bp`.
#[must_use]
pub const fn footer_at(bp: Offset, size: u32) -> usize {
    bp.index() + size as usize - 2 * WSIZE as usize
}

/// Payload offset of the physically following block.
#[must_use]
pub const fn next_block(bp: Offset, size: u32) -> Offset {
    bp.add(size)
}

#[must_use]
pub fn header(heap: &impl HeapRegion, bp: Offset) -> Header {
    Header::decode(heap.read_word(header_at(bp)))
}

pub fn set_header(heap: &mut impl HeapRegion, bp: Offset, hdr: Header) {
    heap.write_word(header_at(bp), hdr.encode());
}

/// Update only the prev-allocated bit of block `bp`.
pub fn set_prev_allocated(heap: &mut impl HeapRegion, bp: Offset, prev_allocated: bool) {
    let hdr = header(heap, bp);
    set_header(heap, bp, Header { prev_allocated, ..hdr });
}

/// Usable payload bytes of an allocated block of `size` bytes.
#[must_use]
pub const fn usable_size(size: u32) -> usize {
    (size - WSIZE) as usize
}

/// Round a request up to a block size: header overhead plus alignment,
/// floored at [`MIN_BLOCK_SIZE`]. `None` if it cannot fit a 32-bit header.
#[must_use]
pub fn adjusted_size(request: usize) -> Option<u32> {
    let asize = request
        .checked_add(WSIZE as usize)?
        .checked_next_multiple_of(ALIGNMENT)?
        .max(MIN_BLOCK_SIZE as usize);
    u32::try_from(asize).ok().filter(|&s| s & !SIZE_MASK == 0)
}

/// Typed view of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockView {
    Allocated(AllocatedBlock),
    Free(FreeBlock),
}

impl BlockView {
    #[must_use]
    pub fn read(heap: &impl HeapRegion, bp: Offset) -> Self {
        let hdr = header(heap, bp);
        if hdr.allocated {
            Self::Allocated(AllocatedBlock { bp, hdr })
        } else {
            Self::Free(FreeBlock { bp, hdr })
        }
    }
}

/// An allocated block. Its trailing word belongs to the payload, so there is
/// no footer accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatedBlock {
    bp: Offset,
    hdr: Header,
}

impl AllocatedBlock {
    #[must_use]
    pub const fn bp(&self) -> Offset {
        self.bp
    }

    #[must_use]
    pub const fn size(&self) -> u32 {
        self.hdr.size
    }

    #[must_use]
    pub const fn header(&self) -> Header {
        self.hdr
    }

    /// Byte range of the usable payload.
    #[must_use]
    pub const fn payload_range(&self) -> std::ops::Range<usize> {
        self.bp.index()..self.bp.index() + usable_size(self.hdr.size)
    }

    /// Re-read the header, whose prev-allocated bit follows the physical
    /// predecessor and may have changed since this view was taken.
    #[must_use]
    pub fn reload(self, heap: &impl HeapRegion) -> Self {
        Self {
            bp: self.bp,
            hdr: header(heap, self.bp),
        }
    }

    /// Clear the allocated bit and reconstruct the footer from the header.
    pub fn release(self, heap: &mut impl HeapRegion) -> FreeBlock {
        FreeBlock::write(heap, self.bp, self.hdr.size, self.hdr.prev_allocated)
    }
}

/// A free block: header, footer and free-list links are all valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    bp: Offset,
    hdr: Header,
}

impl FreeBlock {
    /// Write header and footer of a free block of `size` bytes at `bp`.
    pub fn write(heap: &mut impl HeapRegion, bp: Offset, size: u32, prev_allocated: bool) -> Self {
        let hdr = Header::new(size, false, prev_allocated);
        set_header(heap, bp, hdr);
        heap.write_word(footer_at(bp, size), hdr.encode());
        Self { bp, hdr }
    }

    /// View `bp` as a free block if its header says so.
    #[must_use]
    pub fn at(heap: &impl HeapRegion, bp: Offset) -> Option<Self> {
        match BlockView::read(heap, bp) {
            BlockView::Free(block) => Some(block),
            BlockView::Allocated(_) => None,
        }
    }

    /// The physical predecessor of `bp`, located through its footer.
    /// Only meaningful when `bp`'s prev-allocated bit is clear.
    #[must_use]
    pub fn before(heap: &impl HeapRegion, bp: Offset) -> Self {
        let prev_size = Header::decode(heap.read_word(bp.index() - 2 * WSIZE as usize)).size;
        let prev = bp.sub(prev_size);
        Self {
            bp: prev,
            hdr: header(heap, prev),
        }
    }

    #[must_use]
    pub const fn bp(&self) -> Offset {
        self.bp
    }

    #[must_use]
    pub const fn size(&self) -> u32 {
        self.hdr.size
    }

    #[must_use]
    pub const fn header(&self) -> Header {
        self.hdr
    }

    #[must_use]
    pub fn footer(&self, heap: &impl HeapRegion) -> Header {
        Header::decode(heap.read_word(footer_at(self.bp, self.hdr.size)))
    }

    #[must_use]
    pub fn prev_link(&self, heap: &impl HeapRegion) -> Option<Offset> {
        Offset::from_link(heap.read_word(self.bp.index()))
    }

    #[must_use]
    pub fn next_link(&self, heap: &impl HeapRegion) -> Option<Offset> {
        Offset::from_link(heap.read_word(self.bp.index() + WSIZE as usize))
    }

    pub fn set_prev_link(&self, heap: &mut impl HeapRegion, link: Option<Offset>) {
        heap.write_word(self.bp.index(), Offset::to_link(link));
    }

    pub fn set_next_link(&self, heap: &mut impl HeapRegion, link: Option<Offset>) {
        heap.write_word(self.bp.index() + WSIZE as usize, Offset::to_link(link));
    }

    /// Mark the whole block allocated. Links and footer become payload.
    pub fn claim(self, heap: &mut impl HeapRegion) -> AllocatedBlock {
        let hdr = Header::new(self.hdr.size, true, self.hdr.prev_allocated);
        set_header(heap, self.bp, hdr);
        AllocatedBlock { bp: self.bp, hdr }
    }

    /// Claim the first `asize` bytes and turn the rest into a new free block
    /// (not yet indexed). Requires `size - asize >= MIN_BLOCK_SIZE`.
    pub fn split(self, heap: &mut impl HeapRegion, asize: u32) -> (AllocatedBlock, FreeBlock) {
        debug_assert!(self.hdr.size - asize >= MIN_BLOCK_SIZE);
        let hdr = Header::new(asize, true, self.hdr.prev_allocated);
        set_header(heap, self.bp, hdr);
        let rest = FreeBlock::write(heap, next_block(self.bp, asize), self.hdr.size - asize, true);
        (AllocatedBlock { bp: self.bp, hdr }, rest)
    }
}
