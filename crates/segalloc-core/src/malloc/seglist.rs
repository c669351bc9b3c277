//! Segregated free-list index.
//!
//! Sixteen size classes; class `k` holds free blocks with sizes in
//! `[16 * 2^k, 16 * 2^(k+1))`, and the last class is unbounded. Each class is
//! a doubly linked list threaded through the free blocks themselves, kept in
//! strictly ascending address order. The head/tail table lives at the very
//! start of the arena, so the whole index is just bytes in the heap.

use super::block::{FreeBlock, MIN_BLOCK_SIZE};
use super::region::{HeapRegion, Offset};

/// Number of size classes.
pub const NUM_CLASSES: usize = 16;

/// Bytes per table entry: head and tail words.
const ENTRY_SIZE: usize = 8;

/// Size of the bucket table at the start of the arena.
pub const TABLE_BYTES: usize = NUM_CLASSES * ENTRY_SIZE;

/// Size class for a block size.
///
/// Doubles the class upper bound starting from 32 until it exceeds `size`;
/// anything beyond the second-to-last class lands in the last one.
#[must_use]
pub fn classify(size: u32) -> usize {
    let mut class = 0;
    let mut upper = 2 * u64::from(MIN_BLOCK_SIZE);
    while class < NUM_CLASSES - 1 && u64::from(size) >= upper {
        upper <<= 1;
        class += 1;
    }
    class
}

/// Inclusive lower bound and exclusive upper bound of a class (`None` for the
/// unbounded last class).
#[must_use]
pub fn class_range(class: usize) -> (u64, Option<u64>) {
    let low = u64::from(MIN_BLOCK_SIZE) << class;
    if class + 1 >= NUM_CLASSES {
        (low, None)
    } else {
        (low, Some(low << 1))
    }
}

/// Whether a block of `size` bytes belongs in `class`.
#[must_use]
pub fn class_contains(class: usize, size: u32) -> bool {
    let (low, high) = class_range(class);
    let size = u64::from(size);
    size >= low && high.is_none_or(|h| size < h)
}

fn head_slot(class: usize) -> usize {
    class * ENTRY_SIZE
}

fn tail_slot(class: usize) -> usize {
    class * ENTRY_SIZE + 4
}

#[must_use]
pub fn head(heap: &impl HeapRegion, class: usize) -> Option<Offset> {
    Offset::from_link(heap.read_word(head_slot(class)))
}

#[must_use]
pub fn tail(heap: &impl HeapRegion, class: usize) -> Option<Offset> {
    Offset::from_link(heap.read_word(tail_slot(class)))
}

fn set_head(heap: &mut impl HeapRegion, class: usize, link: Option<Offset>) {
    heap.write_word(head_slot(class), Offset::to_link(link));
}

fn set_tail(heap: &mut impl HeapRegion, class: usize, link: Option<Offset>) {
    heap.write_word(tail_slot(class), Offset::to_link(link));
}

/// Reset every bucket to empty.
pub fn clear(heap: &mut impl HeapRegion) {
    heap.fill(0, TABLE_BYTES, 0);
}

/// Link `block` into `class` at its address-ordered position.
///
/// Head and tail insertions are O(1); anything in between scans from the
/// head.
pub fn insert(heap: &mut impl HeapRegion, class: usize, block: FreeBlock) {
    let bp = block.bp();
    let (Some(first), Some(last)) = (head(heap, class), tail(heap, class)) else {
        block.set_prev_link(heap, None);
        block.set_next_link(heap, None);
        set_head(heap, class, Some(bp));
        set_tail(heap, class, Some(bp));
        return;
    };

    if bp < first {
        LinkNode(first).set_prev_link(heap, Some(bp));
        block.set_prev_link(heap, None);
        block.set_next_link(heap, Some(first));
        set_head(heap, class, Some(bp));
    } else if bp > last {
        LinkNode(last).set_next_link(heap, Some(bp));
        block.set_prev_link(heap, Some(last));
        block.set_next_link(heap, None);
        set_tail(heap, class, Some(bp));
    } else {
        // first < bp < last, so a successor exists.
        let mut cursor = first;
        while cursor < bp {
            match LinkNode(cursor).next_link(heap) {
                Some(next) => cursor = next,
                None => break,
            }
        }
        debug_assert_ne!(cursor, bp, "block inserted twice into class {class}");
        let succ = LinkNode(cursor);
        let pred = succ.prev_link(heap);
        if let Some(pred) = pred {
            LinkNode(pred).set_next_link(heap, Some(bp));
        }
        block.set_prev_link(heap, pred);
        block.set_next_link(heap, Some(cursor));
        succ.set_prev_link(heap, Some(bp));
    }
}

/// Unlink `block` from `class` using its stored links.
pub fn delete(heap: &mut impl HeapRegion, class: usize, block: FreeBlock) {
    let prev = block.prev_link(heap);
    let next = block.next_link(heap);
    match prev {
        Some(p) => LinkNode(p).set_next_link(heap, next),
        None => set_head(heap, class, next),
    }
    match next {
        Some(n) => LinkNode(n).set_prev_link(heap, prev),
        None => set_tail(heap, class, prev),
    }
}

/// Link-only view of a listed block. Links are read and written without
/// consulting the header, which may be mid-update.
#[derive(Clone, Copy)]
struct LinkNode(Offset);

impl LinkNode {
    fn prev_link(self, heap: &impl HeapRegion) -> Option<Offset> {
        Offset::from_link(heap.read_word(self.0.index()))
    }

    fn next_link(self, heap: &impl HeapRegion) -> Option<Offset> {
        Offset::from_link(heap.read_word(self.0.index() + 4))
    }

    fn set_prev_link(self, heap: &mut impl HeapRegion, link: Option<Offset>) {
        heap.write_word(self.0.index(), Offset::to_link(link));
    }

    fn set_next_link(self, heap: &mut impl HeapRegion, link: Option<Offset>) {
        heap.write_word(self.0.index() + 4, Offset::to_link(link));
    }
}

/// Ascending iterator over the members of one class.
pub struct BucketIter<'a, H> {
    heap: &'a H,
    cursor: Option<Offset>,
}

impl<H: HeapRegion> Iterator for BucketIter<'_, H> {
    type Item = Offset;

    fn next(&mut self) -> Option<Offset> {
        let current = self.cursor?;
        self.cursor = LinkNode(current).next_link(self.heap);
        Some(current)
    }
}

/// Iterate the members of `class` in address order.
#[must_use]
pub fn iter<H: HeapRegion>(heap: &H, class: usize) -> BucketIter<'_, H> {
    BucketIter {
        heap,
        cursor: head(heap, class),
    }
}
