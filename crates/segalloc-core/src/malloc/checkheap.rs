//! Heap consistency checker.
//!
//! Read-only: walks the block sequence from the first block to the epilogue,
//! then every bucket, and reports each broken invariant with the absolute
//! address involved. Every walk is bounded by the region length, so a
//! corrupted header or link cannot send it out of bounds or around a cycle.

use std::fmt;

use crate::error::Violation;

use super::allocator::{FIRST_BP, PROLOGUE_BP};
use super::block::{ALIGNMENT, Header, MIN_BLOCK_SIZE, PROLOGUE_SIZE, WSIZE, header_at};
use super::region::{HeapRegion, Offset};
use super::seglist::{self, NUM_CLASSES, TABLE_BYTES};

/// Everything the block walk learned that the bucket walk needs.
struct WalkSummary {
    /// Free blocks seen, or `None` if the walk stopped early.
    free_blocks: Option<usize>,
    /// Last block before the epilogue when it is free.
    trailing_free: Option<usize>,
}

/// Check every invariant; an empty result means the heap is consistent.
pub(crate) fn check(heap: &impl HeapRegion, heap_end: Option<Offset>) -> Vec<Violation> {
    let heap_low = heap.heap_low();
    let mut out = Vec::new();
    if heap.len() < FIRST_BP.index() {
        out.push(Violation::BadPrologue {
            addr: heap_low + PROLOGUE_BP.index(),
            size: 0,
            allocated: false,
        });
        return out;
    }

    let summary = walk_blocks(heap, heap_low, &mut out);
    let listed = walk_buckets(heap, heap_low, &mut out);

    if let Some(walked) = summary.free_blocks {
        if listed != walked {
            out.push(Violation::FreeCountMismatch { listed, walked });
        }
        let recorded = heap_end.map(|bp| heap_low + bp.index());
        let actual = summary.trailing_free.map(|bp| heap_low + bp);
        if recorded != actual {
            out.push(Violation::HeapEndMismatch { recorded, actual });
        }
    }
    out
}

fn walk_blocks(heap: &impl HeapRegion, heap_low: usize, out: &mut Vec<Violation>) -> WalkSummary {
    let addr = |off: usize| heap_low + off;
    let mut summary = WalkSummary {
        free_blocks: None,
        trailing_free: None,
    };

    let prologue = Header::decode(read(heap, header_at(PROLOGUE_BP)));
    if prologue.size != PROLOGUE_SIZE || !prologue.allocated {
        out.push(Violation::BadPrologue {
            addr: addr(PROLOGUE_BP.index()),
            size: prologue.size,
            allocated: prologue.allocated,
        });
    }

    let mut bp = FIRST_BP.index();
    let mut prev: Option<(usize, bool)> = None;
    let mut free_blocks = 0;
    loop {
        let Some(word) = heap.try_read_word(bp - WSIZE as usize) else {
            out.push(Violation::EpilogueNotAtEnd {
                addr: addr(bp),
                heap_high: addr(heap.len()),
            });
            return summary;
        };
        let hdr = Header::decode(word);
        let prev_allocated = prev.is_none_or(|(_, allocated)| allocated);

        if hdr.size == 0 {
            if !hdr.allocated {
                out.push(Violation::BadEpilogue {
                    addr: addr(bp),
                    size: hdr.size,
                    allocated: hdr.allocated,
                });
            }
            if bp != heap.len() {
                out.push(Violation::EpilogueNotAtEnd {
                    addr: addr(bp),
                    heap_high: addr(heap.len()),
                });
            }
            if hdr.prev_allocated != prev_allocated {
                out.push(Violation::PrevAllocMismatch {
                    addr: addr(bp),
                    recorded: hdr.prev_allocated,
                    actual: prev_allocated,
                });
            }
            summary.free_blocks = Some(free_blocks);
            summary.trailing_free = prev.and_then(|(p, allocated)| (!allocated).then_some(p));
            return summary;
        }

        if addr(bp) % ALIGNMENT != 0 {
            out.push(Violation::Misaligned { addr: addr(bp) });
        }
        if hdr.size < MIN_BLOCK_SIZE || hdr.size as usize % ALIGNMENT != 0 {
            out.push(Violation::BadSize {
                addr: addr(bp),
                size: hdr.size,
            });
            return summary;
        }
        let end = bp.saturating_add(hdr.size as usize);
        if end > heap.len() {
            out.push(Violation::Overrun {
                addr: addr(bp),
                size: hdr.size,
            });
            return summary;
        }
        if hdr.prev_allocated != prev_allocated {
            out.push(Violation::PrevAllocMismatch {
                addr: addr(bp),
                recorded: hdr.prev_allocated,
                actual: prev_allocated,
            });
        }
        if !hdr.allocated {
            free_blocks += 1;
            let footer = read(heap, end - 2 * WSIZE as usize);
            if footer != word {
                out.push(Violation::FooterMismatch {
                    addr: addr(bp),
                    header: word,
                    footer,
                });
            }
            if let Some((p, false)) = prev {
                out.push(Violation::AdjacentFree {
                    prev: addr(p),
                    addr: addr(bp),
                });
            }
        }
        prev = Some((bp, hdr.allocated));
        bp = end;
    }
}

/// Walk every bucket and return the number of members seen.
fn walk_buckets(heap: &impl HeapRegion, heap_low: usize, out: &mut Vec<Violation>) -> usize {
    let addr = |off: usize| heap_low + off;
    let max_members = heap.len() / MIN_BLOCK_SIZE as usize + 1;
    let mut listed = 0;

    for class in 0..NUM_CLASSES {
        let mut prev: Option<usize> = None;
        let mut cursor = seglist::head(heap, class).map(Offset::index);
        let mut steps = 0;
        let mut complete = true;

        while let Some(cur) = cursor {
            steps += 1;
            if steps > max_members {
                out.push(Violation::Cycle {
                    class,
                    addr: addr(cur),
                });
                complete = false;
                break;
            }
            // Links and the header must be readable, and the payload must
            // not sit in the table or the sentinels.
            if cur < FIRST_BP.index() || cur + 2 * WSIZE as usize > heap.len() {
                out.push(Violation::OutOfHeap {
                    class,
                    addr: addr(cur),
                });
                complete = false;
                break;
            }

            let hdr = Header::decode(read(heap, cur - WSIZE as usize));
            if hdr.allocated {
                out.push(Violation::AllocatedInFreeList {
                    class,
                    addr: addr(cur),
                });
            } else if !seglist::class_contains(class, hdr.size) {
                out.push(Violation::WrongClass {
                    class,
                    addr: addr(cur),
                    size: hdr.size,
                });
            }

            let back = link(heap, cur);
            match prev {
                None if back.is_some() => out.push(Violation::HeadHasPrev {
                    class,
                    addr: addr(cur),
                }),
                Some(p) if back != Some(p) => out.push(Violation::LinkMismatch {
                    class,
                    addr: addr(p),
                    next: addr(cur),
                    back: back.map(addr),
                }),
                _ => {}
            }
            if prev.is_some_and(|p| cur <= p) {
                out.push(Violation::Unordered {
                    class,
                    addr: addr(cur),
                });
            }

            listed += 1;
            prev = Some(cur);
            cursor = link(heap, cur + WSIZE as usize);
        }

        if complete {
            let recorded = seglist::tail(heap, class).map(Offset::index);
            if recorded != prev {
                out.push(Violation::TailMismatch {
                    class,
                    recorded: recorded.map(addr),
                    actual: prev.map(addr),
                });
            }
        }
    }
    listed
}

fn read(heap: &impl HeapRegion, at: usize) -> u32 {
    heap.try_read_word(at).unwrap_or(0)
}

fn link(heap: &impl HeapRegion, at: usize) -> Option<usize> {
    Offset::from_link(read(heap, at)).map(Offset::index)
}

/// One block as seen by [`dump`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDump {
    pub addr: usize,
    pub size: u32,
    pub allocated: bool,
    pub prev_allocated: bool,
    /// Footer word, free blocks only.
    pub footer: Option<Header>,
    pub prev_link: Option<usize>,
    pub next_link: Option<usize>,
}

/// One bucket as seen by [`dump`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketDump {
    pub class: usize,
    pub head: Option<usize>,
    pub tail: Option<usize>,
}

/// Snapshot of the whole arena for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapDump {
    pub heap_low: usize,
    pub heap_high: usize,
    pub blocks: Vec<BlockDump>,
    pub buckets: Vec<BucketDump>,
    /// The block walk hit a header it could not follow.
    pub truncated: bool,
}

pub(crate) fn dump(heap: &impl HeapRegion) -> HeapDump {
    let heap_low = heap.heap_low();
    let addr = |off: usize| heap_low + off;
    let mut blocks = Vec::new();
    let mut truncated = true;

    let mut bp = FIRST_BP.index();
    while let Some(word) = heap.try_read_word(bp - WSIZE as usize) {
        let hdr = Header::decode(word);
        if hdr.size == 0 {
            truncated = bp != heap.len();
            break;
        }
        let end = bp.saturating_add(hdr.size as usize);
        if hdr.size < MIN_BLOCK_SIZE || end > heap.len() {
            break;
        }
        let (footer, prev_link, next_link) = if hdr.allocated {
            (None, None, None)
        } else {
            (
                Some(Header::decode(read(heap, end - 2 * WSIZE as usize))),
                link(heap, bp).map(addr),
                link(heap, bp + WSIZE as usize).map(addr),
            )
        };
        blocks.push(BlockDump {
            addr: addr(bp),
            size: hdr.size,
            allocated: hdr.allocated,
            prev_allocated: hdr.prev_allocated,
            footer,
            prev_link,
            next_link,
        });
        bp = end;
    }

    let buckets = if heap.len() >= TABLE_BYTES {
        (0..NUM_CLASSES)
            .map(|class| BucketDump {
                class,
                head: seglist::head(heap, class).map(|o| addr(o.index())),
                tail: seglist::tail(heap, class).map(|o| addr(o.index())),
            })
            .collect()
    } else {
        Vec::new()
    };

    HeapDump {
        heap_low,
        heap_high: addr(heap.len()),
        blocks,
        buckets,
        truncated,
    }
}

fn flag(allocated: bool) -> char {
    if allocated { 'a' } else { 'f' }
}

fn opt_addr(addr: Option<usize>) -> String {
    addr.map_or_else(|| "nil".to_string(), |a| format!("{a:#x}"))
}

impl fmt::Display for HeapDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "heap [{:#x}, {:#x})", self.heap_low, self.heap_high)?;
        for b in &self.blocks {
            write!(
                f,
                "{:#x}: header [{}:{}{}]",
                b.addr,
                b.size,
                flag(b.prev_allocated),
                flag(b.allocated)
            )?;
            if let Some(ftr) = b.footer {
                write!(
                    f,
                    " footer [{}:{}{}] prev {} next {}",
                    ftr.size,
                    flag(ftr.prev_allocated),
                    flag(ftr.allocated),
                    opt_addr(b.prev_link),
                    opt_addr(b.next_link)
                )?;
            }
            writeln!(f)?;
        }
        if self.truncated {
            writeln!(f, "(walk stopped at a bad header)")?;
        }
        for bucket in self.buckets.iter().filter(|b| b.head.is_some()) {
            writeln!(
                f,
                "class {:2}: head {} tail {}",
                bucket.class,
                opt_addr(bucket.head),
                opt_addr(bucket.tail)
            )?;
        }
        Ok(())
    }
}
