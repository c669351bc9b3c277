//! Core allocator state.
//!
//! A segregated-fit allocator over a single growable region. Every piece of
//! metadata (bucket table, sentinels, headers, footers, free-list links)
//! lives inside the region bytes; the struct itself only carries the
//! heap-end marker, counters, and the lifecycle log.

use crate::config::AllocatorConfig;
use crate::error::{HeapCorruption, HeapError};

use super::block::{
    ALIGNMENT, AllocatedBlock, BlockView, FreeBlock, Header, MIN_BLOCK_SIZE, PROLOGUE_SIZE, WSIZE,
    adjusted_size, header, next_block, set_header, set_prev_allocated, usable_size,
};
use super::checkheap::{self, HeapDump};
use super::lifecycle::{AllocatorLogLevel, AllocatorLogRecord, LifecycleLog, LogEvent};
use super::region::{HeapRegion, Offset, VecRegion};
use super::seglist::{self, NUM_CLASSES, TABLE_BYTES};

/// Payload offset of the prologue block (its header follows the table).
pub(crate) const PROLOGUE_BP: Offset = Offset::new(TABLE_BYTES as u32 + WSIZE);

/// Payload offset of the first real block.
pub(crate) const FIRST_BP: Offset = Offset::new(TABLE_BYTES as u32 + WSIZE + PROLOGUE_SIZE);

/// Bytes reserved at init: table, prologue header, epilogue header.
const INITIAL_BYTES: usize = FIRST_BP.index();

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Live allocated blocks.
    pub active_count: usize,
    /// Sum of live block sizes, headers included.
    pub allocated_bytes: usize,
    /// Current region size in bytes.
    pub heap_size: usize,
    /// Successful heap extensions, including the one made at init.
    pub extend_count: usize,
}

/// Segregated-fit allocator over a [`HeapRegion`].
///
/// Addresses handed out are absolute (`heap_low + offset`). All methods take
/// `&mut self`; one call is in flight per instance.
pub struct SegAllocator<R: HeapRegion = VecRegion> {
    region: R,
    config: AllocatorConfig,
    /// Last block before the epilogue, when it is free.
    heap_end: Option<Offset>,
    active_count: usize,
    allocated_bytes: usize,
    extend_count: usize,
    log: LifecycleLog,
}

impl SegAllocator<VecRegion> {
    /// Allocator over a fresh in-process region of `config.max_heap` bytes.
    pub fn new(config: AllocatorConfig) -> Result<Self, HeapError> {
        let config = config.normalized();
        let region = VecRegion::with_capacity(config.max_heap)?;
        Self::init(region, config)
    }

    pub fn with_defaults() -> Result<Self, HeapError> {
        Self::new(AllocatorConfig::default())
    }

    /// Payload of a live allocation, usable tail included.
    #[must_use]
    pub fn payload(&self, addr: usize) -> Option<&[u8]> {
        let range = self.live_block(addr).ok()?.payload_range();
        Some(&self.region.bytes()[range])
    }

    pub fn payload_mut(&mut self, addr: usize) -> Option<&mut [u8]> {
        let range = self.live_block(addr).ok()?.payload_range();
        Some(&mut self.region.bytes_mut()[range])
    }
}

impl<R: HeapRegion> SegAllocator<R> {
    /// Lay out the bucket table and sentinels in an empty region, then grow
    /// it by one chunk.
    pub fn init(mut region: R, config: AllocatorConfig) -> Result<Self, HeapError> {
        if !region.is_empty() {
            return Err(HeapError::RegionSetup("region is not empty".into()));
        }
        if region.heap_low() % ALIGNMENT != 0 {
            return Err(HeapError::RegionSetup(format!(
                "region base {:#x} is not {ALIGNMENT}-byte aligned",
                region.heap_low()
            )));
        }
        let config = config.normalized();
        region.extend(INITIAL_BYTES)?;

        seglist::clear(&mut region);
        set_header(&mut region, PROLOGUE_BP, Header::new(PROLOGUE_SIZE, true, true));
        set_header(&mut region, FIRST_BP, Header::epilogue(true));

        let mut alloc = Self {
            region,
            config,
            heap_end: None,
            active_count: 0,
            allocated_bytes: 0,
            extend_count: 0,
            log: LifecycleLog::new(config.log_level),
        };
        let block = alloc.extend_heap(config.chunk_size / WSIZE as usize)?;
        let (low, size) = (alloc.heap_low(), block.size());
        alloc.emit(
            LogEvent::new(AllocatorLogLevel::Info, "init", "init", "success")
                .addr(low)
                .size(size as usize),
            || format!("chunk_size={} max_heap={}", config.chunk_size, config.max_heap),
        );
        Ok(alloc)
    }

    // ---- public operations -------------------------------------------------

    /// Allocate at least `size` usable bytes. `None` for `size == 0` or when
    /// the region cannot grow.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        let out = self.malloc_inner("malloc", size);
        self.after_op("malloc");
        out
    }

    /// Release a live allocation. `None` is a no-op; unknown, misaligned, or
    /// already-free addresses are ignored and logged.
    pub fn deallocate(&mut self, ptr: Option<usize>) {
        if let Some(addr) = ptr {
            self.free_inner("free", addr);
        }
        self.after_op("free");
    }

    /// Resize an allocation, preserving the leading `min(old, new)` bytes.
    ///
    /// `ptr == None` allocates; `size == 0` frees and returns `None`. On
    /// failure the original block is left untouched.
    pub fn reallocate(&mut self, ptr: Option<usize>, size: usize) -> Option<usize> {
        let out = match ptr {
            None => self.malloc_inner("realloc", size),
            Some(addr) if size == 0 => {
                self.free_inner("realloc", addr);
                None
            }
            Some(addr) => self.realloc_inner(addr, size),
        };
        self.after_op("realloc");
        out
    }

    /// Allocate `count * size` zeroed bytes. Overflow yields `None`.
    pub fn allocate_zeroed(&mut self, count: usize, size: usize) -> Option<usize> {
        let out = match count.checked_mul(size) {
            Some(total) => {
                let out = self.malloc_inner("calloc", total);
                if let Some(addr) = out
                    && let Ok(block) = self.live_block(addr)
                {
                    let range = block.payload_range();
                    self.region.fill(range.start, range.len(), 0);
                }
                out
            }
            None => {
                let err = HeapError::InvalidArgument("count * size overflows");
                self.emit(
                    LogEvent::new(AllocatorLogLevel::Warn, "calloc", "calloc_overflow", "denied")
                        .size(count),
                    || format!("{err}; count={count} size={size}"),
                );
                None
            }
        };
        self.after_op("calloc");
        out
    }

    /// Usable bytes of a live allocation.
    #[must_use]
    pub fn usable_size(&self, addr: usize) -> Option<usize> {
        self.live_block(addr)
            .ok()
            .map(|block| usable_size(block.size()))
    }

    // ---- validation --------------------------------------------------------

    /// Run the validator and return every violation found.
    pub fn check_heap(&self) -> Result<(), HeapCorruption> {
        let violations = checkheap::check(&self.region, self.heap_end);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(HeapCorruption { violations })
        }
    }

    /// Validator entry point with the C convention: 0 when consistent,
    /// 1 otherwise. `verbose` prints each violation and a heap dump to stderr.
    pub fn check(&self, verbose: bool) -> i32 {
        match self.check_heap() {
            Ok(()) => 0,
            Err(corruption) => {
                if verbose {
                    for violation in &corruption.violations {
                        eprintln!("checkheap: {violation}");
                    }
                    eprint!("{}", self.dump());
                }
                1
            }
        }
    }

    /// Snapshot of every block and bucket.
    #[must_use]
    pub fn dump(&self) -> HeapDump {
        checkheap::dump(&self.region)
    }

    // ---- accessors ---------------------------------------------------------

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            active_count: self.active_count,
            allocated_bytes: self.allocated_bytes,
            heap_size: self.region.len(),
            extend_count: self.extend_count,
        }
    }

    #[must_use]
    pub fn heap_low(&self) -> usize {
        self.region.heap_low()
    }

    #[must_use]
    pub fn heap_high(&self) -> usize {
        self.region.heap_high()
    }

    #[must_use]
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    #[must_use]
    pub fn region(&self) -> &R {
        &self.region
    }

    /// Raw region access. Writes through this bypass every invariant and
    /// exist for corruption tests and external inspection tools.
    pub fn region_mut(&mut self) -> &mut R {
        &mut self.region
    }

    #[must_use]
    pub fn lifecycle_logs(&self) -> &[AllocatorLogRecord] {
        self.log.records()
    }

    pub fn drain_lifecycle_logs(&mut self) -> Vec<AllocatorLogRecord> {
        self.log.drain()
    }

    pub fn set_log_level(&mut self, level: Option<AllocatorLogLevel>) {
        self.config.log_level = level;
        self.log.set_threshold(level);
    }

    // ---- operation bodies --------------------------------------------------

    fn malloc_inner(&mut self, symbol: &'static str, size: usize) -> Option<usize> {
        if size == 0 {
            self.emit(
                LogEvent::new(AllocatorLogLevel::Trace, symbol, "alloc_zero", "noop").size(0),
                String::new,
            );
            return None;
        }
        let Some(asize) = adjusted_size(size) else {
            self.emit(
                LogEvent::new(AllocatorLogLevel::Warn, symbol, "alloc", "denied").size(size),
                || HeapError::InvalidArgument("size exceeds header range").to_string(),
            );
            return None;
        };
        match self.allocate_block(asize) {
            Ok((block, path)) => {
                let addr = self.region.addr_of(block.bp());
                self.emit(
                    LogEvent::new(AllocatorLogLevel::Trace, symbol, "alloc", "success")
                        .addr(addr)
                        .size(size)
                        .class(seglist::classify(asize)),
                    || format!("path={path} block_size={}", block.size()),
                );
                Some(addr)
            }
            Err(err) => {
                self.emit(
                    LogEvent::new(AllocatorLogLevel::Warn, symbol, "alloc", "oom").size(size),
                    || err.to_string(),
                );
                None
            }
        }
    }

    fn free_inner(&mut self, symbol: &'static str, addr: usize) {
        match self.live_block(addr) {
            Ok(block) => {
                let size = block.size();
                let merged = self.release(block);
                self.emit(
                    LogEvent::new(AllocatorLogLevel::Trace, symbol, "free", "success")
                        .addr(addr)
                        .size(size as usize),
                    || format!("merged_size={}", merged.size()),
                );
            }
            Err(reason) => self.emit(
                LogEvent::new(AllocatorLogLevel::Warn, symbol, "invalid_free", "ignored")
                    .addr(addr),
                || reason.to_string(),
            ),
        }
    }

    fn realloc_inner(&mut self, addr: usize, size: usize) -> Option<usize> {
        let block = match self.live_block(addr) {
            Ok(block) => block,
            Err(reason) => {
                self.emit(
                    LogEvent::new(AllocatorLogLevel::Warn, "realloc", "invalid_pointer", "denied")
                        .addr(addr)
                        .size(size),
                    || reason.to_string(),
                );
                return None;
            }
        };
        let Some(asize) = adjusted_size(size) else {
            self.emit(
                LogEvent::new(AllocatorLogLevel::Warn, "realloc", "alloc", "denied").size(size),
                || HeapError::InvalidArgument("size exceeds header range").to_string(),
            );
            return None;
        };

        if let Some(path) = self.resize_in_place(block, asize) {
            self.emit(
                LogEvent::new(AllocatorLogLevel::Trace, "realloc", "resize", "success")
                    .addr(addr)
                    .size(size),
                || format!("path={path}"),
            );
            return Some(addr);
        }

        let fresh = match self.allocate_block(asize) {
            Ok((fresh, _)) => fresh,
            Err(err) => {
                self.emit(
                    LogEvent::new(AllocatorLogLevel::Warn, "realloc", "alloc", "oom")
                        .addr(addr)
                        .size(size),
                    || err.to_string(),
                );
                return None;
            }
        };
        let src = block.payload_range();
        let keep = src.len().min(size);
        self.region.copy(src.start, fresh.bp().index(), keep);
        self.release(block);

        let new_addr = self.region.addr_of(fresh.bp());
        self.emit(
            LogEvent::new(AllocatorLogLevel::Trace, "realloc", "resize", "success")
                .addr(new_addr)
                .size(size),
            || format!("path=copy old={addr:#x} copied={keep}"),
        );
        Some(new_addr)
    }

    // ---- internals ---------------------------------------------------------

    /// Map an address to the live block it names.
    fn live_block(&self, addr: usize) -> Result<AllocatedBlock, &'static str> {
        let bp = self.region.offset_of(addr).ok_or("outside_heap")?;
        if bp < FIRST_BP {
            return Err("outside_heap");
        }
        if bp.index() % ALIGNMENT != 0 {
            return Err("misaligned");
        }
        match BlockView::read(&self.region, bp) {
            BlockView::Free(_) => Err("already_free"),
            BlockView::Allocated(block)
                if block.size() >= MIN_BLOCK_SIZE
                    && bp.index() + block.size() as usize <= self.region.len() =>
            {
                Ok(block)
            }
            BlockView::Allocated(_) => Err("bad_header"),
        }
    }

    /// Find or make room for a block of `asize` bytes and claim it.
    fn allocate_block(
        &mut self,
        asize: u32,
    ) -> Result<(AllocatedBlock, &'static str), HeapError> {
        if let Some(block) = self.find_fit(asize) {
            return Ok((self.place(block, asize), "find_fit"));
        }
        // A free trailing block merges with the new space, so only the
        // shortfall has to come from the region.
        let shortfall = asize.saturating_sub(self.trailing_free_size());
        let grow = (shortfall as usize).max(self.config.chunk_size);
        let block = self.extend_heap(grow / WSIZE as usize)?;
        debug_assert!(block.size() >= asize);
        Ok((self.place(block, asize), "extend_heap"))
    }

    fn trailing_free_size(&self) -> u32 {
        self.heap_end
            .map_or(0, |bp| header(&self.region, bp).size)
    }

    /// First fit, escalating from the request's own class.
    fn find_fit(&self, asize: u32) -> Option<FreeBlock> {
        let heap = &self.region;
        (seglist::classify(asize)..NUM_CLASSES)
            .flat_map(|class| seglist::iter(heap, class))
            .find(|&bp| header(heap, bp).size >= asize)
            .and_then(|bp| FreeBlock::at(heap, bp))
    }

    /// Claim `asize` bytes of an indexed free block, returning any tail of at
    /// least a minimum block to the index.
    fn place(&mut self, block: FreeBlock, asize: u32) -> AllocatedBlock {
        let heap = &mut self.region;
        seglist::delete(heap, seglist::classify(block.size()), block);
        let used = if block.size() - asize >= MIN_BLOCK_SIZE {
            let (used, rest) = block.split(heap, asize);
            seglist::insert(heap, seglist::classify(rest.size()), rest);
            if self.heap_end == Some(block.bp()) {
                self.heap_end = Some(rest.bp());
            }
            used
        } else {
            let used = block.claim(heap);
            set_prev_allocated(heap, next_block(used.bp(), used.size()), true);
            if self.heap_end == Some(block.bp()) {
                self.heap_end = None;
            }
            used
        };
        self.active_count += 1;
        self.allocated_bytes += used.size() as usize;
        used
    }

    /// Resize a live block without moving it: shrink by splitting off the
    /// tail, or grow into a free physical successor. `None` when neither
    /// applies.
    fn resize_in_place(&mut self, block: AllocatedBlock, asize: u32) -> Option<&'static str> {
        let (bp, csize) = (block.bp(), block.size());
        let prev_allocated = block.header().prev_allocated;

        if asize <= csize {
            if csize - asize >= MIN_BLOCK_SIZE {
                let heap = &mut self.region;
                set_header(heap, bp, Header::new(asize, true, prev_allocated));
                let rest = FreeBlock::write(heap, next_block(bp, asize), csize - asize, true);
                self.allocated_bytes -= rest.size() as usize;
                self.coalesce(rest);
                return Some("shrink_split");
            }
            return Some("shrink_noop");
        }

        let heap = &mut self.region;
        let next = FreeBlock::at(heap, next_block(bp, csize))?;
        let total = csize + next.size();
        if total < asize {
            return None;
        }
        seglist::delete(heap, seglist::classify(next.size()), next);
        let was_end = self.heap_end == Some(next.bp());
        let new_size = if total - asize >= MIN_BLOCK_SIZE {
            set_header(heap, bp, Header::new(asize, true, prev_allocated));
            let rest = FreeBlock::write(heap, next_block(bp, asize), total - asize, true);
            seglist::insert(heap, seglist::classify(rest.size()), rest);
            if was_end {
                self.heap_end = Some(rest.bp());
            }
            asize
        } else {
            set_header(heap, bp, Header::new(total, true, prev_allocated));
            set_prev_allocated(heap, next_block(bp, total), true);
            if was_end {
                self.heap_end = None;
            }
            total
        };
        self.allocated_bytes += (new_size - csize) as usize;
        Some("grow_into_next")
    }

    /// Free a live block and merge it with its neighbours.
    fn release(&mut self, block: AllocatedBlock) -> FreeBlock {
        let freed = block.reload(&self.region).release(&mut self.region);
        self.active_count -= 1;
        self.allocated_bytes -= freed.size() as usize;
        self.coalesce(freed)
    }

    /// Merge an unindexed free block with free physical neighbours, index
    /// the result, and return it.
    fn coalesce(&mut self, block: FreeBlock) -> FreeBlock {
        let heap = &mut self.region;
        let prev_free = !block.header().prev_allocated;
        let next = FreeBlock::at(heap, next_block(block.bp(), block.size()));

        let merged = match (prev_free, next) {
            (false, None) => block,
            (false, Some(next)) => {
                seglist::delete(heap, seglist::classify(next.size()), next);
                FreeBlock::write(heap, block.bp(), block.size() + next.size(), true)
            }
            (true, None) => {
                let prev = FreeBlock::before(heap, block.bp());
                seglist::delete(heap, seglist::classify(prev.size()), prev);
                FreeBlock::write(
                    heap,
                    prev.bp(),
                    prev.size() + block.size(),
                    prev.header().prev_allocated,
                )
            }
            (true, Some(next)) => {
                let prev = FreeBlock::before(heap, block.bp());
                seglist::delete(heap, seglist::classify(prev.size()), prev);
                seglist::delete(heap, seglist::classify(next.size()), next);
                FreeBlock::write(
                    heap,
                    prev.bp(),
                    prev.size() + block.size() + next.size(),
                    prev.header().prev_allocated,
                )
            }
        };

        let after = next_block(merged.bp(), merged.size());
        set_prev_allocated(heap, after, false);
        seglist::insert(heap, seglist::classify(merged.size()), merged);
        if header(heap, after).is_epilogue() {
            self.heap_end = Some(merged.bp());
        }
        merged
    }

    /// Grow the region by `words` 4-byte words (rounded up to even) and turn
    /// the new space into a free block, merged with a free trailing block.
    fn extend_heap(&mut self, words: usize) -> Result<FreeBlock, HeapError> {
        let bytes = words
            .checked_next_multiple_of(2)
            .and_then(|w| w.checked_mul(WSIZE as usize))
            .ok_or(HeapError::InvalidArgument("heap extension overflows"))?;
        let size = u32::try_from(bytes)
            .ok()
            .filter(|&s| s >= MIN_BLOCK_SIZE)
            .ok_or(HeapError::InvalidArgument("heap extension out of range"))?;

        // The old epilogue header becomes the new block's header.
        let bp = self.region.extend(bytes)?;
        let heap = &mut self.region;
        let prev_allocated = header(heap, bp).prev_allocated;
        let block = FreeBlock::write(heap, bp, size, prev_allocated);
        set_header(heap, next_block(bp, size), Header::epilogue(false));
        self.extend_count += 1;

        let (addr, count) = (self.region.addr_of(bp), self.extend_count);
        self.emit(
            LogEvent::new(AllocatorLogLevel::Debug, "sbrk", "extend_heap", "success")
                .addr(addr)
                .size(bytes),
            || format!("extend_count={count}"),
        );
        Ok(self.coalesce(block))
    }

    /// Validator hook run after each public operation when enabled.
    fn after_op(&mut self, symbol: &'static str) {
        if !self.config.check_mode.checks_enabled() {
            return;
        }
        let Err(corruption) = self.check_heap() else {
            return;
        };
        for violation in &corruption.violations {
            self.emit(
                LogEvent::new(AllocatorLogLevel::Error, symbol, "heap_corruption", "detected"),
                || violation.to_string(),
            );
        }
        if self.config.check_mode.aborts() {
            panic!("heap check failed after {symbol}: {corruption}");
        }
    }

    fn emit(&mut self, event: LogEvent, details: impl FnOnce() -> String) {
        let heap_size = self.region.len();
        self.log
            .record(event, details, self.active_count, heap_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckMode;

    fn alloc() -> SegAllocator {
        SegAllocator::new(
            AllocatorConfig::default()
                .with_max_heap(1 << 20)
                .with_check_mode(CheckMode::Abort)
                .with_log_level(Some(AllocatorLogLevel::Trace)),
        )
        .unwrap()
    }

    fn fill(a: &mut SegAllocator, addr: usize, byte: u8) {
        a.payload_mut(addr).unwrap().fill(byte);
    }

    #[test]
    fn test_init_layout() {
        let a = alloc();
        assert_eq!(a.check(false), 0);
        let stats = a.stats();
        assert_eq!(stats.heap_size, INITIAL_BYTES + 256);
        assert_eq!(stats.extend_count, 1);
        assert_eq!(stats.active_count, 0);
        assert_eq!(a.heap_end, Some(FIRST_BP));
        assert_eq!(a.heap_low() % ALIGNMENT, 0);
    }

    #[test]
    fn test_init_rejects_used_region() {
        let mut region = VecRegion::with_capacity(4096).unwrap();
        region.extend(16).unwrap();
        assert!(matches!(
            SegAllocator::init(region, AllocatorConfig::default()),
            Err(HeapError::RegionSetup(_))
        ));
    }

    #[test]
    fn test_init_fails_when_region_too_small() {
        let cfg = AllocatorConfig::default().with_max_heap(200);
        assert!(matches!(
            SegAllocator::new(cfg),
            Err(HeapError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn test_malloc_basic() {
        let mut a = alloc();
        let p = a.allocate(100).unwrap();
        assert_eq!(p % ALIGNMENT, 0);
        assert!(p >= a.heap_low() && p < a.heap_high());
        assert!(a.usable_size(p).unwrap() >= 100);
        assert_eq!(a.stats().active_count, 1);
    }

    #[test]
    fn test_malloc_zero() {
        let mut a = alloc();
        assert_eq!(a.allocate(0), None);
        assert_eq!(a.stats().active_count, 0);
    }

    #[test]
    fn test_first_block_placement() {
        let mut a = alloc();
        let p = a.allocate(1).unwrap();
        assert_eq!(p, a.heap_low() + FIRST_BP.index());
        assert_eq!(a.usable_size(p), Some(12));
    }

    #[test]
    fn test_free_then_reuse_same_address() {
        let mut a = alloc();
        let p = a.allocate(64).unwrap();
        a.deallocate(Some(p));
        assert_eq!(a.allocate(64), Some(p));
    }

    #[test]
    fn test_free_null_is_noop() {
        let mut a = alloc();
        let before = a.stats();
        a.deallocate(None);
        assert_eq!(a.stats(), before);
    }

    #[test]
    fn test_free_merges_all_neighbours() {
        let mut a = alloc();
        let p1 = a.allocate(40).unwrap();
        let p2 = a.allocate(40).unwrap();
        let p3 = a.allocate(40).unwrap();
        let guard = a.allocate(40).unwrap();
        a.deallocate(Some(p1));
        a.deallocate(Some(p3));
        a.deallocate(Some(p2));
        // p1..p3 collapse into one block in front of the guard.
        let dump = a.dump();
        let free: Vec<_> = dump.blocks.iter().filter(|b| !b.allocated).collect();
        assert_eq!(free.len(), 2);
        assert_eq!(free[0].addr, p1);
        assert_eq!(free[0].size, 3 * 48);
        assert!(a.usable_size(guard).is_some());
    }

    #[test]
    fn test_free_invalid_pointers_are_ignored() {
        let mut a = alloc();
        let p = a.allocate(32).unwrap();
        a.deallocate(Some(p + 4));
        a.deallocate(Some(a.heap_high() + 64));
        a.deallocate(Some(p));
        a.deallocate(Some(p));
        assert_eq!(a.stats().active_count, 0);
        let warns: Vec<_> = a
            .lifecycle_logs()
            .iter()
            .filter(|r| r.event == "invalid_free")
            .map(|r| r.details.as_str())
            .collect();
        assert_eq!(warns, vec!["misaligned", "outside_heap", "already_free"]);
    }

    #[test]
    fn test_growth_uses_trailing_free_space() {
        let mut a = alloc();
        // The initial chunk is 256 bytes; this request needs 1008.
        let p = a.allocate(1000).unwrap();
        assert_eq!(p, a.heap_low() + FIRST_BP.index());
        assert_eq!(a.stats().heap_size, INITIAL_BYTES + 1008);
        assert_eq!(a.heap_end, None);
    }

    #[test]
    fn test_split_leaves_remainder_indexed() {
        let mut a = alloc();
        let p = a.allocate(24).unwrap();
        assert_eq!(a.usable_size(p), Some(28));
        let rest = FIRST_BP.add(32);
        assert_eq!(a.heap_end, Some(rest));
        assert_eq!(seglist::head(&a.region, seglist::classify(224)), Some(rest));
    }

    #[test]
    fn test_calloc_zeroes_recycled_memory() {
        let mut a = alloc();
        let p = a.allocate(64).unwrap();
        fill(&mut a, p, 0xAB);
        a.deallocate(Some(p));
        let q = a.allocate_zeroed(8, 8).unwrap();
        assert_eq!(q, p);
        assert!(a.payload(q).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_calloc_overflow() {
        let mut a = alloc();
        assert_eq!(a.allocate_zeroed(usize::MAX, 2), None);
        assert!(
            a.lifecycle_logs()
                .iter()
                .any(|r| r.event == "calloc_overflow" && r.level == AllocatorLogLevel::Warn)
        );
        assert_eq!(a.allocate_zeroed(0, 16), None);
    }

    #[test]
    fn test_realloc_null_and_zero() {
        let mut a = alloc();
        let p = a.reallocate(None, 64).unwrap();
        assert!(a.usable_size(p).unwrap() >= 64);
        assert_eq!(a.reallocate(Some(p), 0), None);
        assert_eq!(a.stats().active_count, 0);
    }

    #[test]
    fn test_realloc_shrink_in_place() {
        let mut a = alloc();
        let p = a.allocate(200).unwrap();
        let _guard = a.allocate(8).unwrap();
        fill(&mut a, p, 7);
        assert_eq!(a.reallocate(Some(p), 40), Some(p));
        assert!(a.payload(p).unwrap().iter().all(|&b| b == 7));
        assert_eq!(a.usable_size(p), Some(44));
    }

    #[test]
    fn test_realloc_grows_into_free_successor() {
        let mut a = alloc();
        let p = a.allocate(40).unwrap();
        let q = a.allocate(40).unwrap();
        let _guard = a.allocate(8).unwrap();
        fill(&mut a, p, 9);
        a.deallocate(Some(q));
        assert_eq!(a.reallocate(Some(p), 80), Some(p));
        assert!(a.payload(p).unwrap()[..44].iter().all(|&b| b == 9));
    }

    #[test]
    fn test_realloc_moves_and_preserves_content() {
        let mut a = alloc();
        let p = a.allocate(100).unwrap();
        let _guard = a.allocate(8).unwrap();
        for (i, b) in a.payload_mut(p).unwrap().iter_mut().enumerate() {
            *b = i as u8;
        }
        let q = a.reallocate(Some(p), 200).unwrap();
        assert_ne!(q, p);
        let data = a.payload(q).unwrap();
        assert!((0..100).all(|i| data[i] == i as u8));
        assert_eq!(a.usable_size(p), None);
    }

    #[test]
    fn test_realloc_failure_keeps_original() {
        let mut a = SegAllocator::new(AllocatorConfig::default().with_max_heap(1024)).unwrap();
        let p = a.allocate(64).unwrap();
        let _guard = a.allocate(8).unwrap();
        fill(&mut a, p, 3);
        assert_eq!(a.reallocate(Some(p), 4096), None);
        assert!(a.payload(p).unwrap().iter().all(|&b| b == 3));
        assert_eq!(a.check(false), 0);
    }

    #[test]
    fn test_out_of_memory_is_not_fatal() {
        let mut a = SegAllocator::new(AllocatorConfig::default().with_max_heap(2048)).unwrap();
        assert_eq!(a.allocate(4096), None);
        assert!(a.lifecycle_logs().iter().any(|r| r.outcome == "oom"));
        assert!(a.allocate(64).is_some());
        assert_eq!(a.check(false), 0);
    }

    #[test]
    fn test_lifecycle_logs_include_trace_and_decision_ids() {
        let mut a = alloc();
        a.drain_lifecycle_logs();
        let p = a.allocate(64).unwrap();
        a.deallocate(Some(p));
        let logs = a.drain_lifecycle_logs();
        assert_eq!(logs.len(), 2);
        assert!(logs[0].decision_id < logs[1].decision_id);
        assert_eq!(logs[0].symbol, "malloc");
        assert_eq!(logs[0].addr, Some(p));
        assert!(logs[0].details.starts_with("path=find_fit"));
        assert_eq!(logs[1].event, "free");
        assert!(logs[1].trace_id.starts_with("segalloc::malloc::free::"));
    }

    #[test]
    fn test_accounting_invariant_under_deterministic_trace() {
        let mut a = alloc();
        let mut seed = 0x1234_5678_u64;
        let mut lcg = || {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            seed >> 33
        };
        let mut live: Vec<usize> = Vec::new();
        for _ in 0..2000 {
            let roll = lcg() % 10;
            if roll < 6 || live.is_empty() {
                if let Some(p) = a.allocate((lcg() % 512) as usize + 1) {
                    live.push(p);
                }
            } else if roll < 8 {
                let idx = (lcg() as usize) % live.len();
                a.deallocate(Some(live.swap_remove(idx)));
            } else {
                let idx = (lcg() as usize) % live.len();
                let size = (lcg() % 1024) as usize + 1;
                if let Some(q) = a.reallocate(Some(live[idx]), size) {
                    live[idx] = q;
                }
            }
            assert_eq!(a.stats().active_count, live.len());
        }
        let total: usize = live.iter().map(|&p| a.usable_size(p).unwrap() + 4).sum();
        assert_eq!(a.stats().allocated_bytes, total);
    }
}
