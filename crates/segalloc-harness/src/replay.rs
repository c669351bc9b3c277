//! Trace replay against a fresh allocator.
//!
//! Every live block is stamped with a byte pattern derived from its trace id.
//! The pattern is verified before the block is freed or resized, so any
//! allocator bug that clobbers a live payload surfaces as
//! [`ReplayError::Corrupted`] at the op that first observes it.

use std::collections::{BTreeMap, HashMap};

use segalloc_core::{
    AllocatorConfig, AllocatorLogRecord, HeapCorruption, HeapError, SegAllocator,
};
use serde::Serialize;
use thiserror::Error;

use crate::trace::{Trace, TraceOp};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("allocator init failed: {0}")]
    Init(#[from] HeapError),
    #[error("op {op}: allocation of {size} bytes for id {id} failed")]
    AllocFailed { op: usize, id: usize, size: usize },
    #[error("op {op}: id {id} got misaligned address {addr:#x}")]
    Misaligned { op: usize, id: usize, addr: usize },
    #[error("op {op}: id {id} block [{addr:#x}, +{size}) lies outside the heap")]
    OutOfHeap {
        op: usize,
        id: usize,
        addr: usize,
        size: usize,
    },
    #[error("op {op}: id {id} at {addr:#x} overlaps live id {other}")]
    Overlap {
        op: usize,
        id: usize,
        addr: usize,
        other: usize,
    },
    #[error("op {op}: payload of id {id} corrupted at byte {offset}")]
    Corrupted { op: usize, id: usize, offset: usize },
    #[error("op {op}: id {id} is already live")]
    IdInUse { op: usize, id: usize },
    #[error("op {op}: free of id {id} which is not live")]
    FreeUnknown { op: usize, id: usize },
    #[error("op {op}: {source}")]
    HeapCheck {
        op: usize,
        #[source]
        source: HeapCorruption,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct ReplayOptions {
    /// Run the validator after every op instead of only at the end.
    pub check_each_op: bool,
    pub config: AllocatorConfig,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            check_each_op: false,
            config: AllocatorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    pub ops: usize,
    pub allocs: usize,
    pub frees: usize,
    pub reallocs: usize,
    pub checks_run: usize,
    /// Largest sum of requested sizes live at once.
    pub peak_live_bytes: usize,
    pub final_heap_size: usize,
    /// `peak_live_bytes / final_heap_size`.
    pub utilization: f64,
    pub extend_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_sha256: Option<String>,
    #[serde(skip)]
    pub records: Vec<AllocatorLogRecord>,
}

/// Replay `trace` on a fresh allocator built from `options.config`.
pub fn replay(trace: &Trace, options: &ReplayOptions) -> Result<ReplayReport, ReplayError> {
    let mut replayer = Replayer::new(options.config, trace.num_ids)?;
    for (op, step) in trace.ops.iter().enumerate() {
        replayer.apply(op, *step)?;
        if options.check_each_op {
            replayer.check(op)?;
        }
    }
    replayer.finish(trace.ops.len())
}

#[derive(Debug, Clone, Copy)]
struct Live {
    addr: usize,
    size: usize,
}

/// Drives one allocator and mirrors what the trace believes is live.
pub(crate) struct Replayer {
    alloc: SegAllocator,
    /// `None` marks an id whose last request was zero bytes.
    by_id: HashMap<usize, Option<Live>>,
    /// Start address to (end, id).
    by_addr: BTreeMap<usize, (usize, usize)>,
    live_bytes: usize,
    report: ReplayReport,
}

impl Replayer {
    pub(crate) fn new(config: AllocatorConfig, ids_hint: usize) -> Result<Self, ReplayError> {
        Ok(Self {
            alloc: SegAllocator::new(config)?,
            by_id: HashMap::with_capacity(ids_hint),
            by_addr: BTreeMap::new(),
            live_bytes: 0,
            report: ReplayReport::default(),
        })
    }

    pub(crate) fn is_live(&self, id: usize) -> bool {
        self.by_id.contains_key(&id)
    }

    pub(crate) fn apply(&mut self, op: usize, step: TraceOp) -> Result<(), ReplayError> {
        self.report.ops += 1;
        match step {
            TraceOp::Alloc { id, size } => {
                self.report.allocs += 1;
                if self.by_id.contains_key(&id) {
                    return Err(ReplayError::IdInUse { op, id });
                }
                let addr = self.alloc.allocate(size);
                self.admit(op, id, size, addr)?;
            }
            TraceOp::Free { id } => {
                self.report.frees += 1;
                let Some(entry) = self.by_id.remove(&id) else {
                    return Err(ReplayError::FreeUnknown { op, id });
                };
                if let Some(live) = entry {
                    self.verify(op, id, live, live.size)?;
                    self.forget(live);
                }
                self.alloc.deallocate(entry.map(|live| live.addr));
            }
            TraceOp::Realloc { id, size } => {
                self.report.reallocs += 1;
                let old = self.by_id.remove(&id).flatten();
                if let Some(live) = old {
                    self.verify(op, id, live, live.size)?;
                    self.forget(live);
                }
                let addr = self.alloc.reallocate(old.map(|live| live.addr), size);
                if let (Some(live), Some(new)) = (old, addr) {
                    let kept = live.size.min(size);
                    self.verify(
                        op,
                        id,
                        Live {
                            addr: new,
                            size: kept,
                        },
                        kept,
                    )?;
                }
                if size == 0 {
                    // A zero-size realloc frees; the id is no longer live.
                    return Ok(());
                }
                self.admit(op, id, size, addr)?;
            }
        }
        Ok(())
    }

    pub(crate) fn check(&mut self, op: usize) -> Result<(), ReplayError> {
        self.report.checks_run += 1;
        self.alloc
            .check_heap()
            .map_err(|source| ReplayError::HeapCheck { op, source })
    }

    pub(crate) fn finish(mut self, ops: usize) -> Result<ReplayReport, ReplayError> {
        self.check(ops)?;
        let ids: Vec<(usize, Live)> = self
            .by_id
            .iter()
            .filter_map(|(&id, live)| live.map(|live| (id, live)))
            .collect();
        for (id, live) in ids {
            self.verify(ops, id, live, live.size)?;
        }
        let stats = self.alloc.stats();
        self.report.final_heap_size = stats.heap_size;
        self.report.extend_count = stats.extend_count;
        self.report.utilization = if stats.heap_size == 0 {
            0.0
        } else {
            self.report.peak_live_bytes as f64 / stats.heap_size as f64
        };
        self.report.records = self.alloc.drain_lifecycle_logs();
        Ok(self.report)
    }

    /// Record a fresh block for `id`, checking its placement and stamping it.
    fn admit(
        &mut self,
        op: usize,
        id: usize,
        size: usize,
        addr: Option<usize>,
    ) -> Result<(), ReplayError> {
        let addr = match addr {
            Some(addr) => addr,
            None if size == 0 => {
                self.by_id.insert(id, None);
                return Ok(());
            }
            None => return Err(ReplayError::AllocFailed { op, id, size }),
        };
        if addr % 8 != 0 {
            return Err(ReplayError::Misaligned { op, id, addr });
        }
        let end = addr.saturating_add(size);
        if addr < self.alloc.heap_low() || end > self.alloc.heap_high() {
            return Err(ReplayError::OutOfHeap { op, id, addr, size });
        }
        if let Some((_, &(other_end, other))) = self.by_addr.range(..end).next_back()
            && other_end > addr
        {
            return Err(ReplayError::Overlap {
                op,
                id,
                addr,
                other,
            });
        }

        self.by_addr.insert(addr, (end, id));
        self.by_id.insert(id, Some(Live { addr, size }));
        self.live_bytes += size;
        self.report.peak_live_bytes = self.report.peak_live_bytes.max(self.live_bytes);

        if let Some(bytes) = self.alloc.payload_mut(addr) {
            for (i, b) in bytes[..size].iter_mut().enumerate() {
                *b = pattern(id, i);
            }
        }
        Ok(())
    }

    fn forget(&mut self, live: Live) {
        self.by_addr.remove(&live.addr);
        self.live_bytes -= live.size;
    }

    fn verify(&self, op: usize, id: usize, live: Live, len: usize) -> Result<(), ReplayError> {
        let bytes = self
            .alloc
            .payload(live.addr)
            .ok_or(ReplayError::Corrupted { op, id, offset: 0 })?;
        if bytes.len() < len {
            return Err(ReplayError::Corrupted {
                op,
                id,
                offset: bytes.len(),
            });
        }
        match bytes[..len]
            .iter()
            .enumerate()
            .find(|&(i, &b)| b != pattern(id, i))
        {
            Some((offset, _)) => Err(ReplayError::Corrupted { op, id, offset }),
            None => Ok(()),
        }
    }
}

fn pattern(id: usize, i: usize) -> u8 {
    (id.wrapping_mul(0x9E37_79B9) ^ i.wrapping_mul(31)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use segalloc_core::CheckMode;

    fn trace(text: &str) -> Trace {
        Trace::parse(text).unwrap()
    }

    #[test]
    fn replays_short_trace() {
        let t = trace("20000 3 6 1\na 0 2040\na 1 2040\nf 1\na 2 48\nr 0 4072\nf 0\n");
        let report = replay(
            &t,
            &ReplayOptions {
                check_each_op: true,
                ..ReplayOptions::default()
            },
        )
        .unwrap();
        assert_eq!(report.ops, 6);
        assert_eq!(report.allocs, 3);
        assert_eq!(report.frees, 2);
        assert_eq!(report.reallocs, 1);
        assert_eq!(report.checks_run, 7);
        assert!(report.peak_live_bytes >= 4072);
        assert!(report.utilization > 0.0 && report.utilization <= 1.0);
    }

    #[test]
    fn zero_sized_requests_are_tracked() {
        let t = trace("100 2 4 1\na 0 0\na 1 8\nf 0\nr 1 0\n");
        let report = replay(&t, &ReplayOptions::default()).unwrap();
        assert_eq!(report.ops, 4);
    }

    #[test]
    fn realloc_of_zero_sized_id_allocates() {
        let t = trace("100 1 3 1\na 0 0\nr 0 64\nf 0\n");
        let report = replay(&t, &ReplayOptions::default()).unwrap();
        assert_eq!(report.peak_live_bytes, 64);
    }

    #[test]
    fn zero_size_realloc_releases_zero_sized_id() {
        let t = trace("100 1 3 1\na 0 0\nr 0 0\na 0 8\n");
        let report = replay(&t, &ReplayOptions::default()).unwrap();
        assert_eq!(report.ops, 3);
        assert_eq!(report.peak_live_bytes, 8);
    }

    #[test]
    fn zero_size_realloc_releases_live_id() {
        let t = trace("100 1 3 1\na 0 24\nr 0 0\na 0 24\n");
        let report = replay(
            &t,
            &ReplayOptions {
                check_each_op: true,
                ..ReplayOptions::default()
            },
        )
        .unwrap();
        assert_eq!(report.reallocs, 1);
        assert_eq!(report.peak_live_bytes, 24);
    }

    #[test]
    fn free_of_unknown_id_is_reported() {
        let t = trace("100 2 2 1\na 0 8\nf 1\n");
        let err = replay(&t, &ReplayOptions::default()).unwrap_err();
        assert!(matches!(err, ReplayError::FreeUnknown { op: 1, id: 1 }));
    }

    #[test]
    fn double_alloc_of_id_is_reported() {
        let t = trace("100 1 2 1\na 0 8\na 0 8\n");
        let err = replay(&t, &ReplayOptions::default()).unwrap_err();
        assert!(matches!(err, ReplayError::IdInUse { op: 1, id: 0 }));
    }

    #[test]
    fn exhausted_heap_fails_the_op() {
        let t = trace("100 1 1 1\na 0 100000\n");
        let options = ReplayOptions {
            check_each_op: false,
            config: AllocatorConfig::default()
                .with_max_heap(4096)
                .with_check_mode(CheckMode::Verify),
        };
        let err = replay(&t, &options).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::AllocFailed {
                op: 0,
                id: 0,
                size: 100000
            }
        ));
    }

    #[test]
    fn report_serializes_without_records() {
        let t = trace("100 1 2 1\na 0 8\nf 0\n");
        let report = replay(&t, &ReplayOptions::default()).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["ops"], 2);
        assert!(json.get("records").is_none());
        assert!(json.get("trace_sha256").is_none());
    }
}
