//! Workloads shared by the allocator benchmarks.

use segalloc_harness::{Trace, TraceOp};

/// `count` allocations of `size` bytes, each freed right after use.
#[must_use]
pub fn churn(count: usize, size: usize) -> Trace {
    let ops = (0..count)
        .flat_map(|id| [TraceOp::Alloc { id, size }, TraceOp::Free { id }])
        .collect();
    trace(count, ops)
}

/// Interleaved small/large allocations, large ones freed, then slightly
/// larger requests that only fit after coalescing.
#[must_use]
pub fn binary(pairs: usize, small: usize, large: usize) -> Trace {
    let mut ops = Vec::with_capacity(pairs * 6);
    for i in 0..pairs {
        ops.push(TraceOp::Alloc {
            id: 2 * i,
            size: small,
        });
        ops.push(TraceOp::Alloc {
            id: 2 * i + 1,
            size: large,
        });
    }
    for i in 0..pairs {
        ops.push(TraceOp::Free { id: 2 * i + 1 });
    }
    for i in 0..pairs {
        ops.push(TraceOp::Alloc {
            id: 2 * pairs + i,
            size: large + small,
        });
    }
    for id in 0..pairs {
        ops.push(TraceOp::Free { id: 2 * id });
        ops.push(TraceOp::Free { id: 2 * pairs + id });
    }
    trace(3 * pairs, ops)
}

/// One block grown by `step` bytes `steps` times with a fence behind it.
#[must_use]
pub fn realloc_growth(steps: usize, step: usize) -> Trace {
    let mut ops = vec![
        TraceOp::Alloc { id: 0, size: step },
        TraceOp::Alloc { id: 1, size: 8 },
    ];
    ops.extend((2..=steps + 1).map(|k| TraceOp::Realloc {
        id: 0,
        size: k * step,
    }));
    ops.push(TraceOp::Free { id: 0 });
    ops.push(TraceOp::Free { id: 1 });
    trace(2, ops)
}

fn trace(num_ids: usize, ops: Vec<TraceOp>) -> Trace {
    Trace {
        suggested_heap_size: 0,
        num_ids,
        num_ops: ops.len(),
        weight: 1,
        ops,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segalloc_harness::{ReplayOptions, replay};

    #[test]
    fn workloads_replay_cleanly() {
        let options = ReplayOptions {
            check_each_op: true,
            ..ReplayOptions::default()
        };
        for trace in [churn(50, 64), binary(20, 64, 448), realloc_growth(30, 40)] {
            let report = replay(&trace, &options).unwrap();
            assert_eq!(report.ops, trace.num_ops);
        }
    }
}
