//! Seeded random operation mixes.
//!
//! Ops are drawn from a deterministic xorshift generator and fed through the
//! same replay engine as trace files, so a failing seed reproduces exactly.

use segalloc_core::AllocatorConfig;
use serde::Serialize;

use crate::replay::{ReplayError, Replayer};
use crate::trace::TraceOp;

#[derive(Debug, Clone, Copy)]
pub struct StressConfig {
    pub seed: u64,
    pub ops: usize,
    /// Largest single request in bytes.
    pub max_size: usize,
    /// Number of trace ids the mix cycles through.
    pub slots: usize,
    /// Run the validator every this many ops; 0 checks only at the end.
    pub check_every: usize,
    pub config: AllocatorConfig,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED_A110C,
            ops: 10_000,
            max_size: 4096,
            slots: 256,
            check_every: 1,
            config: AllocatorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub seed: u64,
    pub ops: usize,
    pub allocs: usize,
    pub frees: usize,
    pub reallocs: usize,
    pub checks_run: usize,
    pub peak_live_bytes: usize,
    pub final_heap_size: usize,
    pub utilization: f64,
    pub extend_count: usize,
}

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        // Zero is a fixed point of xorshift.
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }

    /// Sizes skewed toward small requests: pick a power-of-two ceiling first.
    fn size(&mut self, max: usize) -> usize {
        let bits = usize::BITS - max.leading_zeros();
        let ceiling = 1usize << self.below(bits as usize).max(1);
        1 + self.below(ceiling.min(max))
    }
}

pub fn run_stress(config: &StressConfig) -> Result<StressReport, ReplayError> {
    let slots = config.slots.max(1);
    let max_size = config.max_size.max(1);
    let mut rng = XorShift64::new(config.seed);
    let mut replayer = Replayer::new(config.config, slots)?;

    for op in 0..config.ops {
        let id = rng.below(slots);
        let step = if !replayer.is_live(id) {
            TraceOp::Alloc {
                id,
                size: rng.size(max_size),
            }
        } else if rng.below(4) == 0 {
            TraceOp::Realloc {
                id,
                size: rng.size(max_size),
            }
        } else {
            TraceOp::Free { id }
        };
        replayer.apply(op, step)?;
        if config.check_every != 0 && (op + 1) % config.check_every == 0 {
            replayer.check(op)?;
        }
    }

    let report = replayer.finish(config.ops)?;
    Ok(StressReport {
        seed: config.seed,
        ops: report.ops,
        allocs: report.allocs,
        frees: report.frees,
        reallocs: report.reallocs,
        checks_run: report.checks_run,
        peak_live_bytes: report.peak_live_bytes,
        final_heap_size: report.final_heap_size,
        utilization: report.utilization,
        extend_count: report.extend_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xorshift_is_deterministic() {
        let mut a = XorShift64::new(42);
        let mut b = XorShift64::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
        let mut z = XorShift64::new(0);
        assert_ne!(z.next_u64(), 0);
    }

    #[test]
    fn sizes_stay_in_range() {
        let mut rng = XorShift64::new(7);
        for _ in 0..1000 {
            let s = rng.size(300);
            assert!((1..=300).contains(&s), "{s}");
        }
        assert_eq!(rng.size(1), 1);
    }

    #[test]
    fn short_run_checks_every_op() {
        let report = run_stress(&StressConfig {
            ops: 500,
            slots: 32,
            max_size: 512,
            check_every: 1,
            ..StressConfig::default()
        })
        .unwrap();
        assert_eq!(report.ops, 500);
        assert_eq!(report.allocs + report.frees + report.reallocs, 500);
        assert_eq!(report.checks_run, 501);
    }

    #[test]
    fn same_seed_same_report() {
        let config = StressConfig {
            ops: 300,
            check_every: 0,
            ..StressConfig::default()
        };
        let a = run_stress(&config).unwrap();
        let b = run_stress(&config).unwrap();
        assert_eq!(a.final_heap_size, b.final_heap_size);
        assert_eq!(a.peak_live_bytes, b.peak_live_bytes);
        assert_eq!(a.checks_run, 1);
    }
}
