//! Benchmark profiles and workload generators for the Keel toolkit.
//!
//! Provides deterministic allocation traces for benchmarking and
//! reproduction: the same seed always yields the same operation
//! sequence.

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// One step of an allocation trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceOp {
    /// Allocate `size` bytes at `align`.
    Alloc {
        /// Request size in bytes.
        size: usize,
        /// Request alignment (power of two).
        align: usize,
    },
    /// Release the `index`-th oldest live allocation.
    Free {
        /// Index into the live set at the time of the operation.
        index: usize,
    },
}

/// Generate a deterministic mixed alloc/free trace.
///
/// `live` tracks how many allocations the trace keeps outstanding so
/// that every `Free` index is valid when the trace is replayed in
/// order.
pub fn churn_trace(seed: u64, steps: usize, max_size: usize) -> Vec<TraceOp> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut live = 0usize;
    let mut ops = Vec::with_capacity(steps);
    for _ in 0..steps {
        if live > 0 && rng.gen_bool(0.45) {
            ops.push(TraceOp::Free {
                index: rng.gen_range(0..live),
            });
            live -= 1;
        } else {
            ops.push(TraceOp::Alloc {
                size: rng.gen_range(1..=max_size),
                align: 1 << rng.gen_range(0..7),
            });
            live += 1;
        }
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traces_are_deterministic() {
        assert_eq!(churn_trace(1, 200, 512), churn_trace(1, 200, 512));
        assert_ne!(churn_trace(1, 200, 512), churn_trace(2, 200, 512));
    }

    #[test]
    fn free_indices_are_always_valid() {
        let mut live = 0usize;
        for op in churn_trace(9, 1000, 256) {
            match op {
                TraceOp::Alloc { .. } => live += 1,
                TraceOp::Free { index } => {
                    assert!(index < live);
                    live -= 1;
                }
            }
        }
    }
}
