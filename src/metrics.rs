//! Timing accumulators for the matrix-vector product and the implicit solve.
//!
//! The accumulators live for the whole simulation run and are reset only at
//! initialization. They are passed by reference into the solver rather than
//! kept as ambient global state, so the caller controls their lifetime and
//! tests can assert on them.

use std::time::Duration;

use crate::comm::Collective;

/// Elapsed-time and invocation counters for the expensive kernels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Metrics {
    /// Seconds spent applying the friction operator to state vectors.
    pub apply_seconds: f64,
    /// Seconds spent in whole implicit solves, operator applications included.
    pub solve_seconds: f64,
    /// Number of operator applications.
    pub applies: u64,
    /// Number of implicit solves.
    pub solves: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn record_apply(&mut self, elapsed: Duration) {
        self.apply_seconds += elapsed.as_secs_f64();
        self.applies += 1;
    }

    pub(crate) fn record_solve(&mut self, elapsed: Duration) {
        self.solve_seconds += elapsed.as_secs_f64();
        self.solves += 1;
    }

    /// Sums the counters over all partitions.
    pub fn aggregate<C: Collective>(&self, comm: &C) -> Metrics {
        Metrics {
            apply_seconds: comm.sum_f64(self.apply_seconds),
            solve_seconds: comm.sum_f64(self.solve_seconds),
            applies: comm.sum_u64(self.applies),
            solves: comm.sum_u64(self.solves),
        }
    }

    /// Logs the per-partition summary, the end-of-run counterpart of the
    /// per-step debug output.
    pub fn log_summary(&self, rank: usize) {
        log::info!(
            "partition {rank}: time(mvm) = {:.6} s over {} applications",
            self.apply_seconds,
            self.applies
        );
        log::info!(
            "partition {rank}: time(inv) = {:.6} s over {} solves",
            self.solve_seconds,
            self.solves
        );
    }
}
