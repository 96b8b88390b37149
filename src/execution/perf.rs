//! Timing records kept per node and per graph.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Accumulated run times, in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Perf {
    /// Number of recorded runs.
    pub num: u64,
    /// Duration of the last run.
    pub tmp: u64,
    pub sum: u64,
    pub avg: u64,
    pub min: u64,
    pub max: u64,
}

impl Perf {
    /// Add one run.
    pub fn record(&mut self, elapsed: Duration) {
        let ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.tmp = ns;
        self.sum = self.sum.saturating_add(ns);
        self.min = if self.num == 0 { ns } else { self.min.min(ns) };
        self.max = self.max.max(ns);
        self.num += 1;
        self.avg = self.sum / self.num;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
