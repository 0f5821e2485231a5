use std::collections::{HashMap, HashSet};

use super::process::ProcessIdentity;

/// One reading of wall clock and process CPU times, all in 100ns ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuTimes {
    pub wall_clock: u64,
    pub kernel: u64,
    pub user: u64,
}

/// Per-identity CPU usage from successive kernel/user time readings.
///
/// The processor count is fixed for the estimator's lifetime. Baselines exist
/// only for identities seen in the most recent tick (see [`CpuEstimator::retain`]).
#[derive(Debug)]
pub struct CpuEstimator {
    logical_processors: u32,
    baselines: HashMap<ProcessIdentity, CpuTimes>,
}

impl CpuEstimator {
    pub fn new(logical_processors: usize) -> Self {
        CpuEstimator {
            logical_processors: logical_processors.max(1) as u32,
            baselines: HashMap::new(),
        }
    }

    pub fn logical_processors(&self) -> u32 {
        self.logical_processors
    }

    /// Percentage of the whole machine used since the previous reading, in
    /// `[0, 100]`. The first reading for an identity stores the baseline and
    /// returns 0.
    pub fn sample(&mut self, identity: &ProcessIdentity, now: CpuTimes) -> f64 {
        match self.baselines.insert(identity.clone(), now) {
            None => 0.0,
            Some(last) => usage_percent(last, now, self.logical_processors),
        }
    }

    /// Drops baselines for identities that left the matched subtree.
    pub fn retain(&mut self, seen: &HashSet<ProcessIdentity>) {
        self.baselines.retain(|identity, _| seen.contains(identity));
    }

    pub fn tracked(&self) -> usize {
        self.baselines.len()
    }
}

/// `100 * (dKernel + dUser) / dWall / processors`, clamped to `[0, 100]`.
/// A zero wall-clock delta yields 0.
pub fn usage_percent(last: CpuTimes, now: CpuTimes, logical_processors: u32) -> f64 {
    let wall = now.wall_clock.saturating_sub(last.wall_clock);
    if wall == 0 {
        return 0.0;
    }
    let busy = now.kernel.saturating_sub(last.kernel) + now.user.saturating_sub(last.user);
    let processors = f64::from(logical_processors.max(1));
    let raw = 100.0 * busy as f64 / wall as f64;
    let percent = raw.min(100.0 * processors) / processors;
    if percent.is_finite() { percent } else { 0.0 }
}
