//! Consecutive-failure tracking per backend node.
//!
//! Used purely to pick a log severity: a single transient miss is noise,
//! a miss that keeps happening is worth a warning.

use std::collections::HashMap;

use crate::types::NodeIndex;

/// Default number of consecutive failures before a streak counts as sustained.
pub const DEFAULT_SUSTAINED_THRESHOLD: u32 = 3;

/// Consecutive failure counts keyed by node index.
#[derive(Debug)]
pub struct FailureStreaks {
    counts: HashMap<NodeIndex, u32>,
    threshold: u32,
}

impl FailureStreaks {
    pub fn new(threshold: u32) -> Self {
        Self {
            counts: HashMap::new(),
            threshold: threshold.max(1),
        }
    }

    /// Record a failure and return the new streak length.
    pub fn record_failure(&mut self, index: NodeIndex) -> u32 {
        let count = self.counts.entry(index).or_insert(0);
        *count += 1;
        *count
    }

    /// Record a success and return the streak length it ended (0 if none).
    pub fn record_success(&mut self, index: NodeIndex) -> u32 {
        self.counts.remove(&index).unwrap_or(0)
    }

    pub fn count(&self, index: NodeIndex) -> u32 {
        self.counts.get(&index).copied().unwrap_or(0)
    }

    /// Whether a streak of `count` failures has reached the threshold.
    pub fn is_sustained(&self, count: u32) -> bool {
        count >= self.threshold
    }

    /// True exactly once per streak, when it first reaches the threshold.
    pub fn just_became_sustained(&self, count: u32) -> bool {
        count == self.threshold
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

impl Default for FailureStreaks {
    fn default() -> Self {
        Self::new(DEFAULT_SUSTAINED_THRESHOLD)
    }
}
