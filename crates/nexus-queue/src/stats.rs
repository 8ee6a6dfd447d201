//! Queue statistics.

use std::time::Duration;

use nexus_models::Priority;
use serde::Serialize;

/// Number of queued jobs in one priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriorityCount {
    pub priority: Priority,
    pub count: usize,
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueTotals {
    pub submitted: u64,
    pub rejected: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
}

/// Snapshot of queue occupancy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    /// Jobs waiting for a worker
    pub depth: usize,
    pub capacity: usize,
    /// Jobs currently held by workers
    pub running: usize,
    /// Queued jobs per priority, highest priority first
    pub per_priority: Vec<PriorityCount>,
    /// Age of the oldest queued job
    pub oldest_age: Option<Duration>,
    pub totals: QueueTotals,
}

impl QueueStats {
    /// Fraction of capacity in use, 0.0 to 1.0.
    pub fn fill_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        self.depth as f64 / self.capacity as f64
    }

    pub fn count_for(&self, priority: Priority) -> usize {
        self.per_priority
            .iter()
            .find(|c| c.priority == priority)
            .map(|c| c.count)
            .unwrap_or(0)
    }
}
