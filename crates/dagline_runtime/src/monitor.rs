//! Run metrics.

use serde::{Deserialize, Serialize};

/// Counters collected while a run executes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    /// Task attempts started
    pub attempts: u64,
    /// Attempts beyond the first
    pub retries: u64,
    /// Tasks that succeeded
    pub tasks_succeeded: u64,
    /// Tasks that failed after their last attempt
    pub tasks_failed: u64,
    /// Tasks not run because of an upstream failure
    pub tasks_upstream_failed: u64,
    /// Tasks skipped by their trigger rule
    pub tasks_skipped: u64,
    /// Hook invocations that returned an error
    pub hook_failures: u64,
    /// Logical ticks consumed by the scheduler
    pub total_ticks: u64,
}

impl Metrics {
    /// Create new metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attempt; `attempt` is 1-based
    pub fn record_attempt(&mut self, attempt: u32) {
        self.attempts += 1;
        if attempt > 1 {
            self.retries += 1;
        }
    }

    /// Record a task success
    pub fn record_success(&mut self) {
        self.tasks_succeeded += 1;
    }

    /// Record a task failure
    pub fn record_failure(&mut self) {
        self.tasks_failed += 1;
    }

    /// Record a hook failure
    pub fn record_hook_failure(&mut self) {
        self.hook_failures += 1;
    }

    /// Tasks that actually executed
    #[must_use]
    pub fn tasks_executed(&self) -> u64 {
        self.tasks_succeeded + self.tasks_failed
    }

    /// Get success rate (0.0 - 1.0) over executed tasks
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let executed = self.tasks_executed();
        if executed == 0 {
            return 1.0;
        }
        self.tasks_succeeded as f64 / executed as f64
    }
}
