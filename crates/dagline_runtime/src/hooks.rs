//! Post-task hooks.
//!
//! A hook is registered per task and is called once the task reaches a
//! terminal state after executing. Hook errors are reported back to the
//! engine, which logs them; they never change the task's state.

use dagline_core::{CoreResult, TaskId};
use std::sync::{Arc, Mutex};

/// What happened to a task that executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task succeeded
    Success,
    /// The task failed on its last attempt
    Failure {
        /// Rendered error of the last attempt
        error: String,
    },
}

impl TaskOutcome {
    /// Whether this is a success
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Callback invoked with `(outcome, task_id)` after a task finishes
pub trait TaskHook: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// React to the outcome
    ///
    /// # Errors
    ///
    /// Errors are logged by the engine and otherwise ignored
    fn on_outcome(&self, outcome: &TaskOutcome, task_id: &TaskId) -> CoreResult<()>;
}

/// Hook that remembers every call; useful in tests and dry runs
#[derive(Default)]
pub struct RecordingHook {
    calls: Mutex<Vec<(TaskOutcome, TaskId)>>,
}

impl RecordingHook {
    /// Create a shareable recorder
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Calls seen so far
    #[must_use]
    pub fn calls(&self) -> Vec<(TaskOutcome, TaskId)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl TaskHook for RecordingHook {
    fn name(&self) -> &str {
        "recording"
    }

    fn on_outcome(&self, outcome: &TaskOutcome, task_id: &TaskId) -> CoreResult<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((outcome.clone(), task_id.clone()));
        }
        Ok(())
    }
}
