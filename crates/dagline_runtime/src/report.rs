//! Per-run records handed back to the caller.

use crate::monitor::Metrics;
use dagline_core::{CoreResult, PipelineId, RunId, RunStatus, TaskId, TaskState, Timestamp};
use serde::{Deserialize, Serialize};

/// What happened to one task in one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task
    pub task_id: TaskId,
    /// Final state
    pub state: TaskState,
    /// Attempts made (0 if never started)
    pub attempts: u32,
    /// Error of the last failed attempt
    pub error: Option<String>,
    /// Errors raised by hooks; they do not affect `state`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hook_errors: Vec<String>,
    /// Start of the first attempt
    pub started_at: Option<Timestamp>,
    /// End of the last attempt
    pub finished_at: Option<Timestamp>,
}

impl TaskRecord {
    /// Record for a task that has not started
    #[must_use]
    pub fn pending(task_id: TaskId) -> Self {
        Self {
            task_id,
            state: TaskState::None,
            attempts: 0,
            error: None,
            hook_errors: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Wall-clock duration in milliseconds, if the task ran
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        match (&self.started_at, &self.finished_at) {
            (Some(start), Some(end)) => Some(end.millis_since(start)),
            _ => None,
        }
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Pipeline
    pub pipeline_id: PipelineId,
    /// Run
    pub run_id: RunId,
    /// Overall outcome
    pub status: RunStatus,
    /// Run start
    pub started_at: Timestamp,
    /// Run end
    pub finished_at: Timestamp,
    /// Task records in topological order
    pub tasks: Vec<TaskRecord>,
    /// Counters
    pub metrics: Metrics,
}

impl RunReport {
    /// Record of a task
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| &t.task_id == id)
    }

    /// Final state of a task
    #[must_use]
    pub fn state_of(&self, id: &TaskId) -> Option<TaskState> {
        self.task(id).map(|t| t.state)
    }

    /// Whether every task succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// Pretty JSON rendering
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json_pretty(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
