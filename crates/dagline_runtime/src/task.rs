//! Task trait and execution context.

use crate::xcom::XCom;
use dagline_core::{CoreError, CoreResult, LogicalTime, PipelineId, RunId, TaskId};
use std::any::Any;
use std::sync::Arc;

/// Everything a task sees while it runs
pub struct TaskContext<'a> {
    /// Pipeline being run
    pub pipeline_id: &'a PipelineId,
    /// Current run
    pub run_id: RunId,
    /// Task being executed
    pub task_id: &'a TaskId,
    /// 1-based attempt number
    pub attempt: u32,
    /// Scheduler time at start
    pub logical_time: LogicalTime,
    xcom: &'a XCom,
}

impl<'a> TaskContext<'a> {
    /// Create a new context
    #[must_use]
    pub fn new(
        pipeline_id: &'a PipelineId,
        run_id: RunId,
        task_id: &'a TaskId,
        attempt: u32,
        logical_time: LogicalTime,
        xcom: &'a XCom,
    ) -> Self {
        Self {
            pipeline_id,
            run_id,
            task_id,
            attempt,
            logical_time,
            xcom,
        }
    }

    /// Publish this task's output
    ///
    /// # Errors
    ///
    /// Returns error if the value store is unavailable
    pub fn push<T: Any + Send + Sync>(&self, value: T) -> CoreResult<()> {
        self.xcom.push(self.task_id, value)
    }

    /// Read the output of an upstream task
    ///
    /// # Errors
    ///
    /// Returns error if the upstream published nothing or a different type
    pub fn pull<T: Any + Send + Sync>(&self, from: &TaskId) -> CoreResult<Arc<T>> {
        self.xcom.pull(from)
    }
}

/// A unit of work bound to a task id in the graph
pub trait Task: Send + Sync {
    /// Run the task once
    ///
    /// # Errors
    ///
    /// Any error marks the attempt as failed
    fn execute(&self, ctx: &TaskContext<'_>) -> CoreResult<()>;
}

/// Task backed by a closure
pub struct FnTask<F> {
    f: F,
}

impl<F> FnTask<F>
where
    F: Fn(&TaskContext<'_>) -> CoreResult<()> + Send + Sync,
{
    /// Wrap a closure
    #[must_use]
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Task for FnTask<F>
where
    F: Fn(&TaskContext<'_>) -> CoreResult<()> + Send + Sync,
{
    fn execute(&self, ctx: &TaskContext<'_>) -> CoreResult<()> {
        (self.f)(ctx)
    }
}

/// Task that always fails; used to inject failures into a run
pub struct FailTask {
    reason: String,
}

impl FailTask {
    /// Create a failing task
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Task for FailTask {
    fn execute(&self, ctx: &TaskContext<'_>) -> CoreResult<()> {
        Err(CoreError::Internal {
            message: format!("{} (injected failure in {})", self.reason, ctx.task_id),
        })
    }
}
