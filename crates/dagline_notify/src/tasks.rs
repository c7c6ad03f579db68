//! Pipeline tasks for sending mail and triggering other pipelines.

use crate::email::{EmailMessage, Notifier};
use crate::trigger::{TriggerRequest, TriggerSink};
use dagline_core::{CoreResult, PipelineId};
use dagline_runtime::{Task, TaskContext};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

/// Sends a fixed message; fails if delivery fails
pub struct EmailTask {
    notifier: Arc<dyn Notifier>,
    message: EmailMessage,
}

impl EmailTask {
    /// Create the task
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>, message: EmailMessage) -> Self {
        Self { notifier, message }
    }

    /// The standard notification for `pipeline`
    #[must_use]
    pub fn notification(pipeline: &PipelineId, recipient: impl Into<String>) -> EmailMessage {
        EmailMessage::new(
            recipient,
            format!("Notification from {}", pipeline),
            format!("<p>This is a notification email sent from {}.</p>", pipeline),
        )
    }
}

impl Task for EmailTask {
    fn execute(&self, ctx: &TaskContext<'_>) -> CoreResult<()> {
        self.notifier.send(&self.message)?;
        info!(task = %ctx.task_id, to = %self.message.to, notifier = self.notifier.name(), "notification sent");
        ctx.push(self.message.clone())
    }
}

/// Asks another pipeline to start, then returns without waiting
///
/// Publishes the [`TriggerRequest`] it handed off.
pub struct TriggerTask {
    target: PipelineId,
    conf: Map<String, Value>,
    sink: Arc<dyn TriggerSink>,
}

impl TriggerTask {
    /// Create the task
    #[must_use]
    pub fn new(target: PipelineId, conf: Map<String, Value>, sink: Arc<dyn TriggerSink>) -> Self {
        Self { target, conf, sink }
    }
}

impl Task for TriggerTask {
    fn execute(&self, ctx: &TaskContext<'_>) -> CoreResult<()> {
        let request = TriggerRequest::new(
            self.target.clone(),
            self.conf.clone(),
            ctx.pipeline_id.clone(),
            ctx.run_id,
        );
        self.sink.fire(&request)?;
        info!(
            task = %ctx.task_id,
            target_pipeline = %request.target_pipeline,
            target_run = %request.run_id,
            sink = self.sink.name(),
            "downstream pipeline triggered"
        );
        ctx.push(request)
    }
}
