//! Post-task hook that emails the outcome of a task.

use crate::email::{EmailMessage, Notifier};
use dagline_core::{CoreResult, PipelineId, TaskId};
use dagline_runtime::{TaskHook, TaskOutcome};
use std::sync::Arc;
use tracing::debug;

/// Sends "Task Succeeded" / "Task Failed" mails for the task it is attached to
pub struct NotificationHook {
    notifier: Arc<dyn Notifier>,
    pipeline: PipelineId,
    recipient: String,
    on_success: bool,
    on_failure: bool,
}

impl NotificationHook {
    /// Notify `recipient` of both successes and failures
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>, pipeline: PipelineId, recipient: impl Into<String>) -> Self {
        Self {
            notifier,
            pipeline,
            recipient: recipient.into(),
            on_success: true,
            on_failure: true,
        }
    }

    /// Choose which outcomes produce a mail
    #[must_use]
    pub fn with_outcomes(mut self, on_success: bool, on_failure: bool) -> Self {
        self.on_success = on_success;
        self.on_failure = on_failure;
        self
    }

    /// The message sent for `outcome` of `task_id`
    #[must_use]
    pub fn message_for(&self, outcome: &TaskOutcome, task_id: &TaskId) -> EmailMessage {
        let (status, body) = match outcome {
            TaskOutcome::Success => ("Task Succeeded", "<p>Task succeeded.</p>".to_string()),
            TaskOutcome::Failure { error } => (
                "Task Failed",
                format!("<p>Task failed.</p>\n<p>{}</p>", escape_html(error)),
            ),
        };
        EmailMessage::new(
            self.recipient.clone(),
            format!("[{}] {}: {}", self.pipeline, task_id, status),
            body,
        )
    }
}

impl TaskHook for NotificationHook {
    fn name(&self) -> &str {
        "email"
    }

    fn on_outcome(&self, outcome: &TaskOutcome, task_id: &TaskId) -> CoreResult<()> {
        let wanted = if outcome.is_success() {
            self.on_success
        } else {
            self.on_failure
        };
        if !wanted {
            debug!(task = %task_id, "notification not requested for this outcome");
            return Ok(());
        }

        let message = self.message_for(outcome, task_id);
        self.notifier.send(&message)?;
        debug!(task = %task_id, notifier = self.notifier.name(), "outcome notification sent");
        Ok(())
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::RecordingNotifier;
    use dagline_core::CoreError;

    fn hook(notifier: Arc<RecordingNotifier>) -> NotificationHook {
        NotificationHook::new(
            notifier,
            PipelineId::new("Airflow_project").unwrap(),
            "owner@example.com",
        )
    }

    #[test]
    fn test_success_message() {
        let notifier = RecordingNotifier::new();
        let task = TaskId::new("send_email").unwrap();
        hook(notifier.clone()).on_outcome(&TaskOutcome::Success, &task).unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "[Airflow_project] send_email: Task Succeeded");
        assert_eq!(sent[0].html_body, "<p>Task succeeded.</p>");
        assert_eq!(sent[0].to, "owner@example.com");
    }

    #[test]
    fn test_failure_message_escapes_error() {
        let notifier = RecordingNotifier::new();
        let outcome = TaskOutcome::Failure {
            error: "bad <input>".to_string(),
        };
        let message = hook(notifier).message_for(&outcome, &TaskId::new("t").unwrap());

        assert!(message.subject.ends_with("t: Task Failed"));
        assert!(message.html_body.starts_with("<p>Task failed.</p>"));
        assert!(message.html_body.contains("bad &lt;input&gt;"));
    }

    #[test]
    fn test_send_failure_is_notification_error() {
        let notifier = RecordingNotifier::new();
        notifier.set_failing(true);
        let err = hook(notifier)
            .on_outcome(&TaskOutcome::Success, &TaskId::new("t").unwrap())
            .unwrap_err();
        assert!(matches!(err, CoreError::Notification { .. }));
    }

    #[test]
    fn test_outcome_filter() {
        let notifier = RecordingNotifier::new();
        let hook = hook(notifier.clone()).with_outcomes(false, true);
        hook.on_outcome(&TaskOutcome::Success, &TaskId::new("t").unwrap()).unwrap();
        assert!(notifier.sent().is_empty());
    }
}
