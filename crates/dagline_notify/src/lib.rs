//! DAGLINE Notify
//!
//! Side effects that leave the pipeline: email notifications (as a task and
//! as a post-task hook) and fire-and-forget triggers of other pipelines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod email;
pub mod hook;
pub mod tasks;
pub mod trigger;

pub use email::{
    EmailMessage, LogNotifier, Notifier, NotifyError, RecordingNotifier, SmtpConfig, SmtpNotifier,
};
pub use hook::NotificationHook;
pub use tasks::{EmailTask, TriggerTask};
pub use trigger::{
    DEFAULT_TARGET, MemoryTrigger, SpoolTrigger, TriggerRequest, TriggerSink, default_conf,
};
