//! DAGLINE Runtime
//!
//! Executes a [`dagline_plan::Dag`] in-process: deterministic ready-task
//! selection, trigger-rule propagation, per-task retries, post-task hooks,
//! a typed value store for passing results between tasks and a single-run
//! lock.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod hooks;
pub mod lock;
pub mod monitor;
pub mod report;
pub mod scheduler;
pub mod shell;
pub mod task;
pub mod xcom;

pub use engine::{EngineConfig, ExecutionEngine};
pub use hooks::{RecordingHook, TaskHook, TaskOutcome};
pub use lock::RunLock;
pub use monitor::Metrics;
pub use report::{RunReport, TaskRecord};
pub use scheduler::{ScheduleDecision, Scheduler};
pub use shell::ShellTask;
pub use task::{FailTask, FnTask, Task, TaskContext};
pub use xcom::XCom;
