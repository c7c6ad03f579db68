//! DAGLINE CLI library
//!
//! Configuration and wiring of the training pipeline, shared by the
//! `dagline` binary and the integration tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod pipeline;

pub use config::{NotifyMode, Overrides, PipelineConfig};
pub use pipeline::{Pipeline, build_dag, notifier_from_config, task_ids, unlock};
