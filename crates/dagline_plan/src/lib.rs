//! DAGLINE Planner
//!
//! Declarative task graphs: named tasks, directed dependencies, per-task
//! trigger rules, and structural validation before a run starts.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dag;
pub mod trigger;
pub mod validate;

pub use dag::{Dag, Edge, PipelineMeta, TaskSpec};
pub use trigger::{TriggerDecision, TriggerRule};
pub use validate::{ValidationError, Validator};
