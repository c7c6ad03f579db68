//! DAGLINE Core Types
//!
//! Pure types shared by every dagline crate: identifiers, task states,
//! content hashes, logical time and the core error taxonomy.
//! Nothing in this crate performs I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hash;
pub mod id;
pub mod state;
pub mod time;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use hash::{Hash, HashError};
pub use id::{PipelineId, RunId, TaskId};
pub use state::{RunStatus, TaskState};
pub use time::{LogicalTime, Timestamp};
