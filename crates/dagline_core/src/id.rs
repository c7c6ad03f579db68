//! Identifiers for DAGLINE entities.
//!
//! Runs are identified by random UUIDs. Pipelines and tasks carry
//! human-chosen names, validated once at construction.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of a pipeline or task name
pub const MAX_NAME_LEN: usize = 250;

fn validate_name(kind: &str, name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::InvalidId {
            reason: format!("{} name is empty", kind),
        });
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::InvalidId {
            reason: format!("{} name longer than {} characters", kind, MAX_NAME_LEN),
        });
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(CoreError::InvalidId {
            reason: format!("{} name {:?} contains invalid character {:?}", kind, name, c),
        });
    }
    Ok(())
}

/// Run identifier - identifies a single pipeline execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random RunId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from UUID bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run_{}", self.0)
    }
}

/// Task identifier - the unique name of a task inside one pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Create a validated task id
    ///
    /// # Errors
    ///
    /// Returns error if the name is empty, too long, or contains characters
    /// other than ASCII alphanumerics, `_`, `-` and `.`
    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        validate_name("task", &name)?;
        Ok(Self(name))
    }

    /// Get the name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TaskId {
    type Error = CoreError;

    fn try_from(value: String) -> CoreResult<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TaskId {
    type Error = CoreError;

    fn try_from(value: &str) -> CoreResult<Self> {
        Self::new(value)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

/// Pipeline identifier - the name a pipeline is registered and triggered under
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PipelineId(String);

impl PipelineId {
    /// Create a validated pipeline id
    ///
    /// # Errors
    ///
    /// Returns error under the same rules as [`TaskId::new`]
    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        validate_name("pipeline", &name)?;
        Ok(Self(name))
    }

    /// Get the name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PipelineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PipelineId {
    type Error = CoreError;

    fn try_from(value: String) -> CoreResult<Self> {
        Self::new(value)
    }
}

impl From<PipelineId> for String {
    fn from(id: PipelineId) -> Self {
        id.0
    }
}
