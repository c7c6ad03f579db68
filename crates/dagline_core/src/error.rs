//! Core error types for DAGLINE.
//!
//! The first five variants mirror the pipeline's failure taxonomy:
//! data access, schema, fitting, missing artifact and notification delivery.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The data source could not be read
    DataAccess { path: String, reason: String },

    /// Input does not have the expected shape or contents
    Schema { reason: String },

    /// Model fitting failed
    Fit { reason: String },

    /// No model artifact at the given path
    ArtifactNotFound { path: String },

    /// A notification could not be delivered
    Notification { reason: String },

    /// Invalid encoding
    InvalidEncoding { reason: String },

    /// Hash mismatch
    HashMismatch { expected: String, actual: String },

    /// Invalid ID format
    InvalidId { reason: String },

    /// A value pulled from the inter-task store has a different type
    TypeMismatch { key: String, expected: String },

    /// Validation error
    Validation { field: String, reason: String },

    /// Not found
    NotFound { kind: String, id: String },

    /// Already exists
    AlreadyExists { kind: String, id: String },

    /// Filesystem error outside the data source
    Io { operation: String, reason: String },

    /// Internal error (for unexpected errors)
    Internal {
        /// Error message
        message: String,
    },
}

impl CoreError {
    /// Wrap an I/O error with the operation that produced it
    #[must_use]
    pub fn io(operation: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            reason: err.to_string(),
        }
    }

    /// Short machine-friendly name of the error category
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::DataAccess { .. } => "data_access",
            Self::Schema { .. } => "schema",
            Self::Fit { .. } => "fit",
            Self::ArtifactNotFound { .. } => "artifact_not_found",
            Self::Notification { .. } => "notification",
            Self::InvalidEncoding { .. } | Self::HashMismatch { .. } => "encoding",
            Self::InvalidId { .. } | Self::Validation { .. } => "validation",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Io { .. } => "io",
            Self::Internal { .. } => "internal",
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataAccess { path, reason } => {
                write!(f, "Cannot read data source {}: {}", path, reason)
            }
            Self::Schema { reason } => write!(f, "Schema error: {}", reason),
            Self::Fit { reason } => write!(f, "Model fitting failed: {}", reason),
            Self::ArtifactNotFound { path } => write!(f, "Model artifact not found: {}", path),
            Self::Notification { reason } => write!(f, "Notification failed: {}", reason),
            Self::InvalidEncoding { reason } => write!(f, "Invalid encoding: {}", reason),
            Self::HashMismatch { expected, actual } => {
                write!(f, "Hash mismatch: expected {}, got {}", expected, actual)
            }
            Self::InvalidId { reason } => write!(f, "Invalid ID: {}", reason),
            Self::TypeMismatch { key, expected } => {
                write!(f, "Value for {} is not of type {}", key, expected)
            }
            Self::Validation { field, reason } => {
                write!(f, "Validation failed for {}: {}", field, reason)
            }
            Self::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
            Self::AlreadyExists { kind, id } => write!(f, "{} already exists: {}", kind, id),
            Self::Io { operation, reason } => write!(f, "IO error during {}: {}", operation, reason),
            Self::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidEncoding {
            reason: err.to_string(),
        }
    }
}
