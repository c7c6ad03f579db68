//! Artifact store.

use dagline_core::{CoreError, CoreResult, Hash, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Envelope format written by this version
pub const FORMAT_VERSION: u32 = 1;

/// Artifact-specific failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArtifactError {
    /// Name is empty or would escape the store directory
    #[error("invalid artifact name {name:?}")]
    InvalidName {
        /// Offending name
        name: String,
    },
    /// Envelope written by an unknown format version
    #[error("unsupported artifact format version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// Version in the file
        found: u32,
        /// Version this build reads
        supported: u32,
    },
    /// Envelope name does not match the file it was read from
    #[error("artifact file {file} holds artifact {found}")]
    NameMismatch {
        /// File name
        file: String,
        /// Name recorded in the envelope
        found: String,
    },
}

impl From<ArtifactError> for CoreError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::InvalidName { .. } => CoreError::Validation {
                field: "artifact_name".to_string(),
                reason: err.to_string(),
            },
            _ => CoreError::InvalidEncoding {
                reason: err.to_string(),
            },
        }
    }
}

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    format_version: u32,
    name: &'a str,
    checksum: String,
    created_at: Timestamp,
    model: &'a RawValue,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    format_version: u32,
    name: String,
    checksum: String,
    created_at: Timestamp,
    model: Box<RawValue>,
}

/// Metadata of a stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactInfo {
    /// Artifact name (file name in the store)
    pub name: String,
    /// Full path
    pub path: PathBuf,
    /// BLAKE3 of the model payload
    pub checksum: Hash,
    /// When the artifact was written
    pub created_at: Timestamp,
    /// File size in bytes
    pub size_bytes: u64,
}

/// Directory of named model artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at `dir`; the directory is created on first save
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path an artifact is (or would be) stored at
    #[must_use]
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Whether an artifact file exists
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        validate_name(name).is_ok() && self.path(name).is_file()
    }

    /// Serialize `model` and atomically write it under `name`
    ///
    /// Nothing is left at the target path if any step fails.
    ///
    /// # Errors
    ///
    /// Returns error if the name is invalid, the model cannot be serialized
    /// or the file cannot be written
    pub fn save<T: Serialize>(&self, name: &str, model: &T) -> CoreResult<ArtifactInfo> {
        validate_name(name)?;

        let payload = serde_json::to_string(model)?;
        let checksum = Hash::compute(payload.as_bytes());
        let raw = RawValue::from_string(payload)?;
        let created_at = Timestamp::now();

        let envelope = EnvelopeOut {
            format_version: FORMAT_VERSION,
            name,
            checksum: checksum.to_hex(),
            created_at,
            model: &raw,
        };
        let bytes = serde_json::to_vec_pretty(&envelope)?;

        fs::create_dir_all(&self.dir).map_err(|e| CoreError::io("create artifact directory", &e))?;
        let path = self.path(name);

        let mut tmp = NamedTempFile::new_in(&self.dir)
            .map_err(|e| CoreError::io("create temporary artifact", &e))?;
        tmp.write_all(&bytes)
            .map_err(|e| CoreError::io("write artifact", &e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| CoreError::io("sync artifact", &e))?;
        tmp.persist(&path)
            .map_err(|e| CoreError::io("persist artifact", &e.error))?;

        info!(path = %path.display(), checksum = %checksum, bytes = bytes.len(), "artifact saved");

        Ok(ArtifactInfo {
            name: name.to_string(),
            path,
            checksum,
            created_at,
            size_bytes: bytes.len() as u64,
        })
    }

    /// Read and verify the artifact `name`
    ///
    /// # Errors
    ///
    /// Returns `ArtifactNotFound` if the file is missing, `HashMismatch` if
    /// the payload was altered and `InvalidEncoding` if it cannot be parsed
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> CoreResult<T> {
        let (envelope, _) = self.read_envelope(name)?;
        let model = serde_json::from_str(envelope.model.get())?;
        debug!(name, "artifact loaded");
        Ok(model)
    }

    /// Read and verify the artifact metadata without decoding the model
    ///
    /// # Errors
    ///
    /// Same as [`ArtifactStore::load`]
    pub fn info(&self, name: &str) -> CoreResult<ArtifactInfo> {
        let (envelope, size_bytes) = self.read_envelope(name)?;
        let checksum = Hash::from_hex(&envelope.checksum).map_err(|e| CoreError::InvalidEncoding {
            reason: format!("artifact checksum: {}", e),
        })?;

        Ok(ArtifactInfo {
            name: envelope.name,
            path: self.path(name),
            checksum,
            created_at: envelope.created_at,
            size_bytes,
        })
    }

    fn read_envelope(&self, name: &str) -> CoreResult<(EnvelopeIn, u64)> {
        validate_name(name)?;
        let path = self.path(name);

        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => CoreError::ArtifactNotFound {
                path: path.display().to_string(),
            },
            _ => CoreError::io("read artifact", &e),
        })?;

        let envelope: EnvelopeIn = serde_json::from_slice(&bytes)?;
        if envelope.format_version != FORMAT_VERSION {
            return Err(ArtifactError::UnsupportedVersion {
                found: envelope.format_version,
                supported: FORMAT_VERSION,
            }
            .into());
        }
        if envelope.name != name {
            return Err(ArtifactError::NameMismatch {
                file: name.to_string(),
                found: envelope.name,
            }
            .into());
        }

        let actual = Hash::compute(envelope.model.get().as_bytes());
        if actual.to_hex() != envelope.checksum {
            return Err(CoreError::HashMismatch {
                expected: envelope.checksum,
                actual: actual.to_hex(),
            });
        }

        Ok((envelope, bytes.len() as u64))
    }
}

fn validate_name(name: &str) -> Result<(), ArtifactError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.starts_with('.');
    if bad {
        return Err(ArtifactError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}
