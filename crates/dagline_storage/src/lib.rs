//! DAGLINE Storage
//!
//! Model artifacts on disk. Each artifact is a JSON envelope carrying a
//! BLAKE3 checksum of its payload; writes go through a temporary file in the
//! target directory and are renamed into place, so a reader never sees a
//! partial artifact.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod artifact;

pub use artifact::{ArtifactError, ArtifactInfo, ArtifactStore, FORMAT_VERSION};
