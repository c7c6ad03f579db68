//! BLAKE3 digests, used for artifact checksums and seed derivation.

use serde::{Deserialize, Serialize};
use std::fmt;

const DIGEST_LEN: usize = 32;

/// Digest of a byte string; shown and stored as lowercase hex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash([u8; DIGEST_LEN]);

impl Hash {
    /// Digest `data`
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Raw digest bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex form, as written into artifact envelopes
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the hex form back
    ///
    /// # Errors
    ///
    /// Returns error if `text` is not hex or does not decode to a full digest
    pub fn from_hex(text: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(text).map_err(|_| HashError::InvalidHex)?;
        let digest: [u8; DIGEST_LEN] = bytes
            .try_into()
            .map_err(|rest: Vec<u8>| HashError::InvalidLength(rest.len()))?;
        Ok(Self(digest))
    }

    /// Whether `data` digests to this value
    #[must_use]
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Failure to parse a hex digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Not hex
    InvalidHex,
    /// Decoded to the wrong number of bytes
    InvalidLength(usize),
}

impl std::error::Error for HashError {}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHex => f.write_str("digest is not valid hex"),
            Self::InvalidLength(len) => {
                write!(f, "digest has {} bytes, expected {}", len, DIGEST_LEN)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_compute_is_stable() {
        assert_eq!(Hash::compute(b"model"), Hash::compute(b"model"));
        assert_ne!(Hash::compute(b"model"), Hash::compute(b"other"));
    }

    #[test]
    fn test_hash_hex() {
        let hash = Hash::compute(b"weights");
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Hash::from_hex(&hex).unwrap(), hash);
    }

    #[test]
    fn test_hash_from_hex_errors() {
        assert_eq!(Hash::from_hex("zz"), Err(HashError::InvalidHex));
        assert_eq!(Hash::from_hex("abcd"), Err(HashError::InvalidLength(2)));
    }

    #[test]
    fn test_hash_verify() {
        let hash = Hash::compute(b"payload");
        assert!(hash.verify(b"payload"));
        assert!(!hash.verify(b"tampered"));
    }
}
