//! Seed management for reproducible data handling.

use dagline_core::Hash;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Seed for every random choice a run makes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Seed(u64);

impl Seed {
    /// Create a seed from a literal value
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw value
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Derive an independent seed for a specific context
    ///
    /// The same base and context always give the same seed.
    #[must_use]
    pub fn derive(self, context: &str) -> Self {
        let mut input = Vec::with_capacity(8 + context.len());
        input.extend_from_slice(&self.0.to_le_bytes());
        input.extend_from_slice(context.as_bytes());
        Self(fold(&Hash::compute(&input)))
    }

    /// Create RNG from seed
    #[must_use]
    pub fn rng(self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.0)
    }
}

impl Default for Seed {
    fn default() -> Self {
        Self(42)
    }
}

impl From<u64> for Seed {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// First 8 bytes of a hash as a little-endian u64
fn fold(hash: &Hash) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}
