//! Seeded train/test split.

use crate::preprocess::PreparedDataset;
use crate::seed::Seed;
use dagline_core::{CoreError, CoreResult};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Split parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Share of rows held out for testing, in `(0, 1)`
    pub test_fraction: f64,
    /// Shuffle seed
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
        }
    }
}

impl SplitConfig {
    /// Check the fraction
    ///
    /// # Errors
    ///
    /// Returns `Validation` if `test_fraction` is not strictly between 0 and 1
    pub fn validate(&self) -> CoreResult<()> {
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(CoreError::Validation {
                field: "test_fraction".to_string(),
                reason: format!("{} is not in (0, 1)", self.test_fraction),
            });
        }
        Ok(())
    }
}

/// Rows held out for `n` rows at `fraction`, keeping both sides non-empty
#[must_use]
pub fn test_rows(n: usize, fraction: f64) -> usize {
    if n < 2 {
        return 0;
    }
    let wanted = (n as f64 * fraction).round() as usize;
    wanted.clamp(1, n - 1)
}

/// Train and test partitions of a prepared dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    /// Training features
    pub x_train: Vec<Vec<f64>>,
    /// Test features
    pub x_test: Vec<Vec<f64>>,
    /// Training labels
    pub y_train: Vec<usize>,
    /// Test labels
    pub y_test: Vec<usize>,
    /// Source row of each test sample
    pub test_indices: Vec<usize>,
}

impl Split {
    /// Number of training rows
    #[must_use]
    pub fn train_len(&self) -> usize {
        self.x_train.len()
    }

    /// Number of test rows
    #[must_use]
    pub fn test_len(&self) -> usize {
        self.x_test.len()
    }
}

/// Shuffle row indices with the configured seed and cut off the test rows.
///
/// The same input and config always give the same split.
///
/// # Errors
///
/// Returns error if the config is invalid or there are fewer than two rows
pub fn split(data: &PreparedDataset, config: &SplitConfig) -> CoreResult<Split> {
    config.validate()?;
    let n = data.len();
    if n < 2 {
        return Err(CoreError::Schema {
            reason: format!("cannot split {} rows", n),
        });
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut Seed::new(config.seed).rng());

    let (test_idx, train_idx) = indices.split_at(test_rows(n, config.test_fraction));
    let pick_x = |idx: &[usize]| -> Vec<Vec<f64>> {
        idx.iter().map(|&i| data.features[i].clone()).collect()
    };
    let pick_y = |idx: &[usize]| -> Vec<usize> { idx.iter().map(|&i| data.labels[i]).collect() };

    let split = Split {
        x_train: pick_x(train_idx),
        x_test: pick_x(test_idx),
        y_train: pick_y(train_idx),
        y_test: pick_y(test_idx),
        test_indices: test_idx.to_vec(),
    };

    debug!(
        train = split.train_len(),
        test = split.test_len(),
        seed = config.seed,
        "dataset split"
    );
    Ok(split)
}
