//! Imputation, scaling and label encoding.

use crate::dataset::Dataset;
use dagline_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Maps class names to dense indices; classes are kept sorted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    /// Learn the sorted distinct classes of `labels`
    #[must_use]
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Self {
        let mut classes: Vec<String> = labels.iter().map(|l| l.as_ref().to_string()).collect();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    /// Index of a class
    #[must_use]
    pub fn encode(&self, label: &str) -> Option<usize> {
        self.classes.binary_search_by(|c| c.as_str().cmp(label)).ok()
    }

    /// Class at an index
    #[must_use]
    pub fn decode(&self, index: usize) -> Option<&str> {
        self.classes.get(index).map(String::as_str)
    }

    /// All classes in index order
    #[must_use]
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Number of classes
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether no class was seen
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Per-column statistics learned during preprocessing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    /// Mean of the present values, used for imputation
    pub mean: f64,
    /// Minimum after imputation
    pub min: f64,
    /// Maximum after imputation
    pub max: f64,
    /// Number of cells that were imputed
    pub imputed: usize,
}

impl ColumnStats {
    /// Impute and scale one raw cell into `[0, 1]`
    #[must_use]
    pub fn transform(&self, value: Option<f64>) -> f64 {
        let value = value.unwrap_or(self.mean);
        let range = self.max - self.min;
        if range > 0.0 {
            ((value - self.min) / range).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Dense, scaled features with encoded labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedDataset {
    /// Feature column names
    pub feature_names: Vec<String>,
    /// Scaled feature rows
    pub features: Vec<Vec<f64>>,
    /// Encoded labels, one per row
    pub labels: Vec<usize>,
    /// Encoder used for `labels`
    pub encoder: LabelEncoder,
    /// Statistics per feature column
    pub stats: Vec<ColumnStats>,
}

impl PreparedDataset {
    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether there are no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Turn a raw dataset into model-ready form.
///
/// Missing cells get their column mean, every column is min-max scaled into
/// `[0, 1]` (a constant column becomes all zeros) and labels are encoded
/// against the sorted distinct classes. Row count is preserved.
///
/// # Errors
///
/// Returns `Schema` if the dataset is empty, a column has no values at all,
/// a column's range overflows or fewer than two classes are present
pub fn preprocess(dataset: &Dataset) -> CoreResult<PreparedDataset> {
    if dataset.is_empty() {
        return Err(schema("dataset has no rows".to_string()));
    }

    let stats = dataset
        .feature_names()
        .iter()
        .enumerate()
        .map(|(col, name)| column_stats(dataset, col, name))
        .collect::<CoreResult<Vec<_>>>()?;

    let features: Vec<Vec<f64>> = dataset
        .rows()
        .iter()
        .map(|row| row.iter().zip(&stats).map(|(cell, s)| s.transform(*cell)).collect())
        .collect();

    let encoder = LabelEncoder::fit(dataset.labels());
    if encoder.len() < 2 {
        return Err(schema(format!(
            "need at least 2 classes in {}, found {}",
            dataset.label_name(),
            encoder.len()
        )));
    }
    let labels = dataset
        .labels()
        .iter()
        .map(|l| {
            encoder
                .encode(l)
                .ok_or_else(|| schema(format!("label {:?} missing from encoder", l)))
        })
        .collect::<CoreResult<Vec<_>>>()?;

    debug!(
        rows = dataset.len(),
        classes = encoder.len(),
        imputed = stats.iter().map(|s| s.imputed).sum::<usize>(),
        "dataset preprocessed"
    );

    Ok(PreparedDataset {
        feature_names: dataset.feature_names().to_vec(),
        features,
        labels,
        encoder,
        stats,
    })
}

fn column_stats(dataset: &Dataset, col: usize, name: &str) -> CoreResult<ColumnStats> {
    let present: Vec<f64> = dataset.rows().iter().filter_map(|row| row[col]).collect();
    if present.is_empty() {
        return Err(schema(format!("column {} has no values", name)));
    }

    let mean = present.iter().sum::<f64>() / present.len() as f64;
    let imputed = dataset.len() - present.len();
    // The mean lies within the observed range, so imputing cannot widen it
    let (min, max) = present
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !(max - min).is_finite() || !mean.is_finite() {
        return Err(schema(format!("column {} spans a range too wide to scale", name)));
    }

    Ok(ColumnStats {
        mean,
        min,
        max,
        imputed,
    })
}

fn schema(reason: String) -> CoreError {
    CoreError::Schema { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(rows: Vec<Vec<Option<f64>>>, labels: &[&str]) -> Dataset {
        let width = rows.first().map_or(0, Vec::len);
        let names = (0..width).map(|i| format!("f{}", i)).collect();
        Dataset::new(names, rows, labels.iter().map(|l| l.to_string()).collect(), "y").unwrap()
    }

    #[test]
    fn test_label_encoder_sorted() {
        let encoder = LabelEncoder::fit(&["virginica", "setosa", "versicolor", "setosa"]);
        assert_eq!(encoder.classes(), ["setosa", "versicolor", "virginica"]);
        assert_eq!(encoder.encode("versicolor"), Some(1));
        assert_eq!(encoder.decode(2), Some("virginica"));
        assert_eq!(encoder.encode("unknown"), None);
    }

    #[test]
    fn test_impute_and_scale() {
        let ds = dataset(
            vec![
                vec![Some(0.0), Some(5.0)],
                vec![None, Some(5.0)],
                vec![Some(10.0), Some(5.0)],
            ],
            &["b", "a", "b"],
        );
        let prepared = preprocess(&ds).unwrap();

        assert_eq!(prepared.len(), 3);
        // Missing cell gets the column mean (5.0), scaled to 0.5
        assert_eq!(prepared.features[1][0], 0.5);
        assert_eq!(prepared.features[2][0], 1.0);
        // Constant column collapses to zero
        assert!(prepared.features.iter().all(|row| row[1] == 0.0));
        assert_eq!(prepared.labels, vec![1, 0, 1]);
        assert_eq!(prepared.stats[0].imputed, 1);
    }

    #[test]
    fn test_all_missing_column() {
        let ds = dataset(vec![vec![None], vec![None]], &["a", "b"]);
        let err = preprocess(&ds).unwrap_err();
        assert!(err.to_string().contains("f0 has no values"));
    }

    #[test]
    fn test_single_class() {
        let ds = dataset(vec![vec![Some(1.0)], vec![Some(2.0)]], &["a", "a"]);
        assert!(matches!(preprocess(&ds), Err(CoreError::Schema { .. })));
    }

    #[test]
    fn test_overflowing_range_rejected() {
        let ds = dataset(vec![vec![Some(1e308)], vec![Some(-1e308)]], &["a", "b"]);
        let err = preprocess(&ds).unwrap_err();
        assert!(err.to_string().contains("too wide"), "{}", err);
    }

    #[test]
    fn test_values_in_unit_range() {
        let ds = Dataset::synthetic(60, 3, crate::seed::Seed::new(3)).unwrap();
        let prepared = preprocess(&ds).unwrap();
        assert_eq!(prepared.len(), 60);
        assert!(prepared.features.iter().flatten().all(|v| (0.0..=1.0).contains(v)));
    }
}
