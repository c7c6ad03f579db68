//! Tabular datasets and the sources they are loaded from.
//!
//! A [`Dataset`] keeps feature cells as `Option<f64>` so missing values
//! survive loading untouched; imputation is the preprocessor's job.

use crate::seed::Seed;
use dagline_core::{CoreError, CoreResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Cell values read as missing
const MISSING_TOKENS: [&str; 4] = ["", "NA", "NaN", "null"];

/// Class names used by [`Dataset::synthetic`]
pub const SYNTHETIC_CLASSES: [&str; 3] = ["alpha", "beta", "gamma"];

/// CSV parsing failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CsvError {
    /// Input has no header line
    #[error("missing header line")]
    MissingHeader,
    /// Header names a column twice
    #[error("duplicate column {column:?}")]
    DuplicateColumn {
        /// Column name
        column: String,
    },
    /// Label column absent from the header
    #[error("label column {column:?} not in header")]
    MissingLabelColumn {
        /// Column name
        column: String,
    },
    /// Header has only the label column
    #[error("no feature columns")]
    NoFeatures,
    /// Row width differs from the header
    #[error("line {line}: expected {expected} cells, found {found}")]
    CellCount {
        /// 1-based line number
        line: usize,
        /// Header width
        expected: usize,
        /// Row width
        found: usize,
    },
    /// Feature cell is not a finite number
    #[error("line {line}: column {column:?} has non-numeric value {value:?}")]
    BadNumber {
        /// 1-based line number
        line: usize,
        /// Column name
        column: String,
        /// Raw cell
        value: String,
    },
    /// Label cell is empty
    #[error("line {line}: empty label")]
    EmptyLabel {
        /// 1-based line number
        line: usize,
    },
    /// Header but no data rows
    #[error("no data rows")]
    NoRows,
    /// Quote inside a cell; quoted commas and escaped quotes are not supported
    #[error("line {line}: quote inside cell {cell:?}")]
    QuotedCell {
        /// 1-based line number
        line: usize,
        /// Raw cell
        cell: String,
    },
}

/// Where the raw data comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataSource {
    /// Comma-separated file with a header line
    Csv {
        /// File path
        path: PathBuf,
        /// Column holding the class label
        label_column: String,
    },
    /// Generated clusters, one per class in [`SYNTHETIC_CLASSES`]
    Synthetic {
        /// Number of rows
        rows: usize,
        /// Number of feature columns
        features: usize,
        /// Generator seed
        seed: u64,
    },
}

impl DataSource {
    /// Load the dataset
    ///
    /// # Errors
    ///
    /// Returns `DataAccess` if the source cannot be read and `Schema` if its
    /// contents are malformed
    pub fn load(&self) -> CoreResult<Dataset> {
        match self {
            Self::Csv { path, label_column } => Dataset::from_csv_path(path, label_column),
            Self::Synthetic {
                rows,
                features,
                seed,
            } => Dataset::synthetic(*rows, *features, Seed::new(*seed)),
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Csv { path, label_column } => {
                write!(f, "csv:{} (label {})", path.display(), label_column)
            }
            Self::Synthetic {
                rows,
                features,
                seed,
            } => write!(f, "synthetic:{}x{} (seed {})", rows, features, seed),
        }
    }
}

/// Immutable table of feature rows with one string label per row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    feature_names: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
    labels: Vec<String>,
    label_name: String,
}

impl Dataset {
    /// Create a dataset, checking that every row matches the header
    ///
    /// # Errors
    ///
    /// Returns `Schema` if row widths or the label count disagree
    pub fn new(
        feature_names: Vec<String>,
        rows: Vec<Vec<Option<f64>>>,
        labels: Vec<String>,
        label_name: impl Into<String>,
    ) -> CoreResult<Self> {
        if rows.len() != labels.len() {
            return Err(schema(format!(
                "{} rows but {} labels",
                rows.len(),
                labels.len()
            )));
        }
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != feature_names.len())
        {
            return Err(schema(format!(
                "row {} has {} features, expected {}",
                idx,
                row.len(),
                feature_names.len()
            )));
        }

        Ok(Self {
            feature_names,
            rows,
            labels,
            label_name: label_name.into(),
        })
    }

    /// Load a CSV file
    ///
    /// # Errors
    ///
    /// Returns `DataAccess` if the file cannot be read and `Schema` if it is
    /// malformed
    pub fn from_csv_path(path: &Path, label_column: &str) -> CoreResult<Self> {
        let file = File::open(path).map_err(|e| CoreError::DataAccess {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let dataset =
            Self::from_csv_reader(BufReader::new(file), label_column, &path.display().to_string())?;
        info!(
            path = %path.display(),
            rows = dataset.len(),
            features = dataset.feature_count(),
            "dataset loaded"
        );
        Ok(dataset)
    }

    /// Parse CSV from any reader; `origin` names the input in errors
    ///
    /// # Errors
    ///
    /// Returns `DataAccess` on read failures and `Schema` on malformed input
    pub fn from_csv_reader<R: BufRead>(reader: R, label_column: &str, origin: &str) -> CoreResult<Self> {
        let mut lines = reader.lines().enumerate();
        let read_err = |e: std::io::Error| CoreError::DataAccess {
            path: origin.to_string(),
            reason: e.to_string(),
        };
        let csv_err = |e: CsvError| schema(format!("{}: {}", origin, e));

        let header = match lines.next() {
            Some((_, line)) => line.map_err(read_err)?,
            None => return Err(csv_err(CsvError::MissingHeader)),
        };
        let header = header.strip_prefix('\u{feff}').unwrap_or(&header);
        if header.trim().is_empty() {
            return Err(csv_err(CsvError::MissingHeader));
        }

        let columns: Vec<String> = split_cells(header, 1)
            .map_err(csv_err)?
            .into_iter()
            .map(str::to_string)
            .collect();
        for (idx, column) in columns.iter().enumerate() {
            if columns[..idx].contains(column) {
                return Err(csv_err(CsvError::DuplicateColumn {
                    column: column.clone(),
                }));
            }
        }
        let label_idx = columns
            .iter()
            .position(|c| c == label_column)
            .ok_or_else(|| {
                csv_err(CsvError::MissingLabelColumn {
                    column: label_column.to_string(),
                })
            })?;
        if columns.len() < 2 {
            return Err(csv_err(CsvError::NoFeatures));
        }

        let feature_names: Vec<String> = columns
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != label_idx)
            .map(|(_, name)| name.clone())
            .collect();

        let mut rows = Vec::new();
        let mut labels = Vec::new();

        for (idx, line) in lines {
            let line = line.map_err(read_err)?;
            let line_no = idx + 1;
            if line.trim().is_empty() {
                continue;
            }

            let cells = split_cells(&line, line_no).map_err(csv_err)?;
            if cells.len() != columns.len() {
                return Err(csv_err(CsvError::CellCount {
                    line: line_no,
                    expected: columns.len(),
                    found: cells.len(),
                }));
            }

            let mut row = Vec::with_capacity(feature_names.len());
            for (col, cell) in cells.iter().enumerate() {
                if col == label_idx {
                    if is_missing(cell) {
                        return Err(csv_err(CsvError::EmptyLabel { line: line_no }));
                    }
                    labels.push((*cell).to_string());
                } else {
                    row.push(parse_cell(cell).ok_or_else(|| {
                        csv_err(CsvError::BadNumber {
                            line: line_no,
                            column: columns[col].clone(),
                            value: (*cell).to_string(),
                        })
                    })?);
                }
            }
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(csv_err(CsvError::NoRows));
        }
        debug!(origin, rows = rows.len(), "csv parsed");

        Self::new(feature_names, rows, labels, label_column)
    }

    /// Generate a reproducible dataset of noisy clusters
    ///
    /// Rows cycle through [`SYNTHETIC_CLASSES`]. A handful of cells are left
    /// missing so imputation is always exercised.
    ///
    /// # Errors
    ///
    /// Returns `Schema` for fewer than two rows or zero features
    pub fn synthetic(rows: usize, features: usize, seed: Seed) -> CoreResult<Self> {
        if rows < 2 || features == 0 {
            return Err(schema(format!(
                "synthetic dataset needs at least 2 rows and 1 feature, got {}x{}",
                rows, features
            )));
        }

        let mut rng = seed.derive("synthetic").rng();
        let mut data = Vec::with_capacity(rows);
        let mut labels = Vec::with_capacity(rows);

        for i in 0..rows {
            let class = i % SYNTHETIC_CLASSES.len();
            let row = (0..features)
                .map(|j| {
                    let sign = if j % 2 == 0 { 1.0 } else { -1.0 };
                    let value = sign * 1.5 * class as f64 + rng.gen_range(-1.0_f64..1.0);
                    (i % 17 != 5 || j != i % features).then_some(value)
                })
                .collect();
            data.push(row);
            labels.push(SYNTHETIC_CLASSES[class].to_string());
        }

        let feature_names = (0..features).map(|j| format!("feature_{}", j)).collect();
        Self::new(feature_names, data, labels, "class")
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of feature columns
    #[must_use]
    pub fn feature_count(&self) -> usize {
        self.feature_names.len()
    }

    /// Feature column names
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Feature rows
    #[must_use]
    pub fn rows(&self) -> &[Vec<Option<f64>>] {
        &self.rows
    }

    /// Raw labels
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Name of the label column
    #[must_use]
    pub fn label_name(&self) -> &str {
        &self.label_name
    }

    /// Count of missing feature cells
    #[must_use]
    pub fn missing_cells(&self) -> usize {
        self.rows.iter().flatten().filter(|c| c.is_none()).count()
    }

    /// Rows per label, sorted by label
    #[must_use]
    pub fn class_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for label in &self.labels {
            *counts.entry(label.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

/// Split on commas; a cell may be wrapped in quotes but not contain one
fn split_cells(line: &str, line_no: usize) -> Result<Vec<&str>, CsvError> {
    line.split(',')
        .map(|raw| {
            let raw = raw.trim();
            let cell = raw
                .strip_prefix('"')
                .and_then(|c| c.strip_suffix('"'))
                .unwrap_or(raw);
            if cell.contains('"') {
                return Err(CsvError::QuotedCell {
                    line: line_no,
                    cell: raw.to_string(),
                });
            }
            Ok(cell)
        })
        .collect()
}

fn is_missing(cell: &str) -> bool {
    MISSING_TOKENS.contains(&cell)
}

/// `Some(None)` for a missing cell, `None` if the cell is not a finite number
fn parse_cell(cell: &str) -> Option<Option<f64>> {
    if is_missing(cell) {
        return Some(None);
    }
    cell.parse::<f64>().ok().filter(|v| v.is_finite()).map(Some)
}

fn schema(reason: String) -> CoreError {
    CoreError::Schema { reason }
}
