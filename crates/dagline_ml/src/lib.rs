//! DAGLINE ML
//!
//! The data and model steps of the training pipeline: loading a tabular
//! dataset, imputing and scaling it, a seeded train/test split, a
//! one-vs-rest logistic classifier and its evaluation, plus the runtime
//! tasks that chain them together.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dataset;
pub mod metrics;
pub mod model;
pub mod preprocess;
pub mod seed;
pub mod split;
pub mod tasks;

pub use dataset::{CsvError, DataSource, Dataset, SYNTHETIC_CLASSES};
pub use metrics::{Evaluation, accuracy, confusion_matrix};
pub use model::{LogisticModel, TrainConfig};
pub use preprocess::{ColumnStats, LabelEncoder, PreparedDataset, preprocess};
pub use seed::Seed;
pub use split::{Split, SplitConfig, split, test_rows};
pub use tasks::{BuildModelTask, LoadDataTask, LoadModelTask, PreprocessTask, SplitTask};
