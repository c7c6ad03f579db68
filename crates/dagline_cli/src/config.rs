//! Pipeline configuration.
//!
//! Loaded from a TOML file where every section and field is optional, then
//! adjusted by command-line overrides.

use dagline_core::{CoreError, CoreResult, PipelineId};
use dagline_ml::{DataSource, SplitConfig, TrainConfig};
use dagline_notify::{DEFAULT_TARGET, SmtpConfig, default_conf};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pipeline identity and defaults
    pub pipeline: PipelineSection,
    /// Input data
    pub data: DataSection,
    /// Train/test split
    pub split: SplitConfig,
    /// Model training
    pub train: TrainConfig,
    /// Model artifact location
    pub artifact: ArtifactSection,
    /// Email notifications
    pub notify: NotifySection,
    /// Downstream pipeline trigger
    pub trigger: TriggerSection,
}

/// `[pipeline]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Pipeline id
    pub id: String,
    /// Human description
    pub description: String,
    /// Schedule expression, recorded but not acted on
    pub schedule: Option<String>,
    /// Owner of the leading shell task
    pub owner: String,
    /// Command run by the leading shell task
    pub owner_command: String,
    /// 1 enforces a single active run through a lock file
    pub max_active_runs: u32,
    /// Retries applied to every task
    pub retries: u32,
    /// Tags for grouping
    pub tags: Vec<String>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            id: "Airflow_project".to_string(),
            description: "Train, save and score a classifier, then trigger the serving pipeline"
                .to_string(),
            schedule: Some("@daily".to_string()),
            owner: "data-team".to_string(),
            owner_command: "echo 1".to_string(),
            max_active_runs: 1,
            retries: 0,
            tags: vec!["example".to_string()],
        }
    }
}

/// `[data]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSection {
    /// CSV file; the synthetic generator is used when unset
    pub path: Option<PathBuf>,
    /// Label column of the CSV file
    pub label_column: String,
    /// Rows generated when no file is given
    pub synthetic_rows: usize,
    /// Feature columns generated when no file is given
    pub synthetic_features: usize,
    /// Generator seed
    pub seed: u64,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            path: None,
            label_column: "label".to_string(),
            synthetic_rows: 100,
            synthetic_features: 4,
            seed: 42,
        }
    }
}

impl DataSection {
    /// Where the loader reads from
    #[must_use]
    pub fn source(&self) -> DataSource {
        match &self.path {
            Some(path) => DataSource::Csv {
                path: path.clone(),
                label_column: self.label_column.clone(),
            },
            None => DataSource::Synthetic {
                rows: self.synthetic_rows,
                features: self.synthetic_features,
                seed: self.seed,
            },
        }
    }
}

/// `[artifact]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSection {
    /// Directory holding the model file and the run lock
    pub dir: PathBuf,
    /// Model file name
    pub name: String,
}

impl Default for ArtifactSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("artifacts"),
            name: "model.sav".to_string(),
        }
    }
}

/// How notifications are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyMode {
    /// Log messages only
    #[default]
    Log,
    /// Send through SMTP
    Smtp,
}

/// `[notify]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySection {
    /// Recipient of every notification
    pub recipient: String,
    /// Delivery mode
    pub mode: NotifyMode,
    /// Mail when the notification task succeeds
    pub on_success: bool,
    /// Mail when the notification task fails
    pub on_failure: bool,
    /// Relay settings, used in `smtp` mode
    pub smtp: SmtpConfig,
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            recipient: "pipeline-owner@example.com".to_string(),
            mode: NotifyMode::Log,
            on_success: true,
            on_failure: true,
            smtp: SmtpConfig::default(),
        }
    }
}

/// `[trigger]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSection {
    /// Pipeline to start
    pub target: String,
    /// Configuration passed to the target run
    pub conf: Map<String, Value>,
    /// Where trigger requests are written
    pub spool_dir: PathBuf,
}

impl Default for TriggerSection {
    fn default() -> Self {
        Self {
            target: DEFAULT_TARGET.to_string(),
            conf: default_conf(),
            spool_dir: PathBuf::from("trigger_spool"),
        }
    }
}

/// Values taken from the command line; `None` keeps the file's value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// CSV input
    pub data: Option<PathBuf>,
    /// CSV label column
    pub label: Option<String>,
    /// Synthetic row count; also drops any CSV path
    pub synthetic_rows: Option<usize>,
    /// Seed for both data generation and the split
    pub seed: Option<u64>,
    /// Artifact directory
    pub artifact_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Read a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> CoreResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| CoreError::io(format!("read config {}", path.display()), &e))?;
        Self::from_toml_str(&text)
    }

    /// Parse TOML text
    ///
    /// # Errors
    ///
    /// Returns `InvalidEncoding` if the text is not a valid configuration
    pub fn from_toml_str(text: &str) -> CoreResult<Self> {
        toml::from_str(text).map_err(|e| CoreError::InvalidEncoding {
            reason: format!("config: {}", e),
        })
    }

    /// Load `path` if given, else start from defaults
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load_or_default(path: Option<&Path>) -> CoreResult<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    /// Apply command-line overrides
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(path) = &overrides.data {
            self.data.path = Some(path.clone());
        }
        if let Some(label) = &overrides.label {
            self.data.label_column = label.clone();
        }
        if let Some(rows) = overrides.synthetic_rows {
            self.data.path = None;
            self.data.synthetic_rows = rows;
        }
        if let Some(seed) = overrides.seed {
            self.data.seed = seed;
            self.split.seed = seed;
        }
        if let Some(dir) = &overrides.artifact_dir {
            self.artifact.dir = dir.clone();
        }
    }

    /// Pipeline id
    ///
    /// # Errors
    ///
    /// Returns error if the configured id is not a valid name
    pub fn pipeline_id(&self) -> CoreResult<PipelineId> {
        PipelineId::new(self.pipeline.id.as_str())
    }

    /// Trigger target id
    ///
    /// # Errors
    ///
    /// Returns error if the configured target is not a valid name
    pub fn trigger_target(&self) -> CoreResult<PipelineId> {
        PipelineId::new(self.trigger.target.as_str())
    }

    /// Check everything that can be checked before a run
    ///
    /// # Errors
    ///
    /// Returns the first problem found
    pub fn validate(&self) -> CoreResult<()> {
        self.pipeline_id()?;
        self.trigger_target()?;
        self.split.validate()?;
        self.train.validate()?;

        if self.pipeline.max_active_runs == 0 {
            return Err(invalid("pipeline.max_active_runs", "must be at least 1"));
        }
        if self.data.path.is_some() && self.data.label_column.trim().is_empty() {
            return Err(invalid("data.label_column", "required for CSV input"));
        }
        if self.artifact.name.is_empty() {
            return Err(invalid("artifact.name", "must not be empty"));
        }
        if self.notify.recipient.trim().is_empty() {
            return Err(invalid("notify.recipient", "must not be empty"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> CoreError {
    CoreError::Validation {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
