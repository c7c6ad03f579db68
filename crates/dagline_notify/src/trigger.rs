//! Fire-and-forget requests to start another pipeline.
//!
//! A [`TriggerRequest`] is handed to a [`TriggerSink`] and forgotten: the
//! sender neither waits for the target run nor retries the hand-off.

use dagline_core::{CoreError, CoreResult, PipelineId, RunId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Pipeline started by default
pub const DEFAULT_TARGET: &str = "Airflow_project_Flask";

/// Default configuration handed to the target pipeline
#[must_use]
pub fn default_conf() -> Map<String, Value> {
    let mut conf = Map::new();
    conf.insert(
        "message".to_string(),
        Value::String("Data from upstream DAG".to_string()),
    );
    conf
}

/// A request for `target_pipeline` to start a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRequest {
    /// Run id proposed for the target pipeline
    pub run_id: RunId,
    /// Pipeline to start
    pub target_pipeline: PipelineId,
    /// Configuration passed to the target run
    pub conf: Map<String, Value>,
    /// Pipeline that asked
    pub source_pipeline: PipelineId,
    /// Run that asked
    pub source_run_id: RunId,
    /// When the request was made
    pub requested_at: Timestamp,
}

impl TriggerRequest {
    /// Create a request stamped with the current time and a fresh run id
    #[must_use]
    pub fn new(
        target_pipeline: PipelineId,
        conf: Map<String, Value>,
        source_pipeline: PipelineId,
        source_run_id: RunId,
    ) -> Self {
        Self {
            run_id: RunId::new(),
            target_pipeline,
            conf,
            source_pipeline,
            source_run_id,
            requested_at: Timestamp::now(),
        }
    }
}

/// Destination for trigger requests
pub trait TriggerSink: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Hand the request off; must not wait for the target run
    ///
    /// # Errors
    ///
    /// Returns error if the request could not be handed off
    fn fire(&self, request: &TriggerRequest) -> CoreResult<()>;
}

/// Drops requests as JSON files into `<dir>/<target>/<run_id>.json`
///
/// The target pipeline's runner is expected to pick them up from there.
#[derive(Debug, Clone)]
pub struct SpoolTrigger {
    dir: PathBuf,
}

impl SpoolTrigger {
    /// Spool into `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Spool directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a request is written to
    #[must_use]
    pub fn path_for(&self, request: &TriggerRequest) -> PathBuf {
        self.dir
            .join(request.target_pipeline.as_str())
            .join(format!("{}.json", request.run_id))
    }

    /// Every spooled request, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if a spool file cannot be read or parsed
    pub fn list(&self) -> CoreResult<Vec<TriggerRequest>> {
        let mut requests = Vec::new();
        for target in read_dir_sorted(&self.dir)? {
            if !target.is_dir() {
                continue;
            }
            for file in read_dir_sorted(&target)? {
                if file.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                let bytes = fs::read(&file).map_err(|e| CoreError::io("read trigger request", &e))?;
                requests.push(serde_json::from_slice::<TriggerRequest>(&bytes)?);
            }
        }
        requests.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        Ok(requests)
    }
}

impl TriggerSink for SpoolTrigger {
    fn name(&self) -> &str {
        "spool"
    }

    fn fire(&self, request: &TriggerRequest) -> CoreResult<()> {
        let path = self.path_for(request);
        let target_dir = self.dir.join(request.target_pipeline.as_str());
        fs::create_dir_all(&target_dir).map_err(|e| CoreError::io("create spool directory", &e))?;

        let bytes = serde_json::to_vec_pretty(request)?;
        let mut tmp = NamedTempFile::new_in(&target_dir)
            .map_err(|e| CoreError::io("create temporary trigger file", &e))?;
        tmp.write_all(&bytes)
            .map_err(|e| CoreError::io("write trigger request", &e))?;
        tmp.persist(&path)
            .map_err(|e| CoreError::io("persist trigger request", &e.error))?;

        debug!(path = %path.display(), "trigger request spooled");
        Ok(())
    }
}

/// Paths in `dir` sorted by name; a missing directory is empty
fn read_dir_sorted(dir: &Path) -> CoreResult<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CoreError::io("list spool directory", &e)),
    };
    let mut paths = entries
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CoreError::io("list spool directory", &e))?;
    paths.sort();
    Ok(paths)
}

/// Keeps requests in memory
#[derive(Debug, Default)]
pub struct MemoryTrigger {
    requests: Mutex<Vec<TriggerRequest>>,
}

impl MemoryTrigger {
    /// Create a shareable sink
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Requests received so far
    #[must_use]
    pub fn requests(&self) -> Vec<TriggerRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl TriggerSink for MemoryTrigger {
    fn name(&self) -> &str {
        "memory"
    }

    fn fire(&self, request: &TriggerRequest) -> CoreResult<()> {
        self.requests
            .lock()
            .map_err(|_| CoreError::Internal {
                message: "trigger sink lock poisoned".to_string(),
            })?
            .push(request.clone());
        info!(target_pipeline = %request.target_pipeline, "trigger request recorded");
        Ok(())
    }
}
