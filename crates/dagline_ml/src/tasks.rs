//! Pipeline tasks wrapping the data and model steps.
//!
//! Each task reads its inputs from upstream tasks through the run's value
//! store and publishes exactly one output under its own id.

use crate::dataset::{DataSource, Dataset};
use crate::metrics::Evaluation;
use crate::model::{LogisticModel, TrainConfig};
use crate::preprocess::{PreparedDataset, preprocess};
use crate::split::{Split, SplitConfig, split};
use dagline_core::{CoreResult, TaskId};
use dagline_runtime::{Task, TaskContext};
use dagline_storage::ArtifactStore;
use tracing::info;

/// Loads a [`Dataset`] from its source
pub struct LoadDataTask {
    source: DataSource,
}

impl LoadDataTask {
    /// Create the task
    #[must_use]
    pub fn new(source: DataSource) -> Self {
        Self { source }
    }
}

impl Task for LoadDataTask {
    fn execute(&self, ctx: &TaskContext<'_>) -> CoreResult<()> {
        let dataset = self.source.load()?;
        info!(
            task = %ctx.task_id,
            source = %self.source,
            rows = dataset.len(),
            missing = dataset.missing_cells(),
            "data loaded"
        );
        ctx.push(dataset)
    }
}

/// Turns the upstream [`Dataset`] into a [`PreparedDataset`]
pub struct PreprocessTask {
    input: TaskId,
}

impl PreprocessTask {
    /// Read the dataset published by `input`
    #[must_use]
    pub fn new(input: TaskId) -> Self {
        Self { input }
    }
}

impl Task for PreprocessTask {
    fn execute(&self, ctx: &TaskContext<'_>) -> CoreResult<()> {
        let dataset = ctx.pull::<Dataset>(&self.input)?;
        let prepared = preprocess(&dataset)?;
        info!(
            task = %ctx.task_id,
            rows = prepared.len(),
            classes = prepared.encoder.len(),
            "data preprocessed"
        );
        ctx.push(prepared)
    }
}

/// Splits the upstream [`PreparedDataset`] into train and test parts
pub struct SplitTask {
    input: TaskId,
    config: SplitConfig,
}

impl SplitTask {
    /// Read the prepared data published by `input`
    #[must_use]
    pub fn new(input: TaskId, config: SplitConfig) -> Self {
        Self { input, config }
    }
}

impl Task for SplitTask {
    fn execute(&self, ctx: &TaskContext<'_>) -> CoreResult<()> {
        let prepared = ctx.pull::<PreparedDataset>(&self.input)?;
        let split = split(&prepared, &self.config)?;
        info!(
            task = %ctx.task_id,
            train = split.train_len(),
            test = split.test_len(),
            "data split"
        );
        ctx.push(split)
    }
}

/// Fits a [`LogisticModel`] on the training rows and saves it
///
/// Publishes the [`dagline_storage::ArtifactInfo`] of the saved file.
pub struct BuildModelTask {
    split_from: TaskId,
    prepared_from: TaskId,
    store: ArtifactStore,
    artifact_name: String,
    config: TrainConfig,
}

impl BuildModelTask {
    /// Train on the split from `split_from`, naming classes after the
    /// encoder published by `prepared_from`
    #[must_use]
    pub fn new(
        split_from: TaskId,
        prepared_from: TaskId,
        store: ArtifactStore,
        artifact_name: impl Into<String>,
        config: TrainConfig,
    ) -> Self {
        Self {
            split_from,
            prepared_from,
            store,
            artifact_name: artifact_name.into(),
            config,
        }
    }
}

impl Task for BuildModelTask {
    fn execute(&self, ctx: &TaskContext<'_>) -> CoreResult<()> {
        let split = ctx.pull::<Split>(&self.split_from)?;
        let prepared = ctx.pull::<PreparedDataset>(&self.prepared_from)?;

        let model = LogisticModel::fit(
            &split.x_train,
            &split.y_train,
            prepared.encoder.classes(),
            &self.config,
        )?;
        let artifact = self.store.save(&self.artifact_name, &model)?;
        info!(
            task = %ctx.task_id,
            path = %artifact.path.display(),
            checksum = %artifact.checksum,
            "model saved"
        );
        ctx.push(artifact)
    }
}

/// Reloads the saved model and scores it on the test rows
pub struct LoadModelTask {
    split_from: TaskId,
    store: ArtifactStore,
    artifact_name: String,
}

impl LoadModelTask {
    /// Score the artifact against the test rows of `split_from`
    #[must_use]
    pub fn new(split_from: TaskId, store: ArtifactStore, artifact_name: impl Into<String>) -> Self {
        Self {
            split_from,
            store,
            artifact_name: artifact_name.into(),
        }
    }
}

impl Task for LoadModelTask {
    fn execute(&self, ctx: &TaskContext<'_>) -> CoreResult<()> {
        let model: LogisticModel = self.store.load(&self.artifact_name)?;
        let split = ctx.pull::<Split>(&self.split_from)?;
        let evaluation = Evaluation::evaluate(&model, &split.x_test, &split.y_test)?;
        info!(
            task = %ctx.task_id,
            test_rows = evaluation.test_rows,
            accuracy = evaluation.accuracy,
            "model evaluated"
        );
        ctx.push(evaluation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagline_core::{CoreError, PipelineId, RunId, TaskState};
    use dagline_plan::{Dag, TaskSpec};
    use dagline_runtime::{EngineConfig, ExecutionEngine, FailTask, FnTask};
    use std::sync::Arc;

    fn tid(name: &str) -> TaskId {
        TaskId::new(name).unwrap()
    }

    fn engine(store: ArtifactStore) -> ExecutionEngine {
        let names = ["load", "prep", "split", "build", "score"];
        let mut dag = Dag::new(PipelineId::new("ml_tasks").unwrap());
        for name in names {
            dag.add_task(TaskSpec::new(tid(name))).unwrap();
        }
        let ids: Vec<TaskId> = names.iter().map(|n| tid(n)).collect();
        dag.chain(&ids.iter().collect::<Vec<_>>()).unwrap();

        let mut engine = ExecutionEngine::new(dag, EngineConfig::default()).unwrap();
        let source = DataSource::Synthetic {
            rows: 100,
            features: 4,
            seed: 42,
        };
        engine.register(tid("load"), Arc::new(LoadDataTask::new(source))).unwrap();
        engine.register(tid("prep"), Arc::new(PreprocessTask::new(tid("load")))).unwrap();
        engine
            .register(tid("split"), Arc::new(SplitTask::new(tid("prep"), SplitConfig::default())))
            .unwrap();
        engine
            .register(
                tid("build"),
                Arc::new(BuildModelTask::new(
                    tid("split"),
                    tid("prep"),
                    store.clone(),
                    "model.sav",
                    TrainConfig::default(),
                )),
            )
            .unwrap();
        engine
            .register(tid("score"), Arc::new(LoadModelTask::new(tid("split"), store, "model.sav")))
            .unwrap();
        engine
    }

    #[test]
    fn test_chain_produces_evaluation() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut engine = engine(store.clone());

        let report = engine.run(RunId::new()).unwrap();
        assert!(report.is_success());

        let split = engine.xcom().pull::<Split>(&tid("split")).unwrap();
        assert_eq!((split.train_len(), split.test_len()), (80, 20));

        let eval = engine.xcom().pull::<Evaluation>(&tid("score")).unwrap();
        assert_eq!(eval.test_rows, 20);
        assert!(eval.accuracy > 0.5, "accuracy {}", eval.accuracy);
        assert!(store.exists("model.sav"));
    }

    #[test]
    fn test_failed_build_leaves_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut engine = engine(store.clone());
        engine.replace(&tid("build"), Arc::new(FailTask::new("forced"))).unwrap();

        let report = engine.run(RunId::new()).unwrap();
        assert_eq!(report.state_of(&tid("build")), Some(TaskState::Failed));
        assert_eq!(report.state_of(&tid("score")), Some(TaskState::UpstreamFailed));
        assert!(!store.exists("model.sav"));
    }

    #[test]
    fn test_fit_failure_leaves_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut engine = engine(store.clone());
        let poisoned = FnTask::new(|ctx: &TaskContext<'_>| {
            let prepared = ctx.pull::<PreparedDataset>(&tid("prep"))?;
            let mut out = split(&prepared, &SplitConfig::default())?;
            out.x_train[0][0] = f64::NAN;
            ctx.push(out)
        });
        engine.replace(&tid("split"), Arc::new(poisoned)).unwrap();

        let report = engine.run(RunId::new()).unwrap();
        assert_eq!(report.state_of(&tid("split")), Some(TaskState::Success));
        let build = report.task(&tid("build")).unwrap();
        assert_eq!(build.state, TaskState::Failed);
        assert!(build.error.as_deref().unwrap_or_default().contains("non-finite"));
        assert!(!store.exists("model.sav"));
        // nothing half-written either
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_load_model_without_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let task = LoadModelTask::new(tid("split"), store, "model.sav");

        let pipeline = PipelineId::new("p").unwrap();
        let task_id = tid("score");
        let xcom = dagline_runtime::XCom::new();
        let ctx = TaskContext::new(&pipeline, RunId::new(), &task_id, 1, Default::default(), &xcom);

        let err = task.execute(&ctx).unwrap_err();
        assert!(matches!(err, CoreError::ArtifactNotFound { .. }));
    }
}
