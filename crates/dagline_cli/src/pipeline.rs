//! The training pipeline graph and its wiring.
//!
//! ```text
//! task_using_linked_owner -> load_data_task -> data_preprocessing_task
//!   -> separate_data_outputs_task -> build_save_model_task -> load_model_task
//!   -> { my_trigger_task (all_done), send_email }
//! ```

use crate::config::{NotifyMode, PipelineConfig};
use dagline_core::{CoreResult, RunId, TaskId};
use dagline_ml::{
    BuildModelTask, Evaluation, LoadDataTask, LoadModelTask, PreprocessTask, Split, SplitTask,
};
use dagline_notify::{
    EmailTask, LogNotifier, NotificationHook, Notifier, SmtpNotifier, SpoolTrigger, TriggerRequest,
    TriggerSink, TriggerTask,
};
use dagline_plan::{Dag, PipelineMeta, TaskSpec, TriggerRule};
use dagline_runtime::{EngineConfig, ExecutionEngine, FailTask, RunLock, RunReport, ShellTask};
use dagline_storage::ArtifactStore;
use std::sync::Arc;
use tracing::info;

/// Task ids of the pipeline graph
pub mod task_ids {
    /// Shell task run on behalf of the pipeline owner
    pub const OWNER: &str = "task_using_linked_owner";
    /// Loads the dataset
    pub const LOAD_DATA: &str = "load_data_task";
    /// Imputes, scales and encodes
    pub const PREPROCESS: &str = "data_preprocessing_task";
    /// Splits into train and test
    pub const SPLIT: &str = "separate_data_outputs_task";
    /// Fits and saves the model
    pub const BUILD_MODEL: &str = "build_save_model_task";
    /// Reloads and scores the model
    pub const LOAD_MODEL: &str = "load_model_task";
    /// Triggers the downstream pipeline
    pub const TRIGGER: &str = "my_trigger_task";
    /// Sends the notification email
    pub const SEND_EMAIL: &str = "send_email";

    /// Every task id, in declaration order
    pub const ALL: [&str; 8] = [
        OWNER,
        LOAD_DATA,
        PREPROCESS,
        SPLIT,
        BUILD_MODEL,
        LOAD_MODEL,
        TRIGGER,
        SEND_EMAIL,
    ];
}

fn tid(name: &str) -> CoreResult<TaskId> {
    TaskId::new(name)
}

/// Build the task graph described by `config`
///
/// # Errors
///
/// Returns error if the configured pipeline id is invalid
pub fn build_dag(config: &PipelineConfig) -> CoreResult<Dag> {
    use task_ids::*;

    let meta = PipelineMeta {
        description: config.pipeline.description.clone(),
        schedule: config.pipeline.schedule.clone(),
        max_active_runs: config.pipeline.max_active_runs,
        tags: config.pipeline.tags.clone(),
    };
    let mut dag = Dag::new(config.pipeline_id()?).with_meta(meta);

    for name in ALL {
        let mut spec = TaskSpec::new(tid(name)?).with_retries(config.pipeline.retries);
        match name {
            OWNER => spec = spec.with_owner(config.pipeline.owner.clone()),
            // fire and forget: one hand-off per run, whatever the retry setting
            TRIGGER => {
                spec = spec
                    .with_trigger_rule(TriggerRule::AllDone)
                    .with_retries(0);
            }
            _ => {}
        }
        dag.add_task(spec)?;
    }

    let chain = [OWNER, LOAD_DATA, PREPROCESS, SPLIT, BUILD_MODEL, LOAD_MODEL, TRIGGER]
        .into_iter()
        .map(tid)
        .collect::<CoreResult<Vec<_>>>()?;
    dag.chain(&chain.iter().collect::<Vec<_>>())?;
    dag.add_edge(&tid(LOAD_MODEL)?, &tid(SEND_EMAIL)?)?;

    Ok(dag)
}

/// Notifier selected by the `[notify]` section
///
/// # Errors
///
/// Returns error if SMTP settings are invalid
pub fn notifier_from_config(config: &PipelineConfig) -> CoreResult<Arc<dyn Notifier>> {
    Ok(match config.notify.mode {
        NotifyMode::Log => Arc::new(LogNotifier),
        NotifyMode::Smtp => Arc::new(SmtpNotifier::new(&config.notify.smtp)?),
    })
}

/// Remove the run lock a crashed run left in the artifact directory
///
/// Returns whether a lock file was present.
///
/// # Errors
///
/// Returns error if the pipeline id is invalid or the file cannot be removed
pub fn unlock(config: &PipelineConfig) -> CoreResult<bool> {
    let pipeline = config.pipeline_id()?;
    let cleared = RunLock::clear(&config.artifact.dir, &pipeline)?;
    if cleared {
        info!(pipeline = %pipeline, dir = %config.artifact.dir.display(), "stale run lock removed");
    }
    Ok(cleared)
}

/// A configured, runnable pipeline
pub struct Pipeline {
    config: PipelineConfig,
    engine: ExecutionEngine,
    store: ArtifactStore,
}

impl Pipeline {
    /// Wire every task with the given notifier and trigger sink
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(
        config: PipelineConfig,
        notifier: Arc<dyn Notifier>,
        sink: Arc<dyn TriggerSink>,
    ) -> CoreResult<Self> {
        use task_ids::*;

        config.validate()?;
        let dag = build_dag(&config)?;
        let pipeline_id = dag.pipeline_id.clone();
        let store = ArtifactStore::new(config.artifact.dir.clone());
        let artifact = config.artifact.name.as_str();

        let mut engine = ExecutionEngine::new(dag, EngineConfig::default())?;
        engine.register(tid(OWNER)?, Arc::new(ShellTask::new(config.pipeline.owner_command.clone())))?;
        engine.register(tid(LOAD_DATA)?, Arc::new(LoadDataTask::new(config.data.source())))?;
        engine.register(tid(PREPROCESS)?, Arc::new(PreprocessTask::new(tid(LOAD_DATA)?)))?;
        engine.register(tid(SPLIT)?, Arc::new(SplitTask::new(tid(PREPROCESS)?, config.split)))?;
        engine.register(
            tid(BUILD_MODEL)?,
            Arc::new(BuildModelTask::new(
                tid(SPLIT)?,
                tid(PREPROCESS)?,
                store.clone(),
                artifact,
                config.train,
            )),
        )?;
        engine.register(
            tid(LOAD_MODEL)?,
            Arc::new(LoadModelTask::new(tid(SPLIT)?, store.clone(), artifact)),
        )?;
        engine.register(
            tid(TRIGGER)?,
            Arc::new(TriggerTask::new(
                config.trigger_target()?,
                config.trigger.conf.clone(),
                sink,
            )),
        )?;

        let recipient = config.notify.recipient.as_str();
        engine.register(
            tid(SEND_EMAIL)?,
            Arc::new(EmailTask::new(
                Arc::clone(&notifier),
                EmailTask::notification(&pipeline_id, recipient),
            )),
        )?;
        engine.add_hook(
            tid(SEND_EMAIL)?,
            Arc::new(
                NotificationHook::new(notifier, pipeline_id, recipient)
                    .with_outcomes(config.notify.on_success, config.notify.on_failure),
            ),
        )?;

        Ok(Self {
            config,
            engine,
            store,
        })
    }

    /// Wire the pipeline with the notifier and spool named in the config
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn from_config(config: PipelineConfig) -> CoreResult<Self> {
        let notifier = notifier_from_config(&config)?;
        let sink = Arc::new(SpoolTrigger::new(config.trigger.spool_dir.clone()));
        Self::new(config, notifier, sink)
    }

    /// Replace a task with one that always fails
    ///
    /// # Errors
    ///
    /// Returns error if the task is not part of the pipeline
    pub fn inject_failure(&mut self, task: &str) -> CoreResult<()> {
        let task_id = tid(task)?;
        info!(task = %task_id, "injecting failure");
        self.engine
            .replace(&task_id, Arc::new(FailTask::new("failure requested on the command line")))
    }

    /// Run the pipeline once
    ///
    /// # Errors
    ///
    /// Returns error if another run holds the lock or the graph cannot be
    /// executed; task failures are reported in the [`RunReport`]
    pub fn run(&mut self) -> CoreResult<RunReport> {
        let _lock = if self.config.pipeline.max_active_runs == 1 {
            Some(RunLock::acquire(self.store.dir(), &self.engine.dag().pipeline_id)?)
        } else {
            None
        };
        self.engine.run(RunId::new())
    }

    /// Task graph
    #[must_use]
    pub fn dag(&self) -> &Dag {
        self.engine.dag()
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Artifact store
    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Split produced by the last run
    #[must_use]
    pub fn split(&self) -> Option<Arc<Split>> {
        self.engine.xcom().pull(&tid(task_ids::SPLIT).ok()?).ok()
    }

    /// Evaluation produced by the last run
    #[must_use]
    pub fn evaluation(&self) -> Option<Arc<Evaluation>> {
        self.engine.xcom().pull(&tid(task_ids::LOAD_MODEL).ok()?).ok()
    }

    /// Trigger request handed off by the last run
    #[must_use]
    pub fn trigger_request(&self) -> Option<Arc<TriggerRequest>> {
        self.engine.xcom().pull(&tid(task_ids::TRIGGER).ok()?).ok()
    }
}
