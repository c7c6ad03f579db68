//! Execution engine for pipeline graphs.
//!
//! Combines the scheduler with registered task callables and hooks to run a
//! complete [`Dag`] deterministically, one task at a time.

use crate::hooks::{TaskHook, TaskOutcome};
use crate::monitor::Metrics;
use crate::report::{RunReport, TaskRecord};
use crate::scheduler::{ScheduleDecision, Scheduler};
use crate::task::{Task, TaskContext};
use crate::xcom::XCom;
use dagline_core::{CoreError, CoreResult, RunId, RunStatus, TaskId, TaskState, Timestamp};
use dagline_plan::{Dag, Validator};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Execution engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Highest per-task retry count accepted by validation
    pub max_retries: u32,
    /// Whether every task must be connected to the rest of the graph
    pub require_connected: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            require_connected: true,
        }
    }
}

/// Execution engine for running pipeline graphs
pub struct ExecutionEngine {
    dag: Dag,
    config: EngineConfig,
    tasks: IndexMap<TaskId, Arc<dyn Task>>,
    hooks: IndexMap<TaskId, Vec<Arc<dyn TaskHook>>>,
    /// Values published during the most recent run
    xcom: XCom,
}

impl ExecutionEngine {
    /// Create an engine for `dag`
    ///
    /// # Errors
    ///
    /// Returns a validation error listing every structural problem found
    pub fn new(dag: Dag, config: EngineConfig) -> CoreResult<Self> {
        Validator::new()
            .with_require_connected(config.require_connected)
            .with_max_retries(config.max_retries)
            .validate(&dag)
            .map_err(|errors| CoreError::Validation {
                field: "dag".to_string(),
                reason: errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            })?;

        Ok(Self {
            dag,
            config,
            tasks: IndexMap::new(),
            hooks: IndexMap::new(),
            xcom: XCom::new(),
        })
    }

    /// Bind a callable to a task of the graph
    ///
    /// # Errors
    ///
    /// Returns error if the task is not in the graph or already bound
    pub fn register(&mut self, task_id: TaskId, task: Arc<dyn Task>) -> CoreResult<()> {
        self.ensure_in_graph(&task_id)?;
        if self.tasks.contains_key(&task_id) {
            return Err(CoreError::AlreadyExists {
                kind: "Task callable".to_string(),
                id: task_id.to_string(),
            });
        }
        self.tasks.insert(task_id, task);
        Ok(())
    }

    /// Swap the callable of an already registered task
    ///
    /// # Errors
    ///
    /// Returns error if nothing is registered under `task_id`
    pub fn replace(&mut self, task_id: &TaskId, task: Arc<dyn Task>) -> CoreResult<()> {
        let slot = self.tasks.get_mut(task_id).ok_or_else(|| CoreError::NotFound {
            kind: "Task callable".to_string(),
            id: task_id.to_string(),
        })?;
        *slot = task;
        Ok(())
    }

    /// Attach a post-task hook
    ///
    /// # Errors
    ///
    /// Returns error if the task is not in the graph
    pub fn add_hook(&mut self, task_id: TaskId, hook: Arc<dyn TaskHook>) -> CoreResult<()> {
        self.ensure_in_graph(&task_id)?;
        self.hooks.entry(task_id).or_default().push(hook);
        Ok(())
    }

    fn ensure_in_graph(&self, task_id: &TaskId) -> CoreResult<()> {
        if self.dag.get_task(task_id).is_none() {
            return Err(CoreError::NotFound {
                kind: "Task".to_string(),
                id: task_id.to_string(),
            });
        }
        Ok(())
    }

    /// Run the graph to completion
    ///
    /// Task failures are recorded in the report, not returned as errors.
    ///
    /// # Errors
    ///
    /// Returns error if a task has no callable, or the scheduler reaches a
    /// state it cannot leave
    pub fn run(&mut self, run_id: RunId) -> CoreResult<RunReport> {
        if let Some(missing) = self.dag.tasks.keys().find(|id| !self.tasks.contains_key(*id)) {
            return Err(CoreError::NotFound {
                kind: "Task callable".to_string(),
                id: missing.to_string(),
            });
        }

        let mut scheduler = Scheduler::new(&self.dag)?;
        let mut metrics = Metrics::new();
        let mut records: IndexMap<TaskId, TaskRecord> = scheduler
            .states()
            .into_iter()
            .map(|(id, _)| (id.clone(), TaskRecord::pending(id)))
            .collect();
        let xcom = XCom::new();
        let started_at = Timestamp::now();

        info!(pipeline = %self.dag.pipeline_id, run = %run_id, tasks = records.len(), "run started");

        loop {
            match scheduler.decide() {
                ScheduleDecision::Run(task_id) => {
                    let record = records.get_mut(&task_id).ok_or_else(|| CoreError::Internal {
                        message: format!("no record for task {}", task_id),
                    })?;
                    self.execute(&mut scheduler, &xcom, run_id, &task_id, record, &mut metrics)?;
                }
                ScheduleDecision::Complete => break,
                ScheduleDecision::Stalled => {
                    return Err(CoreError::Internal {
                        message: "scheduler stalled with pending tasks".to_string(),
                    });
                }
            }
        }

        for (task_id, state) in scheduler.states() {
            match state {
                TaskState::Skipped => metrics.tasks_skipped += 1,
                TaskState::UpstreamFailed => metrics.tasks_upstream_failed += 1,
                _ => {}
            }
            if let Some(record) = records.get_mut(&task_id) {
                record.state = state;
            }
        }
        metrics.total_ticks = scheduler.time().as_u64();

        let status = if scheduler.count(TaskState::Success) == records.len() {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };

        info!(
            pipeline = %self.dag.pipeline_id,
            run = %run_id,
            status = %status,
            succeeded = metrics.tasks_succeeded,
            failed = metrics.tasks_failed,
            "run finished"
        );

        self.xcom = xcom;

        Ok(RunReport {
            pipeline_id: self.dag.pipeline_id.clone(),
            run_id,
            status,
            started_at,
            finished_at: Timestamp::now(),
            tasks: records.into_values().collect(),
            metrics,
        })
    }

    /// Run one task with its retries, then its hooks
    fn execute(
        &self,
        scheduler: &mut Scheduler,
        xcom: &XCom,
        run_id: RunId,
        task_id: &TaskId,
        record: &mut TaskRecord,
        metrics: &mut Metrics,
    ) -> CoreResult<()> {
        let task = self.tasks.get(task_id).ok_or_else(|| CoreError::NotFound {
            kind: "Task callable".to_string(),
            id: task_id.to_string(),
        })?;
        let retries = self.dag.get_task(task_id).map_or(0, |spec| spec.retries);

        scheduler.mark_running(task_id)?;
        record.started_at = Some(Timestamp::now());

        let mut outcome = TaskOutcome::Success;
        for attempt in 1..=retries.saturating_add(1) {
            metrics.record_attempt(attempt);
            record.attempts = attempt;
            debug!(task = %task_id, attempt, "task attempt started");

            let ctx = TaskContext::new(
                &self.dag.pipeline_id,
                run_id,
                task_id,
                attempt,
                scheduler.time(),
                xcom,
            );

            match task.execute(&ctx) {
                Ok(()) => {
                    outcome = TaskOutcome::Success;
                    break;
                }
                Err(e) => {
                    warn!(task = %task_id, attempt, error = %e, "task attempt failed");
                    outcome = TaskOutcome::Failure {
                        error: e.to_string(),
                    };
                }
            }
        }

        record.finished_at = Some(Timestamp::now());
        match &outcome {
            TaskOutcome::Success => {
                scheduler.mark_complete(task_id)?;
                metrics.record_success();
                record.error = None;
                info!(task = %task_id, attempts = record.attempts, "task succeeded");
            }
            TaskOutcome::Failure { error: message } => {
                scheduler.mark_failed(task_id)?;
                metrics.record_failure();
                record.error = Some(message.clone());
                error!(task = %task_id, attempts = record.attempts, error = %message, "task failed");
            }
        }

        for hook in self.hooks.get(task_id).into_iter().flatten() {
            if let Err(e) = hook.on_outcome(&outcome, task_id) {
                warn!(task = %task_id, hook = hook.name(), error = %e, "hook failed");
                metrics.record_hook_failure();
                record.hook_errors.push(format!("{}: {}", hook.name(), e));
            }
        }

        Ok(())
    }

    /// Values published by the most recent run
    #[must_use]
    pub fn xcom(&self) -> &XCom {
        &self.xcom
    }

    /// The graph being executed
    #[must_use]
    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::RecordingHook;
    use crate::task::{FailTask, FnTask};
    use dagline_core::PipelineId;
    use dagline_plan::{TaskSpec, TriggerRule};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn tid(name: &str) -> TaskId {
        TaskId::new(name).unwrap()
    }

    /// load -> double -> {announce (all_done), store}
    fn dag() -> Dag {
        let mut dag = Dag::new(PipelineId::new("engine_test").unwrap());
        dag.add_task(TaskSpec::new(tid("load"))).unwrap();
        dag.add_task(TaskSpec::new(tid("double"))).unwrap();
        dag.add_task(TaskSpec::new(tid("announce")).with_trigger_rule(TriggerRule::AllDone))
            .unwrap();
        dag.add_task(TaskSpec::new(tid("store"))).unwrap();
        dag.chain(&[&tid("load"), &tid("double"), &tid("announce")]).unwrap();
        dag.add_edge(&tid("double"), &tid("store")).unwrap();
        dag
    }

    fn engine() -> ExecutionEngine {
        let mut engine = ExecutionEngine::new(dag(), EngineConfig::default()).unwrap();
        engine
            .register(tid("load"), Arc::new(FnTask::new(|ctx: &TaskContext<'_>| ctx.push(21u64))))
            .unwrap();
        engine
            .register(
                tid("double"),
                Arc::new(FnTask::new(|ctx: &TaskContext<'_>| {
                    let value = ctx.pull::<u64>(&tid("load"))?;
                    ctx.push(*value * 2)
                })),
            )
            .unwrap();
        engine
            .register(tid("announce"), Arc::new(FnTask::new(|ctx: &TaskContext<'_>| ctx.push("sent"))))
            .unwrap();
        engine
            .register(tid("store"), Arc::new(FnTask::new(|_: &TaskContext<'_>| Ok(()))))
            .unwrap();
        engine
    }

    struct BrokenHook;

    impl TaskHook for BrokenHook {
        fn name(&self) -> &str {
            "broken"
        }

        fn on_outcome(&self, _: &TaskOutcome, _: &TaskId) -> CoreResult<()> {
            Err(CoreError::Notification {
                reason: "smtp unreachable".to_string(),
            })
        }
    }

    #[test]
    fn test_run_success() {
        let mut engine = engine();
        let report = engine.run(RunId::new()).unwrap();

        assert!(report.is_success());
        assert_eq!(report.metrics.tasks_succeeded, 4);
        assert_eq!(*engine.xcom().pull::<u64>(&tid("double")).unwrap(), 42);
        let order: Vec<_> = report.tasks.iter().map(|t| t.task_id.to_string()).collect();
        assert_eq!(order, vec!["load", "double", "announce", "store"]);
    }

    #[test]
    fn test_failure_propagates_and_all_done_still_runs() {
        let mut engine = engine();
        engine.replace(&tid("load"), Arc::new(FailTask::new("forced"))).unwrap();
        let report = engine.run(RunId::new()).unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.state_of(&tid("load")), Some(TaskState::Failed));
        assert_eq!(report.state_of(&tid("double")), Some(TaskState::UpstreamFailed));
        assert_eq!(report.state_of(&tid("store")), Some(TaskState::UpstreamFailed));
        assert_eq!(report.state_of(&tid("announce")), Some(TaskState::Success));
        assert_eq!(report.metrics.tasks_upstream_failed, 2);
        assert!(report.task(&tid("load")).unwrap().error.as_deref().unwrap().contains("forced"));
    }

    #[test]
    fn test_retries() {
        let mut dag = Dag::new(PipelineId::new("retry_test").unwrap());
        dag.add_task(TaskSpec::new(tid("flaky")).with_retries(2)).unwrap();
        let mut engine = ExecutionEngine::new(dag, EngineConfig::default()).unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        engine
            .register(
                tid("flaky"),
                Arc::new(FnTask::new(move |ctx: &TaskContext<'_>| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    if ctx.attempt < 3 {
                        return Err(CoreError::Internal {
                            message: "not yet".to_string(),
                        });
                    }
                    Ok(())
                })),
            )
            .unwrap();

        let report = engine.run(RunId::new()).unwrap();
        assert!(report.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.metrics.retries, 2);
        assert_eq!(report.task(&tid("flaky")).unwrap().attempts, 3);
    }

    #[test]
    fn test_hooks_see_outcome() {
        let mut engine = engine();
        let hook = RecordingHook::new();
        engine.add_hook(tid("store"), hook.clone()).unwrap();
        engine.run(RunId::new()).unwrap();

        assert_eq!(hook.calls(), vec![(TaskOutcome::Success, tid("store"))]);
    }

    #[test]
    fn test_hook_failure_does_not_change_outcome() {
        let mut engine = engine();
        engine.add_hook(tid("store"), Arc::new(BrokenHook)).unwrap();
        let report = engine.run(RunId::new()).unwrap();

        assert!(report.is_success());
        assert_eq!(report.metrics.hook_failures, 1);
        let record = report.task(&tid("store")).unwrap();
        assert_eq!(record.state, TaskState::Success);
        assert!(record.hook_errors[0].contains("smtp unreachable"));
    }

    #[test]
    fn test_hooks_not_called_for_tasks_that_never_ran() {
        let mut engine = engine();
        engine.replace(&tid("load"), Arc::new(FailTask::new("forced"))).unwrap();
        let hook = RecordingHook::new();
        engine.add_hook(tid("store"), hook.clone()).unwrap();
        engine.add_hook(tid("load"), hook.clone()).unwrap();
        engine.run(RunId::new()).unwrap();

        let calls = hook.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, tid("load"));
        assert!(!calls[0].0.is_success());
    }

    #[test]
    fn test_unregistered_task_rejected() {
        let mut engine = ExecutionEngine::new(dag(), EngineConfig::default()).unwrap();
        let err = engine.run(RunId::new()).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn test_register_twice_and_unknown() {
        let mut engine = engine();
        let noop = || Arc::new(FnTask::new(|_: &TaskContext<'_>| Ok(())));
        assert!(matches!(
            engine.register(tid("load"), noop()),
            Err(CoreError::AlreadyExists { .. })
        ));
        assert!(matches!(
            engine.register(tid("ghost"), noop()),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_invalid_graph_rejected() {
        let mut dag = dag();
        dag.add_task(TaskSpec::new(tid("orphan"))).unwrap();
        let err = ExecutionEngine::new(dag, EngineConfig::default()).err().unwrap();
        assert!(err.to_string().contains("orphan"));
    }
}
