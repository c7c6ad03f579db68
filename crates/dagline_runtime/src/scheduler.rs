//! Deterministic scheduler for task-graph execution.
//!
//! The scheduler is completely deterministic:
//! - No thread pools
//! - Ready tasks are picked in topological order, ties by insertion order
//! - Logical time increments on each state change
//! - Trigger rules are evaluated only over terminal upstream states

use dagline_core::{CoreError, CoreResult, LogicalTime, TaskId, TaskState};
use dagline_plan::{Dag, TriggerDecision, TriggerRule};
use indexmap::IndexMap;
use tracing::debug;

/// Scheduling decision - which task to run next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// Run this task next
    Run(TaskId),
    /// Tasks remain but none can make progress
    Stalled,
    /// Every task is terminal
    Complete,
}

struct Slot {
    upstream: Vec<TaskId>,
    rule: TriggerRule,
    state: TaskState,
}

/// Deterministic scheduler over one [`Dag`]
pub struct Scheduler {
    /// Tasks in topological order
    slots: IndexMap<TaskId, Slot>,
    /// Current logical time
    time: LogicalTime,
}

impl Scheduler {
    /// Build a scheduler for the graph
    ///
    /// # Errors
    ///
    /// Returns error if the graph is structurally invalid
    pub fn new(dag: &Dag) -> CoreResult<Self> {
        dag.validate()?;

        let slots = dag
            .topological_order()
            .into_iter()
            .filter_map(|id| {
                let spec = dag.get_task(&id)?;
                let slot = Slot {
                    upstream: dag.upstream(&id).into_iter().cloned().collect(),
                    rule: spec.trigger_rule,
                    state: TaskState::None,
                };
                Some((id, slot))
            })
            .collect();

        Ok(Self {
            slots,
            time: LogicalTime::zero(),
        })
    }

    /// Resolve tasks that can no longer run and pick the next runnable one.
    ///
    /// Tasks whose trigger rule yields `Skip` or `UpstreamFailed` are marked
    /// here, which may in turn resolve their own downstreams.
    pub fn decide(&mut self) -> ScheduleDecision {
        // Settle skips and upstream failures first so that the states seen
        // by callers are final before anything else runs.
        while self.resolve_blocked() {}

        let next = (0..self.slots.len()).find(|&idx| {
            self.evaluate(idx) == Some(TriggerDecision::Run)
        });

        match next.and_then(|idx| self.slots.get_index(idx)) {
            Some((id, _)) => ScheduleDecision::Run(id.clone()),
            None if self.is_complete() => ScheduleDecision::Complete,
            None => ScheduleDecision::Stalled,
        }
    }

    /// Evaluate the trigger rule of a pending task; `None` if not pending
    fn evaluate(&self, idx: usize) -> Option<TriggerDecision> {
        let (_, slot) = self.slots.get_index(idx)?;
        if slot.state != TaskState::None {
            return None;
        }

        let upstream_states: Vec<TaskState> = slot
            .upstream
            .iter()
            .map(|up| self.state(up).unwrap_or(TaskState::None))
            .collect();

        Some(slot.rule.evaluate(&upstream_states))
    }

    /// One pass marking tasks that can no longer run; true if anything changed
    fn resolve_blocked(&mut self) -> bool {
        let mut changed = false;

        for idx in 0..self.slots.len() {
            let state = match self.evaluate(idx) {
                Some(TriggerDecision::Skip) => TaskState::Skipped,
                Some(TriggerDecision::UpstreamFailed) => TaskState::UpstreamFailed,
                _ => continue,
            };

            if let Some((id, _)) = self.slots.get_index(idx) {
                debug!(task = %id, state = %state, "task resolved without running");
            }
            self.set_state(idx, state);
            changed = true;
        }

        changed
    }

    fn set_state(&mut self, idx: usize, state: TaskState) {
        if let Some((_, slot)) = self.slots.get_index_mut(idx) {
            slot.state = state;
            self.tick();
        }
    }

    fn transition(&mut self, task: &TaskId, from: &[TaskState], to: TaskState) -> CoreResult<()> {
        let slot = self.slots.get_mut(task).ok_or_else(|| CoreError::NotFound {
            kind: "Task".to_string(),
            id: task.to_string(),
        })?;

        if !from.contains(&slot.state) {
            return Err(CoreError::Validation {
                field: "task_state".to_string(),
                reason: format!("task {} cannot move from {} to {}", task, slot.state, to),
            });
        }

        slot.state = to;
        self.tick();
        Ok(())
    }

    /// Mark a task as running
    ///
    /// # Errors
    ///
    /// Returns error if the task is unknown or already started
    pub fn mark_running(&mut self, task: &TaskId) -> CoreResult<()> {
        self.transition(task, &[TaskState::None], TaskState::Running)
    }

    /// Mark a task as completed
    ///
    /// # Errors
    ///
    /// Returns error if the task is unknown or was not running
    pub fn mark_complete(&mut self, task: &TaskId) -> CoreResult<()> {
        self.transition(task, &[TaskState::Running], TaskState::Success)
    }

    /// Mark a task as failed
    ///
    /// # Errors
    ///
    /// Returns error if the task is unknown or was not running
    pub fn mark_failed(&mut self, task: &TaskId) -> CoreResult<()> {
        self.transition(task, &[TaskState::Running], TaskState::Failed)
    }

    /// Increment logical time
    fn tick(&mut self) {
        self.time = self.time.saturating_add(1);
    }

    /// Get current logical time
    #[must_use]
    pub const fn time(&self) -> LogicalTime {
        self.time
    }

    /// State of a task
    #[must_use]
    pub fn state(&self, task: &TaskId) -> Option<TaskState> {
        self.slots.get(task).map(|s| s.state)
    }

    /// All task states in topological order
    #[must_use]
    pub fn states(&self) -> Vec<(TaskId, TaskState)> {
        self.slots
            .iter()
            .map(|(id, slot)| (id.clone(), slot.state))
            .collect()
    }

    /// Number of tasks in a given state
    #[must_use]
    pub fn count(&self, state: TaskState) -> usize {
        self.slots.values().filter(|s| s.state == state).count()
    }

    /// Check if every task is terminal
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.slots.values().all(|s| s.state.is_terminal())
    }

    /// Check if any task failed or was blocked by a failure
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.slots.values().any(|s| s.state.is_failure())
    }
}
