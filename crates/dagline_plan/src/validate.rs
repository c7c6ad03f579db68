//! Graph validator run before a pipeline is executed.

use super::dag::Dag;
use crate::trigger::TriggerRule;
use dagline_core::TaskId;
use indexmap::IndexSet;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Graph has no tasks
    Empty,
    /// Cycle detected among these tasks
    Cycle { tasks: Vec<TaskId> },
    /// Edge references a task that was never added
    UnknownTask { task: TaskId },
    /// Tasks not connected to the first root
    Disconnected { tasks: Vec<TaskId> },
    /// Too many tasks
    TooManyTasks { count: usize, max: usize },
    /// Retry count above the configured ceiling
    TooManyRetries { task: TaskId, retries: u32, max: u32 },
    /// A root task uses a rule that can never be satisfied meaningfully
    RootTriggerRule { task: TaskId, rule: TriggerRule },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Pipeline has no tasks"),
            Self::Cycle { tasks } => write!(f, "Cycle detected involving tasks: {:?}", tasks),
            Self::UnknownTask { task } => write!(f, "Edge references unknown task {}", task),
            Self::Disconnected { tasks } => write!(f, "Disconnected tasks: {:?}", tasks),
            Self::TooManyTasks { count, max } => {
                write!(f, "Task count {} exceeds max {}", count, max)
            }
            Self::TooManyRetries { task, retries, max } => {
                write!(f, "Task {} has {} retries, max is {}", task, retries, max)
            }
            Self::RootTriggerRule { task, rule } => {
                write!(f, "Root task {} has no upstreams for trigger rule {}", task, rule)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validator for graph properties
pub struct Validator {
    /// Require every task to be connected to the others
    pub require_connected: bool,
    /// Maximum allowed tasks (0 = no limit)
    pub max_tasks: usize,
    /// Maximum retries per task
    pub max_retries: u32,
}

impl Validator {
    /// Create a new validator
    #[must_use]
    pub fn new() -> Self {
        Self {
            require_connected: true,
            max_tasks: 0,
            max_retries: 10,
        }
    }

    /// Validate a graph, collecting every problem found
    ///
    /// # Errors
    ///
    /// Returns all validation errors if the graph is invalid
    pub fn validate(&self, dag: &Dag) -> Result<(), Vec<ValidationError>> {
        if dag.is_empty() {
            return Err(vec![ValidationError::Empty]);
        }

        let mut errors = Vec::new();

        for edge in &dag.edges {
            for id in [&edge.from, &edge.to] {
                if !dag.tasks.contains_key(id) {
                    errors.push(ValidationError::UnknownTask { task: id.clone() });
                }
            }
        }

        if let Err(e) = self.check_cycles(dag) {
            errors.push(e);
        }

        if self.require_connected {
            if let Err(e) = self.check_connected(dag) {
                errors.push(e);
            }
        }

        if self.max_tasks > 0 && dag.task_count() > self.max_tasks {
            errors.push(ValidationError::TooManyTasks {
                count: dag.task_count(),
                max: self.max_tasks,
            });
        }

        for task in dag.tasks.values() {
            if task.retries > self.max_retries {
                errors.push(ValidationError::TooManyRetries {
                    task: task.id.clone(),
                    retries: task.retries,
                    max: self.max_retries,
                });
            }
            if matches!(task.trigger_rule, TriggerRule::AllFailed | TriggerRule::OneFailed)
                && dag.upstream(&task.id).is_empty()
            {
                errors.push(ValidationError::RootTriggerRule {
                    task: task.id.clone(),
                    rule: task.trigger_rule,
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Check for cycles: whatever a topological sort cannot place is on or behind a cycle
    fn check_cycles(&self, dag: &Dag) -> Result<(), ValidationError> {
        let ordered: IndexSet<TaskId> = dag.topological_order().into_iter().collect();
        let stuck: Vec<TaskId> = dag
            .tasks
            .keys()
            .filter(|id| !ordered.contains(*id))
            .cloned()
            .collect();

        if stuck.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::Cycle { tasks: stuck })
        }
    }

    /// Check that the graph forms one component, ignoring edge direction
    fn check_connected(&self, dag: &Dag) -> Result<(), ValidationError> {
        let Some(start) = dag.tasks.keys().next() else {
            return Ok(());
        };

        let mut reachable: IndexSet<&TaskId> = IndexSet::new();
        let mut stack = vec![start];

        while let Some(current) = stack.pop() {
            if !reachable.insert(current) {
                continue;
            }
            stack.extend(dag.downstream(current));
            stack.extend(dag.upstream(current));
        }

        let disconnected: Vec<TaskId> = dag
            .tasks
            .keys()
            .filter(|id| !reachable.contains(id))
            .cloned()
            .collect();

        if disconnected.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::Disconnected { tasks: disconnected })
        }
    }

    /// Set whether the graph must be connected
    #[must_use]
    pub fn with_require_connected(mut self, require: bool) -> Self {
        self.require_connected = require;
        self
    }

    /// Set maximum task count
    #[must_use]
    pub fn with_max_tasks(mut self, max: usize) -> Self {
        self.max_tasks = max;
        self
    }

    /// Set maximum retries per task
    #[must_use]
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
