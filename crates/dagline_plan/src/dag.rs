//! Task graph for a pipeline.
//!
//! A [`Dag`] holds named tasks, the dependency edges between them and the
//! pipeline-level metadata. Tasks keep their insertion order, which is also
//! the tie-break order used when several tasks are ready at once.

use crate::trigger::TriggerRule;
use dagline_core::{CoreError, CoreResult, PipelineId, TaskId};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Declaration of one task in the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique task ID
    pub id: TaskId,
    /// When the task may run relative to its upstreams
    #[serde(default)]
    pub trigger_rule: TriggerRule,
    /// Extra attempts after a failure
    #[serde(default)]
    pub retries: u32,
    /// Owner shown in reports
    #[serde(default)]
    pub owner: Option<String>,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
}

impl TaskSpec {
    /// Create a task with the default trigger rule and no retries
    #[must_use]
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            trigger_rule: TriggerRule::default(),
            retries: 0,
            owner: None,
            description: None,
        }
    }

    /// Set the trigger rule
    #[must_use]
    pub fn with_trigger_rule(mut self, rule: TriggerRule) -> Self {
        self.trigger_rule = rule;
        self
    }

    /// Set the retry count
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the owner
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Pipeline-level metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMeta {
    /// Human description
    pub description: String,
    /// Schedule expression, informational only
    pub schedule: Option<String>,
    /// Maximum number of concurrent runs
    pub max_active_runs: u32,
    /// Tags for grouping
    pub tags: Vec<String>,
}

impl Default for PipelineMeta {
    fn default() -> Self {
        Self {
            description: String::new(),
            schedule: None,
            max_active_runs: 1,
            tags: Vec::new(),
        }
    }
}

/// A dependency: `to` runs after `from`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Upstream task
    pub from: TaskId,
    /// Downstream task
    pub to: TaskId,
}

impl Edge {
    /// Create a new edge
    #[must_use]
    pub fn new(from: TaskId, to: TaskId) -> Self {
        Self { from, to }
    }
}

/// A directed acyclic graph of tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dag {
    /// Pipeline name
    pub pipeline_id: PipelineId,
    /// Pipeline metadata
    pub meta: PipelineMeta,
    /// All tasks, in insertion order
    pub tasks: IndexMap<TaskId, TaskSpec>,
    /// All edges, in insertion order
    pub edges: Vec<Edge>,
}

impl Dag {
    /// Create a new empty graph
    #[must_use]
    pub fn new(pipeline_id: PipelineId) -> Self {
        Self {
            pipeline_id,
            meta: PipelineMeta::default(),
            tasks: IndexMap::new(),
            edges: Vec::new(),
        }
    }

    /// Replace the metadata
    #[must_use]
    pub fn with_meta(mut self, meta: PipelineMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Add a task to the graph
    ///
    /// # Errors
    ///
    /// Returns error if a task with the same ID exists
    pub fn add_task(&mut self, task: TaskSpec) -> CoreResult<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(CoreError::AlreadyExists {
                kind: "Task".to_string(),
                id: task.id.to_string(),
            });
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Add a dependency `from -> to`
    ///
    /// Adding an edge that already exists is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if either task is unknown or the edge would create a cycle
    pub fn add_edge(&mut self, from: &TaskId, to: &TaskId) -> CoreResult<()> {
        for id in [from, to] {
            if !self.tasks.contains_key(id) {
                return Err(CoreError::NotFound {
                    kind: "Task".to_string(),
                    id: id.to_string(),
                });
            }
        }

        let edge = Edge::new(from.clone(), to.clone());
        if self.edges.contains(&edge) {
            return Ok(());
        }

        if from == to || self.reaches(to, from) {
            return Err(CoreError::Validation {
                field: "edge".to_string(),
                reason: format!("adding edge {} -> {} would create a cycle", from, to),
            });
        }

        self.edges.push(edge);
        Ok(())
    }

    /// Wire tasks in sequence: `ids[0] -> ids[1] -> ...`
    ///
    /// # Errors
    ///
    /// Returns the first error from [`Dag::add_edge`]
    pub fn chain(&mut self, ids: &[&TaskId]) -> CoreResult<()> {
        for pair in ids.windows(2) {
            self.add_edge(pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Whether `target` is reachable from `start` along edges
    fn reaches(&self, start: &TaskId, target: &TaskId) -> bool {
        let mut visited: IndexSet<&TaskId> = IndexSet::new();
        let mut stack = vec![start];

        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            stack.extend(self.edges.iter().filter(|e| &e.from == current).map(|e| &e.to));
        }

        false
    }

    /// Check structural soundness
    ///
    /// # Errors
    ///
    /// Returns error if an edge references an unknown task or the edges form a cycle
    pub fn validate(&self) -> CoreResult<()> {
        for edge in &self.edges {
            for id in [&edge.from, &edge.to] {
                if !self.tasks.contains_key(id) {
                    return Err(CoreError::NotFound {
                        kind: "Task".to_string(),
                        id: id.to_string(),
                    });
                }
            }
        }

        if self.topological_order().len() != self.tasks.len() {
            return Err(CoreError::Validation {
                field: "dag".to_string(),
                reason: "cycle detected".to_string(),
            });
        }

        Ok(())
    }

    /// Tasks ordered so every task follows its upstreams.
    ///
    /// Ties are broken by insertion order. Tasks on a cycle are left out,
    /// so a result shorter than [`Dag::task_count`] signals a cycle.
    #[must_use]
    pub fn topological_order(&self) -> Vec<TaskId> {
        let mut in_degree: IndexMap<&TaskId, usize> =
            self.tasks.keys().map(|id| (id, 0)).collect();
        for edge in &self.edges {
            if let Some(d) = in_degree.get_mut(&edge.to) {
                *d += 1;
            }
        }

        let mut queue: VecDeque<&TaskId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.tasks.len());

        while let Some(id) = queue.pop_front() {
            order.push(id.clone());
            for next in self.downstream(id) {
                if let Some(d) = in_degree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }

        order
    }

    /// Get task by ID
    #[must_use]
    pub fn get_task(&self, id: &TaskId) -> Option<&TaskSpec> {
        self.tasks.get(id)
    }

    /// Tasks that run after the given task
    #[must_use]
    pub fn downstream(&self, id: &TaskId) -> Vec<&TaskId> {
        self.edges
            .iter()
            .filter(|e| &e.from == id)
            .map(|e| &e.to)
            .collect()
    }

    /// Tasks the given task depends on
    #[must_use]
    pub fn upstream(&self, id: &TaskId) -> Vec<&TaskId> {
        self.edges
            .iter()
            .filter(|e| &e.to == id)
            .map(|e| &e.from)
            .collect()
    }

    /// Tasks without upstreams
    #[must_use]
    pub fn roots(&self) -> Vec<&TaskId> {
        self.tasks
            .keys()
            .filter(|id| self.upstream(id).is_empty())
            .collect()
    }

    /// Tasks without downstreams
    #[must_use]
    pub fn leaves(&self) -> Vec<&TaskId> {
        self.tasks
            .keys()
            .filter(|id| self.downstream(id).is_empty())
            .collect()
    }

    /// Get total task count
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Get total edge count
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Check if graph is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(name: &str) -> TaskId {
        TaskId::new(name).unwrap()
    }

    fn make_dag(names: &[&str]) -> Dag {
        let mut dag = Dag::new(PipelineId::new("test_pipeline").unwrap());
        for name in names {
            dag.add_task(TaskSpec::new(tid(name))).unwrap();
        }
        dag
    }

    #[test]
    fn test_dag_new() {
        let dag = make_dag(&[]);
        assert!(dag.is_empty());
        assert_eq!(dag.edge_count(), 0);
        assert_eq!(dag.meta.max_active_runs, 1);
    }

    #[test]
    fn test_add_task_duplicate() {
        let mut dag = make_dag(&["a"]);
        let result = dag.add_task(TaskSpec::new(tid("a")));
        assert!(matches!(result, Err(CoreError::AlreadyExists { .. })));
    }

    #[test]
    fn test_add_edge_unknown_task() {
        let mut dag = make_dag(&["a"]);
        let result = dag.add_edge(&tid("a"), &tid("missing"));
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
    }

    #[test]
    fn test_add_edge_rejects_cycle() {
        let mut dag = make_dag(&["a", "b", "c"]);
        dag.chain(&[&tid("a"), &tid("b"), &tid("c")]).unwrap();

        assert!(dag.add_edge(&tid("c"), &tid("a")).is_err());
        assert!(dag.add_edge(&tid("b"), &tid("b")).is_err());
        assert_eq!(dag.edge_count(), 2);
    }

    #[test]
    fn test_add_edge_idempotent() {
        let mut dag = make_dag(&["a", "b"]);
        dag.add_edge(&tid("a"), &tid("b")).unwrap();
        dag.add_edge(&tid("a"), &tid("b")).unwrap();
        assert_eq!(dag.edge_count(), 1);
    }

    #[test]
    fn test_upstream_downstream() {
        let mut dag = make_dag(&["load", "train", "notify", "trigger"]);
        dag.chain(&[&tid("load"), &tid("train"), &tid("trigger")]).unwrap();
        dag.add_edge(&tid("train"), &tid("notify")).unwrap();

        assert_eq!(dag.upstream(&tid("train")), vec![&tid("load")]);
        assert_eq!(dag.downstream(&tid("train")), vec![&tid("trigger"), &tid("notify")]);
        assert_eq!(dag.roots(), vec![&tid("load")]);
        assert_eq!(dag.leaves(), vec![&tid("notify"), &tid("trigger")]);
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let mut dag = make_dag(&["c", "b", "a"]);
        dag.chain(&[&tid("a"), &tid("b"), &tid("c")]).unwrap();
        assert_eq!(dag.topological_order(), vec![tid("a"), tid("b"), tid("c")]);
    }

    #[test]
    fn test_topological_order_ties_by_insertion() {
        let dag = make_dag(&["x", "y", "z"]);
        assert_eq!(dag.topological_order(), vec![tid("x"), tid("y"), tid("z")]);
    }

    #[test]
    fn test_validate_detects_injected_cycle() {
        let mut dag = make_dag(&["a", "b"]);
        dag.add_edge(&tid("a"), &tid("b")).unwrap();
        dag.edges.push(Edge::new(tid("b"), tid("a")));
        assert!(dag.validate().is_err());
    }

    #[test]
    fn test_validate_missing_task() {
        let mut dag = make_dag(&["a"]);
        dag.edges.push(Edge::new(tid("a"), tid("ghost")));
        assert!(matches!(dag.validate(), Err(CoreError::NotFound { .. })));
    }

    #[test]
    fn test_task_spec_builder() {
        let spec = TaskSpec::new(tid("my_trigger_task"))
            .with_trigger_rule(TriggerRule::AllDone)
            .with_retries(2)
            .with_owner("ml-team")
            .with_description("fire downstream");
        assert_eq!(spec.trigger_rule, TriggerRule::AllDone);
        assert_eq!(spec.retries, 2);
        assert_eq!(spec.owner.as_deref(), Some("ml-team"));
    }

    #[test]
    fn test_dag_serde() {
        let mut dag = make_dag(&["a", "b"]);
        dag.add_edge(&tid("a"), &tid("b")).unwrap();
        let json = serde_json::to_string(&dag).unwrap();
        let back: Dag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dag);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn topological_order_places_upstreams_first(
                n in 2usize..12,
                pairs in proptest::collection::vec((0usize..12, 0usize..12), 0..30),
            ) {
                let names: Vec<String> = (0..n).map(|i| format!("t{}", i)).collect();
                let mut dag = make_dag(&names.iter().map(String::as_str).collect::<Vec<_>>());
                for (a, b) in pairs {
                    let (from, to) = (a % n, b % n);
                    if from < to {
                        dag.add_edge(&tid(&names[from]), &tid(&names[to])).unwrap();
                    }
                }

                let order = dag.topological_order();
                prop_assert_eq!(order.len(), n);
                let position = |id: &TaskId| order.iter().position(|o| o == id).unwrap();
                for edge in &dag.edges {
                    prop_assert!(position(&edge.from) < position(&edge.to));
                }
            }
        }
    }
}
