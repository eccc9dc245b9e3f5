//! Per-run task graph.
//!
//! One [`TaskInstance`] per catalog definition, plus the dependency
//! bookkeeping needed to answer "what can run now". The graph holds no
//! locks: the scheduler's control loop is its only writer.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use strategist_core::{
    CoreError, GraphError, TaskCatalog, TaskDefId, TaskDefinition, TaskInstance, TaskOutput,
    TaskResult, TaskState,
};

use crate::synthesis::{SynthesisError, SynthesisInput, UpstreamResult};

/// Dependency-resolution state for one run.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    catalog: Arc<TaskCatalog>,
    /// Topological order, ties broken by catalog order.
    order: Vec<TaskDefId>,
    instances: HashMap<TaskDefId, TaskInstance>,
    dependents: HashMap<TaskDefId, Vec<TaskDefId>>,
}

impl TaskGraph {
    /// Build a fresh graph with every instance `Pending`.
    pub fn build(catalog: Arc<TaskCatalog>) -> Result<Self, GraphError> {
        let order = catalog.topological_order()?;

        let mut instances = HashMap::with_capacity(catalog.len());
        let mut dependents: HashMap<TaskDefId, Vec<TaskDefId>> = HashMap::new();
        for definition in catalog.definitions() {
            instances.insert(definition.id.clone(), TaskInstance::new(definition));
            for dep in &definition.depends_on {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(definition.id.clone());
            }
        }

        Ok(Self {
            catalog,
            order,
            instances,
            dependents,
        })
    }

    pub fn catalog(&self) -> &Arc<TaskCatalog> {
        &self.catalog
    }

    pub fn definition(&self, id: &TaskDefId) -> Result<&TaskDefinition, GraphError> {
        self.catalog
            .get(id)
            .ok_or_else(|| GraphError::UnknownTask(id.clone()))
    }

    pub fn instance(&self, id: &TaskDefId) -> Option<&TaskInstance> {
        self.instances.get(id)
    }

    fn instance_mut(&mut self, id: &TaskDefId) -> Result<&mut TaskInstance, CoreError> {
        self.instances
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownTask(id.clone()).into())
    }

    fn dependencies_terminal(&self, definition: &TaskDefinition) -> bool {
        definition.depends_on.iter().all(|dep| {
            self.instances
                .get(dep)
                .map(TaskInstance::is_terminal)
                .unwrap_or(false)
        })
    }

    /// `Pending` instances whose dependencies are all terminal, in
    /// topological order.
    pub fn ready_tasks(&self) -> Vec<TaskDefId> {
        self.order
            .iter()
            .filter(|id| {
                let pending = self
                    .instances
                    .get(*id)
                    .map(|i| i.state == TaskState::Pending)
                    .unwrap_or(false);
                pending
                    && self
                        .catalog
                        .get(id)
                        .map(|def| self.dependencies_terminal(def))
                        .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Move an instance to `Ready`. Rejects a task whose dependencies are
    /// not all terminal.
    pub fn mark_ready(&mut self, id: &TaskDefId) -> Result<(), CoreError> {
        let definition = self.definition(id)?;
        if !self.dependencies_terminal(definition) {
            return Err(CoreError::InvalidStateTransition {
                from: "dependencies pending".to_string(),
                to: format!("{:?}", TaskState::Ready),
            });
        }
        self.instance_mut(id)?.mark_ready()
    }

    /// Start the next attempt of a `Ready` instance.
    pub fn start_attempt(&mut self, id: &TaskDefId) -> Result<u32, CoreError> {
        self.instance_mut(id)?.start_attempt()
    }

    /// Record a failed attempt that will be retried after a backoff.
    pub fn mark_retrying(
        &mut self,
        id: &TaskDefId,
        error: impl Into<String>,
    ) -> Result<(), CoreError> {
        self.instance_mut(id)?.mark_retrying(error)
    }

    /// Record the final result of a task. Returns the dependents that this
    /// result unlocked, in topological order.
    pub fn mark_terminal(
        &mut self,
        id: &TaskDefId,
        result: TaskResult,
    ) -> Result<Vec<TaskDefId>, CoreError> {
        self.instance_mut(id)?.finish(result)?;

        let candidates = self.dependents.get(id).cloned().unwrap_or_default();
        let ready = self.ready_tasks();
        Ok(ready
            .into_iter()
            .filter(|task| candidates.contains(task))
            .collect())
    }

    /// Whether every instance is terminal.
    pub fn is_complete(&self) -> bool {
        self.instances.values().all(TaskInstance::is_terminal)
    }

    /// Ids of instances that are not terminal, in topological order.
    pub fn non_terminal(&self) -> Vec<TaskDefId> {
        self.order
            .iter()
            .filter(|id| {
                self.instances
                    .get(*id)
                    .map(|i| !i.is_terminal())
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Outputs of the succeeded dependencies of `id`. Siblings without a
    /// dependency edge are never visible.
    pub fn upstream_outputs(
        &self,
        id: &TaskDefId,
    ) -> Result<BTreeMap<TaskDefId, TaskOutput>, GraphError> {
        let definition = self.definition(id)?;
        Ok(definition
            .depends_on
            .iter()
            .filter_map(|dep| {
                let output = self.instances.get(dep)?.output()?;
                Some((dep.clone(), output.clone()))
            })
            .collect())
    }

    /// Collect every non-synthesis result for the synthesis stage.
    ///
    /// Fails if any of them is not terminal yet.
    pub fn synthesis_input(&self) -> Result<SynthesisInput, SynthesisError> {
        let mut results = Vec::new();
        for (position, definition) in self.catalog.definitions().iter().enumerate() {
            if definition.is_synthesis() {
                continue;
            }
            let result = self
                .instances
                .get(&definition.id)
                .and_then(|i| i.result.clone())
                .ok_or_else(|| SynthesisError::BarrierViolated(definition.id.clone()))?;
            results.push(UpstreamResult {
                task_id: definition.id.clone(),
                name: definition.name.clone(),
                category: definition.category,
                position,
                result,
            });
        }
        Ok(SynthesisInput { results })
    }

    /// Snapshot of all instances in catalog order.
    pub fn instances(&self) -> Vec<TaskInstance> {
        self.catalog
            .definitions()
            .iter()
            .filter_map(|d| self.instances.get(&d.id).cloned())
            .collect()
    }

    /// Number of terminal instances.
    pub fn terminal_count(&self) -> usize {
        self.instances.values().filter(|i| i.is_terminal()).count()
    }
}

#[cfg(test)]
mod tests {
    use strategist_core::{Category, TaskDefinition, SYNTHESIS_TASK};

    use super::*;

    fn reference_graph() -> TaskGraph {
        TaskGraph::build(Arc::new(TaskCatalog::reference().unwrap())).unwrap()
    }

    fn finish_ok(graph: &mut TaskGraph, id: &TaskDefId) -> Vec<TaskDefId> {
        graph.mark_ready(id).unwrap();
        let attempt = graph.start_attempt(id).unwrap();
        let output = TaskOutput::new(format!("{id} done"));
        graph
            .mark_terminal(id, TaskResult::succeeded(id.clone(), output, attempt, 1))
            .unwrap()
    }

    #[test]
    fn test_only_specialists_ready_initially() {
        let graph = reference_graph();
        let ready = graph.ready_tasks();
        assert_eq!(ready.len(), 15);
        assert!(!ready.contains(&TaskDefId::new(SYNTHESIS_TASK)));
    }

    #[test]
    fn test_synthesis_unlocked_by_last_terminal() {
        let mut graph = reference_graph();
        let ready = graph.ready_tasks();
        let (last, rest) = ready.split_last().unwrap();

        for id in rest {
            assert!(finish_ok(&mut graph, id).is_empty());
        }
        assert!(graph.synthesis_input().is_err());

        graph.mark_ready(last).unwrap();
        let attempt = graph.start_attempt(last).unwrap();
        let unlocked = graph
            .mark_terminal(last, TaskResult::failed(last.clone(), "boom", attempt, 1))
            .unwrap();
        assert_eq!(unlocked, vec![TaskDefId::new(SYNTHESIS_TASK)]);

        let input = graph.synthesis_input().unwrap();
        assert_eq!(input.results.len(), 15);
        assert_eq!(input.failed_count(), 1);
    }

    #[test]
    fn test_synthesis_cannot_be_marked_ready_early() {
        let mut graph = reference_graph();
        assert!(graph.mark_ready(&TaskDefId::new(SYNTHESIS_TASK)).is_err());
    }

    #[test]
    fn test_result_is_immutable_once_attached() {
        let mut graph = reference_graph();
        let id = TaskDefId::new("unit-economics");
        finish_ok(&mut graph, &id);
        let second = TaskResult::failed(id.clone(), "late", 2, 1);
        assert!(graph.mark_terminal(&id, second).is_err());
        assert!(graph.instance(&id).unwrap().result.as_ref().unwrap().is_success());
    }

    #[test]
    fn test_upstream_outputs_follow_edges_only() {
        let a = TaskDefinition::new("a", "A", Category::Growth);
        let b = TaskDefinition::new("b", "B", Category::Finance);
        let c = TaskDefinition::new("c", "C", Category::Growth).with_dependency("a");
        let catalog = TaskCatalog::new(vec![a, b, c]).unwrap();
        let mut graph = TaskGraph::build(Arc::new(catalog)).unwrap();

        finish_ok(&mut graph, &TaskDefId::new("a"));
        finish_ok(&mut graph, &TaskDefId::new("b"));

        let upstream = graph.upstream_outputs(&TaskDefId::new("c")).unwrap();
        assert_eq!(upstream.len(), 1);
        assert!(upstream.contains_key(&TaskDefId::new("a")));
    }

    #[test]
    fn test_chain_unlocks_in_order() {
        let a = TaskDefinition::new("a", "A", Category::Growth);
        let b = TaskDefinition::new("b", "B", Category::Growth).with_dependency("a");
        let graph_catalog = TaskCatalog::new(vec![b, a]).unwrap();
        let mut graph = TaskGraph::build(Arc::new(graph_catalog)).unwrap();

        assert_eq!(graph.ready_tasks(), vec![TaskDefId::new("a")]);
        let unlocked = finish_ok(&mut graph, &TaskDefId::new("a"));
        assert_eq!(unlocked, vec![TaskDefId::new("b")]);
        assert!(!graph.is_complete());
        assert_eq!(graph.non_terminal(), vec![TaskDefId::new("b")]);
    }
}
