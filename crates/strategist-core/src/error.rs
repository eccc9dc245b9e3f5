//! Core domain errors.

use thiserror::Error;

use crate::ids::TaskDefId;

/// Rejections of a raw intake before anything is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Goal text is empty after normalization.
    #[error("goal is required")]
    EmptyGoal,

    /// Goal text exceeds the accepted length.
    #[error("goal is too long: {len} characters (max {max})")]
    GoalTooLong { len: usize, max: usize },

    /// No client reference was supplied.
    #[error("client reference is required")]
    MissingClientRef,

    /// Client reference does not resolve to a known client.
    #[error("unknown client: {0}")]
    UnknownClient(String),
}

/// Catalog authoring errors. Fatal at startup, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Two definitions share an id.
    #[error("duplicate task definition: {0}")]
    DuplicateTask(TaskDefId),

    /// A definition depends on an id that is not in the catalog.
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: TaskDefId, dependency: TaskDefId },

    /// The dependency relation contains a cycle through these tasks.
    #[error("dependency cycle among tasks: {}", join_ids(.0))]
    Cycle(Vec<TaskDefId>),

    /// The catalog has no synthesis task.
    #[error("catalog has no synthesis task")]
    MissingSynthesis,

    /// The catalog has more than one synthesis task.
    #[error("catalog has more than one synthesis task: {}", join_ids(.0))]
    MultipleSynthesis(Vec<TaskDefId>),

    /// The synthesis task must depend on every other task and only it may
    /// have dependencies.
    #[error("invalid fan-in shape at task '{0}'")]
    InvalidFanIn(TaskDefId),

    /// A deliverable references a task that is not in the catalog.
    #[error("deliverable '{deliverable}' references unknown task '{task}'")]
    UnknownSource { deliverable: String, task: TaskDefId },

    /// A deliverable lists no source tasks and could never be built.
    #[error("deliverable '{0}' has no source tasks")]
    EmptySources(String),

    /// The task id is not part of this graph.
    #[error("unknown task: {0}")]
    UnknownTask(TaskDefId),
}

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Intake validation failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Catalog or graph is malformed.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

fn join_ids(ids: &[TaskDefId]) -> String {
    ids.iter()
        .map(TaskDefId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_tasks() {
        let err = GraphError::Cycle(vec![TaskDefId::new("a"), TaskDefId::new("b")]);
        assert_eq!(err.to_string(), "dependency cycle among tasks: a, b");
    }

    #[test]
    fn test_validation_wraps_into_core_error() {
        let err: CoreError = ValidationError::EmptyGoal.into();
        assert!(matches!(err, CoreError::Validation(ValidationError::EmptyGoal)));
    }
}
