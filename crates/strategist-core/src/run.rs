//! Run record and lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deliverable::Deliverable;
use crate::error::CoreError;
use crate::ids::RunId;
use crate::spec::RunSpec;
use crate::status::{Confidence, RunStatus};
use crate::task::TaskInstance;

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Aborted by the caller; partial results discarded.
    Cancelled,
    /// Synthesis rejected its input.
    Synthesis(String),
    /// The graph could not be built or stalled.
    Graph(String),
    /// Persisting the artifact failed.
    Persistence(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Synthesis(detail) => write!(f, "Synthesis failure: {detail}"),
            Self::Graph(detail) => write!(f, "Graph error: {detail}"),
            Self::Persistence(detail) => write!(f, "Persistence failure: {detail}"),
        }
    }
}

/// One audited lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: RunStatus,
    pub to: RunStatus,
    /// What triggered the transition.
    pub event: String,
    pub at: DateTime<Utc>,
}

/// One end-to-end invocation of the engine for a single submission.
///
/// The run is the sole writer of its own status: every change goes through
/// [`Run::transition`], which rejects backwards moves and appends to the
/// audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub spec: RunSpec,
    status: RunStatus,
    pub task_instances: Vec<TaskInstance>,
    pub deliverables: Vec<Deliverable>,
    pub confidence: Option<Confidence>,
    pub failure: Option<FailureReason>,
    /// The run this one re-runs, if any.
    pub parent_run: Option<RunId>,
    transitions: Vec<StateTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Create a Draft run for a validated spec.
    pub fn new(spec: RunSpec) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::generate(),
            spec,
            status: RunStatus::Draft,
            task_instances: Vec::new(),
            deliverables: Vec::new(),
            confidence: None,
            failure: None,
            parent_run: None,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Spawn a fresh Draft run with the same spec. Only terminal runs can be
    /// re-run; the original is never moved back to an earlier state.
    pub fn rerun(&self) -> Result<Self, CoreError> {
        if !self.status.is_terminal() {
            return Err(CoreError::InvalidStateTransition {
                from: format!("{:?}", self.status),
                to: "Rerun".to_string(),
            });
        }
        let mut run = Self::new(self.spec.clone());
        run.parent_run = Some(self.id.clone());
        Ok(run)
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `to`, recording the triggering event.
    pub fn transition(
        &mut self,
        to: RunStatus,
        event: impl Into<String>,
    ) -> Result<&StateTransition, CoreError> {
        if !self.status.can_transition_to(to) {
            return Err(CoreError::InvalidStateTransition {
                from: format!("{:?}", self.status),
                to: format!("{:?}", to),
            });
        }
        let now = Utc::now();
        self.transitions.push(StateTransition {
            from: self.status,
            to,
            event: event.into(),
            at: now,
        });
        self.status = to;
        self.updated_at = now;
        Ok(&self.transitions[self.transitions.len() - 1])
    }

    /// Terminal success with the packaged results.
    pub fn complete(
        &mut self,
        instances: Vec<TaskInstance>,
        deliverables: Vec<Deliverable>,
        confidence: Confidence,
    ) -> Result<&StateTransition, CoreError> {
        if self.status != RunStatus::Running {
            return Err(CoreError::InvalidStateTransition {
                from: format!("{:?}", self.status),
                to: format!("{:?}", RunStatus::Complete),
            });
        }
        self.task_instances = instances;
        self.deliverables = deliverables;
        self.confidence = Some(confidence);
        self.transition(RunStatus::Complete, "packaging finished")
    }

    /// Terminal failure. Partial deliverables are dropped.
    pub fn fail(&mut self, reason: FailureReason) -> Result<&StateTransition, CoreError> {
        if !self.status.can_transition_to(RunStatus::Failed) {
            return Err(CoreError::InvalidStateTransition {
                from: format!("{:?}", self.status),
                to: format!("{:?}", RunStatus::Failed),
            });
        }
        self.deliverables.clear();
        self.confidence = None;
        let event = reason.to_string();
        self.failure = Some(reason);
        self.transition(RunStatus::Failed, event)
    }
}
