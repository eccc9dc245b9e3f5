//! Task instance, result and output types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{Category, TaskDefinition};
use crate::error::CoreError;
use crate::ids::TaskDefId;
use crate::status::TaskState;

/// A claim that competes with other tasks' claims on the same key, e.g.
/// two tasks proposing different budget allocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictClaim {
    pub key: String,
    pub value: String,
}

/// One recommended action with its impact and effort estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: String,
    pub impact: f64,
    pub effort: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictClaim>,
}

impl Recommendation {
    pub fn new(action: impl Into<String>, impact: f64, effort: f64) -> Self {
        Self {
            action: action.into(),
            impact,
            effort,
            conflict: None,
        }
    }

    /// Attach a conflict key/value to this recommendation.
    pub fn claims(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.conflict = Some(ConflictClaim {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Impact/effort ratio, `None` when the estimates cannot be ranked.
    pub fn score(&self) -> Option<f64> {
        if !self.impact.is_finite() || !self.effort.is_finite() || self.effort <= 0.0 {
            return None;
        }
        Some(self.impact / self.effort)
    }
}

/// Structured output of one agent task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOutput {
    pub summary: String,
    /// Content keyed by output-kind tag.
    pub content: BTreeMap<String, Vec<String>>,
    pub recommendations: Vec<Recommendation>,
    pub assumptions: Vec<String>,
    /// Information the task needed but did not have.
    pub missing_info: Vec<String>,
}

impl TaskOutput {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    pub fn with_section(mut self, tag: impl Into<String>, items: Vec<String>) -> Self {
        self.content.insert(tag.into(), items);
        self
    }

    pub fn with_recommendation(mut self, recommendation: Recommendation) -> Self {
        self.recommendations.push(recommendation);
        self
    }

    pub fn with_assumption(mut self, assumption: impl Into<String>) -> Self {
        self.assumptions.push(assumption.into());
        self
    }

    pub fn with_missing_info(mut self, item: impl Into<String>) -> Self {
        self.missing_info.push(item.into());
        self
    }

    /// Declared output tags that this output does not contain.
    pub fn missing_outputs(&self, declared: &[String]) -> Vec<String> {
        declared
            .iter()
            .filter(|tag| !self.content.contains_key(*tag))
            .cloned()
            .collect()
    }
}

/// Final result attached to a TaskInstance. Immutable once attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskDefId,
    /// Terminal state the result represents.
    pub status: TaskState,
    pub output: Option<TaskOutput>,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

impl TaskResult {
    pub fn succeeded(
        task_id: TaskDefId,
        output: TaskOutput,
        attempts: u32,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            task_id,
            status: TaskState::Succeeded,
            output: Some(output),
            attempts,
            elapsed_ms,
            error: None,
        }
    }

    pub fn failed(
        task_id: TaskDefId,
        error: impl Into<String>,
        attempts: u32,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            task_id,
            status: TaskState::Failed,
            output: None,
            attempts,
            elapsed_ms,
            error: Some(error.into()),
        }
    }

    pub fn timed_out(
        task_id: TaskDefId,
        error: impl Into<String>,
        attempts: u32,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            status: TaskState::TimedOut,
            ..Self::failed(task_id, error, attempts, elapsed_ms)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskState::Succeeded
    }
}

/// Per-run state of one catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub task_id: TaskDefId,
    pub name: String,
    pub category: Category,
    pub state: TaskState,
    /// Attempts started so far.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub result: Option<TaskResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskInstance {
    /// Create a Pending instance for a definition.
    pub fn new(definition: &TaskDefinition) -> Self {
        Self {
            task_id: definition.id.clone(),
            name: definition.name.clone(),
            category: definition.category,
            state: TaskState::Pending,
            attempts: 0,
            last_error: None,
            result: None,
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, to: TaskState) -> Result<(), CoreError> {
        use TaskState::*;
        let allowed = matches!(
            (self.state, to),
            (Pending, Ready)
                | (Ready, Running)
                | (Running, Retrying)
                | (Retrying, Ready)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, TimedOut)
        );
        if !allowed {
            return Err(CoreError::InvalidStateTransition {
                from: format!("{:?}", self.state),
                to: format!("{:?}", to),
            });
        }
        self.state = to;
        Ok(())
    }

    /// Queue the instance for dispatch.
    pub fn mark_ready(&mut self) -> Result<(), CoreError> {
        self.transition(TaskState::Ready)
    }

    /// Begin a new attempt. Returns the attempt number (1-based).
    pub fn start_attempt(&mut self) -> Result<u32, CoreError> {
        self.transition(TaskState::Running)?;
        self.attempts += 1;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        Ok(self.attempts)
    }

    /// Record a failed attempt that will be retried.
    pub fn mark_retrying(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        self.transition(TaskState::Retrying)?;
        self.last_error = Some(error.into());
        Ok(())
    }

    /// Attach the final result.
    pub fn finish(&mut self, result: TaskResult) -> Result<(), CoreError> {
        if !result.status.is_terminal() || self.result.is_some() {
            return Err(CoreError::InvalidStateTransition {
                from: format!("{:?}", self.state),
                to: format!("{:?}", result.status),
            });
        }
        self.transition(result.status)?;
        if let Some(error) = &result.error {
            self.last_error = Some(error.clone());
        }
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// The output, present only when the task succeeded.
    pub fn output(&self) -> Option<&TaskOutput> {
        self.result.as_ref().and_then(|r| r.output.as_ref())
    }
}
