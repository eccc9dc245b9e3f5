//! Agent executor boundary.
//!
//! The engine treats each agent task as a capability with a typed
//! input/output contract. How the capability is implemented (a model call,
//! a rules engine, a remote service) is outside the engine; it only sees
//! [`AgentExecutor::invoke`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use strategist_core::{InputField, TaskDefId, TaskDefinition, TaskOutput};

mod http;
mod rules;

pub use http::HttpExecutor;
pub use rules::RulesExecutor;

/// Everything one task invocation is allowed to see.
///
/// Built by the scheduler from the task's declared inputs only: never the
/// full RunSpec, never sibling state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_id: TaskDefId,
    /// 1-based attempt number.
    pub attempt: u32,
    pub timeout_ms: u64,
    /// Declared RunSpec fields that have a value.
    pub inputs: BTreeMap<InputField, String>,
    /// Declared RunSpec fields that were left empty.
    pub missing_inputs: Vec<InputField>,
    /// Outputs of succeeded tasks this one declares a dependency on.
    pub upstream: BTreeMap<TaskDefId, TaskOutput>,
}

impl TaskRequest {
    pub fn input(&self, field: InputField) -> Option<&str> {
        self.inputs.get(&field).map(String::as_str)
    }
}

/// Errors returned by an executor implementation.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The capability ran and reported a failure.
    #[error("invocation failed: {0}")]
    Failed(String),

    /// The capability could not be reached or refused the work.
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    /// The capability answered with something that is not a TaskOutput.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Transport error talking to a remote capability.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A provider of agent task capabilities.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Run one attempt of `definition` with the given isolated request.
    ///
    /// The scheduler enforces `request.timeout_ms` by dropping the future.
    async fn invoke(
        &self,
        definition: &TaskDefinition,
        request: TaskRequest,
    ) -> Result<TaskOutput, ExecutorError>;
}
