//! Overnight Strategist Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Storage
//! - Runtime specifics
//!
//! All types here represent the business domain of an overnight run: the
//! validated intake, the fixed task catalog, per-run task state, the
//! packaged deliverables and the run lifecycle.

pub mod catalog;
pub mod deliverable;
pub mod error;
pub mod ids;
pub mod run;
pub mod spec;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use catalog::{
    Category, RetryPolicy, RunMode, TaskCatalog, TaskDefinition, MEASUREMENT_INTEGRITY_TASK,
    SYNTHESIS_TASK,
};
pub use deliverable::{Artifact, Deliverable, DeliverableContent, DeliverableSection};
pub use error::{CoreError, GraphError, ValidationError};
pub use ids::{ArtifactId, RunId, TaskDefId};
pub use run::{FailureReason, Run, StateTransition};
pub use spec::{Constraints, ExpertProfile, InputField, RunIntake, RunSpec, RunSpecBuilder};
pub use status::{Confidence, DeliverableStatus, RunStatus, TaskState};
pub use task::{ConflictClaim, Recommendation, TaskInstance, TaskOutput, TaskResult};
