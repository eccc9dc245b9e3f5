//! Persistence boundary.
//!
//! The engine writes twice per run: the Run record once at creation and the
//! Artifact once at completion. Artifacts are append-only; a run has at most
//! one.

use async_trait::async_trait;
use thiserror::Error;

use strategist_core::{Artifact, Run, RunId};

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record with this key was already written.
    #[error("duplicate record: {0}")]
    Duplicate(String),
}

/// A storage collaborator for runs and artifacts.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Write the Run/RunSpec record. Called once, at run creation.
    async fn save_run(&self, run: &Run) -> Result<(), StoreError>;

    /// Write the artifact of a completed run. Rejects a second artifact for
    /// the same run.
    async fn save_artifact(&self, artifact: &Artifact) -> Result<(), StoreError>;

    /// Artifacts written for `run_id`.
    async fn artifacts_for(&self, run_id: &RunId) -> Result<Vec<Artifact>, StoreError>;

    /// Total artifacts written.
    async fn artifact_count(&self) -> Result<usize, StoreError>;
}

#[cfg(test)]
pub(crate) fn sample_artifact(run_id: &RunId) -> Artifact {
    use strategist_core::{ArtifactId, Confidence};

    Artifact {
        id: ArtifactId::generate(),
        run_id: run_id.clone(),
        client_name: "Acme Dental".to_string(),
        deliverables: Vec::new(),
        confidence: Confidence::High,
        assumptions: vec!["Budgets are controllable".to_string()],
        missing_info: Vec::new(),
        brief_markdown: "# Morning Brief: Acme Dental\n".to_string(),
        generated_at: chrono::Utc::now(),
    }
}
