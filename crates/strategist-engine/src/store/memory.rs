//! In-memory store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use strategist_core::{Artifact, Run, RunId};

use super::{RunStore, StoreError};

/// Store backed by process memory. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    runs: RwLock<HashMap<RunId, Run>>,
    artifacts: RwLock<HashMap<RunId, Artifact>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of run records written.
    pub async fn run_count(&self) -> usize {
        self.runs.read().await.len()
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&run.id) {
            return Err(StoreError::Duplicate(format!("run {}", run.id)));
        }
        runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn save_artifact(&self, artifact: &Artifact) -> Result<(), StoreError> {
        let mut artifacts = self.artifacts.write().await;
        if artifacts.contains_key(&artifact.run_id) {
            return Err(StoreError::Duplicate(format!("artifact for run {}", artifact.run_id)));
        }
        artifacts.insert(artifact.run_id.clone(), artifact.clone());
        Ok(())
    }

    async fn artifacts_for(&self, run_id: &RunId) -> Result<Vec<Artifact>, StoreError> {
        Ok(self.artifacts.read().await.get(run_id).cloned().into_iter().collect())
    }

    async fn artifact_count(&self) -> Result<usize, StoreError> {
        Ok(self.artifacts.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sample_artifact;
    use crate::test_support::sample_spec;

    #[tokio::test]
    async fn test_artifact_is_append_only() {
        let store = MemoryStore::new();
        let run = Run::new(sample_spec());
        store.save_run(&run).await.unwrap();
        assert!(store.save_run(&run).await.is_err());

        store.save_artifact(&sample_artifact(&run.id)).await.unwrap();
        let err = store.save_artifact(&sample_artifact(&run.id)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.artifacts_for(&run.id).await.unwrap().len(), 1);
        assert_eq!(store.artifact_count().await.unwrap(), 1);
        assert_eq!(store.run_count().await, 1);
    }
}
