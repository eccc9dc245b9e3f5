//! JSON file store.
//!
//! Layout under the data directory:
//! - `runs/{run_id}.json`
//! - `artifacts/{run_id}.json`
//!
//! Files are created with `create_new`, so nothing is ever overwritten.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use strategist_core::{Artifact, Run, RunId};

use super::{RunStore, StoreError};

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join("runs")).await?;
        fs::create_dir_all(root.join("artifacts")).await?;
        Ok(Self { root })
    }

    fn run_path(&self, id: &RunId) -> PathBuf {
        self.root.join("runs").join(format!("{}.json", id))
    }

    fn artifact_path(&self, run_id: &RunId) -> PathBuf {
        self.root.join("artifacts").join(format!("{}.json", run_id))
    }
}

async fn write_new(path: &Path, bytes: &[u8], key: String) -> Result<(), StoreError> {
    let file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await;
    let mut file = match file {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(StoreError::Duplicate(key)),
        Err(e) => return Err(e.into()),
    };
    file.write_all(bytes).await?;
    file.flush().await?;
    debug!(path = %path.display(), "Wrote record");
    Ok(())
}

#[async_trait]
impl RunStore for FileStore {
    async fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(run)?;
        write_new(&self.run_path(&run.id), &bytes, format!("run {}", run.id)).await
    }

    async fn save_artifact(&self, artifact: &Artifact) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(artifact)?;
        write_new(
            &self.artifact_path(&artifact.run_id),
            &bytes,
            format!("artifact for run {}", artifact.run_id),
        )
        .await
    }

    async fn artifacts_for(&self, run_id: &RunId) -> Result<Vec<Artifact>, StoreError> {
        match fs::read(self.artifact_path(run_id)).await {
            Ok(bytes) => Ok(vec![serde_json::from_slice(&bytes)?]),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn artifact_count(&self) -> Result<usize, StoreError> {
        let mut entries = fs::read_dir(self.root.join("artifacts")).await?;
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                count += 1;
            }
        }
        Ok(count)
    }
}
