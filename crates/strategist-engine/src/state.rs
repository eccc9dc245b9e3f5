//! Shared application state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use strategist_core::{GraphError, Run, RunId, RunStatus, TaskCatalog};

use crate::clients::ClientDirectory;
use crate::config::Config;
use crate::executor::AgentExecutor;
use crate::packager::Manifest;
use crate::store::RunStore;

/// A run tracked by this process.
pub struct RunEntry {
    /// Latest snapshot. Task instances are refreshed as the scheduler
    /// reports progress.
    pub run: Run,

    /// Run-level cancellation token.
    pub cancel: CancellationToken,
}

/// Shared application state.
pub struct AppState {
    pub config: Config,

    /// Read-only for the lifetime of the process.
    pub catalog: Arc<TaskCatalog>,
    pub manifest: Arc<Manifest>,

    pub clients: Arc<dyn ClientDirectory>,
    pub executor: Arc<dyn AgentExecutor>,
    pub store: Arc<dyn RunStore>,

    /// Runs indexed by RunId.
    pub runs: RwLock<HashMap<RunId, RunEntry>>,

    /// One permit per run allowed in `Running`.
    pub run_slots: Arc<Semaphore>,
}

impl AppState {
    /// Create a new AppState wrapped in Arc.
    ///
    /// Rejects a catalog without the fan-out/fan-in shape and a manifest
    /// that references unknown tasks.
    pub fn new(
        config: Config,
        catalog: TaskCatalog,
        manifest: Manifest,
        clients: Arc<dyn ClientDirectory>,
        executor: Arc<dyn AgentExecutor>,
        store: Arc<dyn RunStore>,
    ) -> Result<Arc<Self>, GraphError> {
        catalog.validate_fan_in()?;
        manifest.validate(&catalog)?;
        let run_slots = Arc::new(Semaphore::new(config.max_concurrent_runs.max(1)));

        Ok(Arc::new(Self {
            config,
            catalog: Arc::new(catalog),
            manifest: Arc::new(manifest),
            clients,
            executor,
            store,
            runs: RwLock::new(HashMap::new()),
            run_slots,
        }))
    }

    /// Get the number of tracked runs.
    pub async fn run_count(&self) -> usize {
        self.runs.read().await.len()
    }

    /// Drop the oldest terminal runs beyond `config.retained_runs`.
    ///
    /// Returns the ids that were evicted. Runs still in flight are never
    /// touched.
    pub async fn prune_terminal_runs(&self) -> Vec<RunId> {
        let mut runs = self.runs.write().await;
        let mut terminal: Vec<(DateTime<Utc>, RunId)> = runs
            .iter()
            .filter(|(_, entry)| entry.run.is_terminal())
            .map(|(id, entry)| (entry.run.updated_at, id.clone()))
            .collect();
        if terminal.len() <= self.config.retained_runs {
            return Vec::new();
        }

        terminal.sort();
        let excess = terminal.len() - self.config.retained_runs;
        let evicted: Vec<RunId> = terminal.into_iter().take(excess).map(|(_, id)| id).collect();
        for id in &evicted {
            runs.remove(id);
        }
        evicted
    }

    /// Number of tracked runs per status.
    pub async fn runs_by_status(&self) -> HashMap<RunStatus, usize> {
        let runs = self.runs.read().await;
        let mut counts = HashMap::new();
        for entry in runs.values() {
            *counts.entry(entry.run.status()).or_insert(0) += 1;
        }
        counts
    }
}
