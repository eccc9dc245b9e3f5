//! Server configuration.

use std::path::{Path, PathBuf};

use thiserror::Error;

use strategist_core::{GraphError, TaskCatalog};

use crate::clients::{ClientProfile, StaticClientDirectory};
use crate::packager::Manifest;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Engine server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server bind address.
    pub http_addr: String,

    /// Runs allowed in `Running` at once. Others wait in `Scheduled`.
    pub max_concurrent_runs: usize,

    /// Terminal runs kept in memory. Older ones are dropped from the run
    /// table; their artifacts stay in the store.
    pub retained_runs: usize,

    /// Attempts in flight per run. `None` is unbounded.
    pub task_concurrency: Option<usize>,

    /// Catalog table. Reference catalog when unset.
    pub catalog_path: Option<PathBuf>,

    /// Deliverable manifest. Reference manifest when unset.
    pub manifest_path: Option<PathBuf>,

    /// Client directory. Demo directory when unset.
    pub clients_path: Option<PathBuf>,

    /// JSON file store root. In-memory store when unset.
    pub data_dir: Option<PathBuf>,

    /// Remote capability provider. Built-in rules executor when unset.
    pub executor_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8080".to_string(),
            max_concurrent_runs: 4,
            retained_runs: 1000,
            task_concurrency: None,
            catalog_path: None,
            manifest_path: None,
            clients_path: None,
            data_dir: None,
            executor_url: None,
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl Config {
    /// Load the task catalog. Cycles and unknown dependencies are rejected
    /// while parsing.
    pub fn load_catalog(&self) -> Result<TaskCatalog, ConfigError> {
        match &self.catalog_path {
            Some(path) => read_json(path),
            None => Ok(TaskCatalog::reference()?),
        }
    }

    pub fn load_manifest(&self) -> Result<Manifest, ConfigError> {
        match &self.manifest_path {
            Some(path) => read_json(path),
            None => Ok(Manifest::reference()),
        }
    }

    pub fn load_clients(&self) -> Result<StaticClientDirectory, ConfigError> {
        match &self.clients_path {
            Some(path) => {
                let clients: Vec<ClientProfile> = read_json(path)?;
                Ok(StaticClientDirectory::new(clients))
            }
            None => Ok(StaticClientDirectory::demo()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_use_reference_tables() {
        let config = Config::default();
        assert_eq!(config.load_catalog().unwrap().len(), 16);
        assert_eq!(config.load_manifest().unwrap().deliverables.len(), 10);
        assert_eq!(config.load_clients().unwrap().len(), 1);
    }

    #[test]
    fn test_cyclic_catalog_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"[
                {"id": "a", "name": "A", "category": "Growth", "depends_on": ["b"]},
                {"id": "b", "name": "B", "category": "Growth", "depends_on": ["a"]}
            ]"#,
        )
        .unwrap();
        let config = Config {
            catalog_path: Some(path),
            ..Config::default()
        };
        let err = config.load_catalog().unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("dependency cycle"));
    }

    #[test]
    fn test_missing_file_reported() {
        let config = Config {
            clients_path: Some(PathBuf::from("/nonexistent/clients.json")),
            ..Config::default()
        };
        assert!(matches!(config.load_clients(), Err(ConfigError::Read { .. })));
    }
}
