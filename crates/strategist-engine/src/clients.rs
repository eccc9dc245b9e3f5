//! Client directory boundary.
//!
//! Account management lives outside the engine. The engine only needs to
//! resolve a `client_ref` to a display profile at intake.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the engine knows about a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub client_ref: String,
    pub name: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub location: String,
}

/// Resolves client references.
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn resolve(&self, client_ref: &str) -> Option<ClientProfile>;
}

/// Directory loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticClientDirectory {
    clients: HashMap<String, ClientProfile>,
}

impl StaticClientDirectory {
    pub fn new(clients: Vec<ClientProfile>) -> Self {
        Self {
            clients: clients
                .into_iter()
                .map(|c| (c.client_ref.clone(), c))
                .collect(),
        }
    }

    /// A directory with one demo client.
    pub fn demo() -> Self {
        Self::new(vec![ClientProfile {
            client_ref: "acme-dental".to_string(),
            name: "Acme Dental".to_string(),
            industry: "Dental".to_string(),
            location: "Austin, TX".to_string(),
        }])
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait]
impl ClientDirectory for StaticClientDirectory {
    async fn resolve(&self, client_ref: &str) -> Option<ClientProfile> {
        self.clients.get(client_ref).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_directory_resolves_acme() {
        let directory = StaticClientDirectory::demo();
        let acme = directory.resolve("acme-dental").await.unwrap();
        assert_eq!(acme.name, "Acme Dental");
        assert!(directory.resolve("globex").await.is_none());
    }
}
