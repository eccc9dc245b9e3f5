//! HTTP request and response types.

use serde::{Deserialize, Serialize};

use strategist_core::{Category, InputField, RunId, RunMode, RunStatus, TaskDefinition};

// ============================================================================
// Run types
// ============================================================================

/// Response body for run creation and re-runs.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRunResponse {
    pub run_id: RunId,
    pub status: RunStatus,
}

// ============================================================================
// Catalog types
// ============================================================================

/// One catalog entry.
#[derive(Debug, Serialize)]
pub struct CatalogEntryResponse {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub purpose: String,
    pub inputs: Vec<InputField>,
    pub outputs: Vec<String>,
    pub depends_on: Vec<String>,
    pub run_mode: RunMode,
    pub timeout_ms: u64,
    pub max_attempts: u32,
}

impl From<&TaskDefinition> for CatalogEntryResponse {
    fn from(def: &TaskDefinition) -> Self {
        Self {
            id: def.id.as_str().to_string(),
            name: def.name.clone(),
            category: def.category,
            purpose: def.purpose.clone(),
            inputs: def.inputs.clone(),
            outputs: def.outputs.clone(),
            depends_on: def.depends_on.iter().map(|d| d.as_str().to_string()).collect(),
            run_mode: def.run_mode,
            timeout_ms: def.timeout_ms,
            max_attempts: def.retry.max_attempts,
        }
    }
}

// ============================================================================
// Error types
// ============================================================================

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
