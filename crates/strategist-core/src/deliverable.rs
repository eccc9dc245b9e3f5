//! Packaged deliverables and the persisted artifact snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ArtifactId, RunId, TaskDefId};
use crate::status::{Confidence, DeliverableStatus};

/// A titled block of a deliverable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverableSection {
    pub heading: String,
    pub items: Vec<String>,
}

/// Body of a deliverable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverableContent {
    pub summary: String,
    pub sections: Vec<DeliverableSection>,
    /// Inputs that were needed but absent, one line each.
    pub missing_inputs: Vec<String>,
}

/// A named, user-facing output derived from one or more task results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliverable {
    pub title: String,
    /// Document type, e.g. "1-pager" or "Operating SOP".
    pub kind: String,
    pub source_tasks: Vec<TaskDefId>,
    pub status: DeliverableStatus,
    pub content: DeliverableContent,
}

/// Persisted snapshot of a completed run's deliverables.
///
/// Append-only: a re-run produces a new artifact under a new run id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub run_id: RunId,
    pub client_name: String,
    pub deliverables: Vec<Deliverable>,
    pub confidence: Confidence,
    pub assumptions: Vec<String>,
    pub missing_info: Vec<String>,
    /// Morning brief rendered as markdown.
    pub brief_markdown: String,
    pub generated_at: DateTime<Utc>,
}

impl Artifact {
    /// Count deliverables with the given status.
    pub fn count(&self, status: DeliverableStatus) -> usize {
        self.deliverables.iter().filter(|d| d.status == status).count()
    }
}
