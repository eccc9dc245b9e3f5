//! Synthesis stage: the fan-in aggregation step.
//!
//! Takes every non-synthesis result of a run (failures included), resolves
//! conflicting recommendations by category precedence, ranks what survives
//! by impact/effort and derives the run's confidence and assumptions.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use strategist_core::{
    Category, Confidence, TaskDefId, TaskOutput, TaskResult, TaskState,
};

/// Synthesis failures. Fatal to the run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SynthesisError {
    /// A non-synthesis task was not terminal when synthesis was requested.
    #[error("fan-in barrier violated: task '{0}' is not terminal")]
    BarrierViolated(TaskDefId),

    /// A succeeded result carried no output payload.
    #[error("task '{0}' succeeded without an output")]
    MissingOutput(TaskDefId),

    /// A recommendation has no usable impact/effort ratio.
    #[error("task '{task}' declared an unrankable action: {action}")]
    UnrankableAction { task: TaskDefId, action: String },

    /// The synthesis task itself failed or timed out.
    #[error("synthesis aborted: {0}")]
    Aborted(String),
}

/// One terminal upstream result, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamResult {
    pub task_id: TaskDefId,
    pub name: String,
    pub category: Category,
    /// Catalog position, the last tie-break everywhere.
    pub position: usize,
    pub result: TaskResult,
}

impl UpstreamResult {
    pub fn output(&self) -> Option<&TaskOutput> {
        self.result.output.as_ref()
    }

    pub fn succeeded(&self) -> bool {
        self.result.is_success()
    }
}

/// All non-synthesis results of a run, in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisInput {
    pub results: Vec<UpstreamResult>,
}

impl SynthesisInput {
    pub fn get(&self, id: &TaskDefId) -> Option<&UpstreamResult> {
        self.results.iter().find(|r| &r.task_id == id)
    }

    pub fn succeeded(&self, id: &TaskDefId) -> bool {
        self.get(id).map(UpstreamResult::succeeded).unwrap_or(false)
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.succeeded()).count()
    }
}

/// A recommendation that survived conflict resolution, with its rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedAction {
    /// 1-based.
    pub rank: usize,
    pub action: String,
    pub task_id: TaskDefId,
    pub category: Category,
    pub score: f64,
}

/// One side of a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictClaimant {
    pub task_id: TaskDefId,
    pub category: Category,
    pub value: String,
    pub action: String,
}

/// How a conflict key was settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub key: String,
    pub winner: ConflictClaimant,
    /// Losing claims. Kept for annotation, left out of the ranking.
    pub superseded: Vec<ConflictClaimant>,
}

/// Result of the synthesis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisOutput {
    pub ranked_actions: Vec<RankedAction>,
    pub conflicts: Vec<ConflictResolution>,
    pub confidence: Confidence,
    /// Union of surviving outputs' assumptions, first occurrence wins.
    pub assumptions: Vec<String>,
    pub missing_info: Vec<String>,
    pub succeeded_by_category: BTreeMap<Category, Vec<TaskDefId>>,
    pub failed_tasks: Vec<TaskDefId>,
}

impl SynthesisOutput {
    /// Whether `task_id` lost a conflict on any key.
    pub fn is_superseded(&self, task_id: &TaskDefId) -> bool {
        self.conflicts
            .iter()
            .any(|c| c.superseded.iter().any(|s| &s.task_id == task_id))
    }

    /// The synthesis result expressed as a regular task output, attached to
    /// the synthesis task instance.
    pub fn to_task_output(&self) -> TaskOutput {
        let summary = format!(
            "{} actions ranked, {} conflicts resolved, confidence {}",
            self.ranked_actions.len(),
            self.conflicts.len(),
            self.confidence.label()
        );
        let ranked = self
            .ranked_actions
            .iter()
            .map(|a| {
                format!(
                    "{}. {} ({}, score {:.2})",
                    a.rank,
                    a.action,
                    a.category.label(),
                    a.score
                )
            })
            .collect();

        let mut output = TaskOutput::new(summary)
            .with_section("Ranked actions", ranked)
            .with_section("Confidence", vec![self.confidence.label().to_string()])
            .with_section("Assumptions", self.assumptions.clone());
        output.assumptions = self.assumptions.clone();
        output.missing_info = self.missing_info.clone();
        output
    }
}

struct Candidate<'a> {
    upstream: &'a UpstreamResult,
    index: usize,
    score: f64,
}

/// Run the synthesis stage over a complete input.
pub fn synthesize(input: &SynthesisInput) -> Result<SynthesisOutput, SynthesisError> {
    let mut candidates = Vec::new();
    let mut succeeded_by_category: BTreeMap<Category, Vec<TaskDefId>> = BTreeMap::new();
    let mut failed_tasks = Vec::new();
    let mut measurement_failed = false;
    let mut missing_info = Vec::new();

    for upstream in &input.results {
        match upstream.result.status {
            TaskState::Succeeded => {
                let output = upstream
                    .output()
                    .ok_or_else(|| SynthesisError::MissingOutput(upstream.task_id.clone()))?;
                succeeded_by_category
                    .entry(upstream.category)
                    .or_default()
                    .push(upstream.task_id.clone());
                for (index, recommendation) in output.recommendations.iter().enumerate() {
                    let score = recommendation.score().ok_or_else(|| {
                        SynthesisError::UnrankableAction {
                            task: upstream.task_id.clone(),
                            action: recommendation.action.clone(),
                        }
                    })?;
                    candidates.push(Candidate { upstream, index, score });
                }
            }
            TaskState::Failed | TaskState::TimedOut => {
                failed_tasks.push(upstream.task_id.clone());
                measurement_failed |= upstream.category == Category::Measurement;
                let reason = upstream.result.error.as_deref().unwrap_or("no error recorded");
                missing_info.push(format!("{} produced no output ({})", upstream.name, reason));
            }
            _ => return Err(SynthesisError::BarrierViolated(upstream.task_id.clone())),
        }
    }

    let (conflicts, superseded) = resolve_conflicts(&candidates);
    let mut surviving: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| !superseded.contains(&(c.upstream.position, c.index)))
        .collect();
    surviving.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.upstream.category.precedence().cmp(&b.upstream.category.precedence()))
            .then_with(|| a.upstream.position.cmp(&b.upstream.position))
            .then_with(|| a.index.cmp(&b.index))
    });

    let ranked_actions = surviving
        .iter()
        .enumerate()
        .filter_map(|(i, c)| {
            let recommendation = c.upstream.output()?.recommendations.get(c.index)?;
            Some(RankedAction {
                rank: i + 1,
                action: recommendation.action.clone(),
                task_id: c.upstream.task_id.clone(),
                category: c.upstream.category,
                score: c.score,
            })
        })
        .collect();

    let mut assumptions = Vec::new();
    for output in input.results.iter().filter_map(UpstreamResult::output) {
        for assumption in &output.assumptions {
            push_unique(&mut assumptions, assumption);
        }
        for item in &output.missing_info {
            push_unique(&mut missing_info, item);
        }
    }

    Ok(SynthesisOutput {
        ranked_actions,
        conflicts,
        confidence: Confidence::from_failures(failed_tasks.len(), measurement_failed),
        assumptions,
        missing_info,
        succeeded_by_category,
        failed_tasks,
    })
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|existing| existing == item) {
        list.push(item.to_string());
    }
}

/// Precedence order for claims on one key: category, then catalog position,
/// then declaration order within the output.
fn claim_order(a: &Candidate, b: &Candidate) -> Ordering {
    a.upstream
        .category
        .precedence()
        .cmp(&b.upstream.category.precedence())
        .then_with(|| a.upstream.position.cmp(&b.upstream.position))
        .then_with(|| a.index.cmp(&b.index))
}

/// Settle every conflict key. Also returns the losing recommendations as
/// `(catalog position, recommendation index)` pairs.
fn resolve_conflicts(
    candidates: &[Candidate],
) -> (Vec<ConflictResolution>, HashSet<(usize, usize)>) {
    let mut by_key: BTreeMap<&str, Vec<&Candidate>> = BTreeMap::new();
    for candidate in candidates {
        let claim = candidate
            .upstream
            .output()
            .and_then(|o| o.recommendations.get(candidate.index))
            .and_then(|r| r.conflict.as_ref());
        if let Some(claim) = claim {
            by_key.entry(claim.key.as_str()).or_default().push(candidate);
        }
    }

    let claimant = |c: &Candidate| -> Option<ConflictClaimant> {
        let recommendation = c.upstream.output()?.recommendations.get(c.index)?;
        Some(ConflictClaimant {
            task_id: c.upstream.task_id.clone(),
            category: c.upstream.category,
            value: recommendation.conflict.as_ref()?.value.clone(),
            action: recommendation.action.clone(),
        })
    };

    let mut resolutions = Vec::new();
    let mut losers = HashSet::new();
    for (key, mut claims) in by_key {
        claims.sort_by(|a, b| claim_order(a, b));
        let Some(winner) = claims.first().and_then(|c| claimant(c)) else {
            continue;
        };
        let mut superseded = Vec::new();
        for candidate in &claims[1..] {
            let Some(claim) = claimant(candidate) else {
                continue;
            };
            if claim.value != winner.value {
                losers.insert((candidate.upstream.position, candidate.index));
                superseded.push(claim);
            }
        }
        if superseded.is_empty() {
            continue;
        }
        resolutions.push(ConflictResolution {
            key: key.to_string(),
            winner,
            superseded,
        });
    }
    (resolutions, losers)
}
