//! Deliverable packager.
//!
//! A pure function from (SynthesisInput, SynthesisOutput) to the ordered
//! deliverable list described by a [`Manifest`]. No clocks, no hashing, no
//! randomness: identical inputs give identical deliverables.

use serde::{Deserialize, Serialize};

use strategist_core::{
    Deliverable, DeliverableContent, DeliverableSection, DeliverableStatus, GraphError,
    TaskCatalog, TaskDefId, SYNTHESIS_TASK,
};

use crate::synthesis::{SynthesisInput, SynthesisOutput};

/// Number of actions carried into a deliverable fed by synthesis.
const TOP_ACTIONS: usize = 5;

/// One manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverableSpec {
    pub title: String,
    pub kind: String,
    #[serde(default)]
    pub description: String,
    /// Tasks whose outputs feed this deliverable.
    pub sources: Vec<TaskDefId>,
    /// Sources without which the deliverable is `Blocked`.
    #[serde(default)]
    pub hard_required: Vec<TaskDefId>,
}

impl DeliverableSpec {
    fn new(title: &str, kind: &str, description: &str, sources: &[&str]) -> Self {
        Self {
            title: title.to_string(),
            kind: kind.to_string(),
            description: description.to_string(),
            sources: sources.iter().map(|s| TaskDefId::new(*s)).collect(),
            hard_required: Vec::new(),
        }
    }

    fn requires(mut self, ids: &[&str]) -> Self {
        self.hard_required = ids.iter().map(|s| TaskDefId::new(*s)).collect();
        self
    }
}

/// Fixed, ordered list of deliverables for a run type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    pub deliverables: Vec<DeliverableSpec>,
}

impl Manifest {
    /// The morning package for the reference catalog.
    pub fn reference() -> Self {
        let deliverables = vec![
            DeliverableSpec::new(
                "Executive Brief",
                "1-pager",
                "Short summary, top drivers, risks and next actions.",
                &[SYNTHESIS_TASK],
            )
            .requires(&[SYNTHESIS_TASK]),
            DeliverableSpec::new(
                "90-Day Growth Strategy",
                "Strategy doc",
                "Positioning, channel plan, budget posture and service-line focus.",
                &[
                    "intent-demand-capture",
                    "messaging-positioning",
                    "competitive-pressure",
                    "unit-economics",
                    "capacity-scheduling",
                ],
            ),
            DeliverableSpec::new(
                "2-Week Experiment Plan",
                "Test plan",
                "Experiments with hypotheses, success metrics and effort/impact.",
                &["experiment-designer", "anomalies-baseline"],
            )
            .requires(&["experiment-designer"]),
            DeliverableSpec::new(
                "Messaging Angles (x3)",
                "Creative brief",
                "Three angles, objections handled and suggested proof points.",
                &["messaging-positioning", "pricing-insurance"],
            )
            .requires(&["messaging-positioning"]),
            DeliverableSpec::new(
                "Landing Page Outline",
                "Wire outline",
                "Section-by-section structure optimized for bookings.",
                &["landing-experience", "messaging-positioning"],
            )
            .requires(&["landing-experience"]),
            DeliverableSpec::new(
                "Measurement & Attribution Fixes",
                "Ops plan",
                "Tracking, call routing, lead-quality rubric and guardrails.",
                &["measurement-integrity", "anomalies-baseline"],
            )
            .requires(&["measurement-integrity"]),
            DeliverableSpec::new(
                "Incrementality Test Options",
                "Playbook",
                "Feasible holdout and geo split options for local businesses.",
                &["incrementality-options", "measurement-integrity"],
            ),
            DeliverableSpec::new(
                "Front Desk + After-Hours Workflow",
                "Operating SOP",
                "Missed-call recovery loop, scheduling scripts and SLA.",
                &["front-desk-workflow", "capacity-scheduling", "patient-experience"],
            ),
            DeliverableSpec::new(
                "Reputation & Reviews Plan",
                "Operating SOP",
                "Review capture, response templates and service recovery loop.",
                &["reputation-reviews", "patient-experience"],
            ),
            DeliverableSpec::new(
                "Retention & Reactivation Plan",
                "Lifecycle plan",
                "Recall cadence, reactivation messaging and referral prompts.",
                &["retention-reactivation", "reputation-reviews"],
            ),
        ];
        Self { deliverables }
    }

    /// Every source and hard-required id must name a catalog task, and
    /// hard-required ids must also be sources.
    pub fn validate(&self, catalog: &TaskCatalog) -> Result<(), GraphError> {
        for spec in &self.deliverables {
            if spec.sources.is_empty() {
                return Err(GraphError::EmptySources(spec.title.clone()));
            }
            for id in spec.sources.iter().chain(spec.hard_required.iter()) {
                if !catalog.contains(id) || !spec.sources.contains(id) {
                    return Err(GraphError::UnknownSource {
                        deliverable: spec.title.clone(),
                        task: id.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Build every deliverable of `manifest`, in manifest order.
///
/// A source that is not part of `input` is the synthesis task itself, which
/// by construction succeeded when this is called.
pub fn package(
    manifest: &Manifest,
    input: &SynthesisInput,
    output: &SynthesisOutput,
) -> Vec<Deliverable> {
    manifest
        .deliverables
        .iter()
        .map(|spec| package_one(spec, input, output))
        .collect()
}

fn source_succeeded(input: &SynthesisInput, id: &TaskDefId) -> bool {
    input.get(id).map(|r| r.succeeded()).unwrap_or(true)
}

fn status_for(spec: &DeliverableSpec, input: &SynthesisInput) -> DeliverableStatus {
    let succeeded = spec
        .sources
        .iter()
        .filter(|id| source_succeeded(input, id))
        .count();
    let hard_missing = spec
        .hard_required
        .iter()
        .any(|id| !source_succeeded(input, id));

    if hard_missing || succeeded == 0 {
        DeliverableStatus::Blocked
    } else if succeeded == spec.sources.len() {
        DeliverableStatus::Ready
    } else {
        DeliverableStatus::Draft
    }
}

fn package_one(
    spec: &DeliverableSpec,
    input: &SynthesisInput,
    output: &SynthesisOutput,
) -> Deliverable {
    let status = status_for(spec, input);
    let mut sections = Vec::new();
    let mut missing_inputs = Vec::new();
    let mut uses_synthesis = false;

    for id in &spec.sources {
        let Some(upstream) = input.get(id) else {
            uses_synthesis = true;
            continue;
        };
        match upstream.output() {
            Some(task_output) if upstream.succeeded() => {
                for (tag, items) in &task_output.content {
                    sections.push(DeliverableSection {
                        heading: tag.clone(),
                        items: items.clone(),
                    });
                }
                for item in &task_output.missing_info {
                    push_unique(&mut missing_inputs, item);
                }
            }
            _ => {
                let reason = upstream.result.error.as_deref().unwrap_or("no output");
                push_unique(
                    &mut missing_inputs,
                    &format!("{} unavailable: {}", upstream.name, reason),
                );
            }
        }
    }

    let actions: Vec<String> = output
        .ranked_actions
        .iter()
        .filter(|a| uses_synthesis || spec.sources.contains(&a.task_id))
        .take(if uses_synthesis { TOP_ACTIONS } else { usize::MAX })
        .map(|a| format!("#{} {} ({})", a.rank, a.action, a.category.label()))
        .collect();
    if !actions.is_empty() {
        sections.push(DeliverableSection {
            heading: "Recommended actions".to_string(),
            items: actions,
        });
    }

    let superseded: Vec<String> = output
        .conflicts
        .iter()
        .flat_map(|c| c.superseded.iter().map(move |s| (c, s)))
        .filter(|(_, s)| uses_synthesis || spec.sources.contains(&s.task_id))
        .map(|(c, s)| {
            format!(
                "{} ({}) superseded on {}: {} keeps \"{}\" over \"{}\"",
                s.action,
                s.category.label(),
                c.key,
                c.winner.category.label(),
                c.winner.value,
                s.value
            )
        })
        .collect();
    if !superseded.is_empty() {
        sections.push(DeliverableSection {
            heading: "Superseded recommendations".to_string(),
            items: superseded,
        });
    }

    if uses_synthesis {
        sections.push(DeliverableSection {
            heading: "Confidence".to_string(),
            items: vec![output.confidence.label().to_string()],
        });
        sections.push(DeliverableSection {
            heading: "Assumptions".to_string(),
            items: output.assumptions.clone(),
        });
        for item in &output.missing_info {
            push_unique(&mut missing_inputs, item);
        }
    }

    let available = spec
        .sources
        .iter()
        .filter(|id| source_succeeded(input, id))
        .count();
    let summary = match status {
        DeliverableStatus::Ready => spec.description.clone(),
        _ => format!(
            "{} Built from {} of {} sources.",
            spec.description,
            available,
            spec.sources.len()
        ),
    };

    Deliverable {
        title: spec.title.clone(),
        kind: spec.kind.clone(),
        source_tasks: spec.sources.clone(),
        status,
        content: DeliverableContent {
            summary,
            sections,
            missing_inputs,
        },
    }
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|existing| existing == item) {
        list.push(item.to_string());
    }
}
