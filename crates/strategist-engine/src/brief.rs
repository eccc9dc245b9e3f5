//! Morning brief rendering.

use std::fmt::Write;

use strategist_core::{Deliverable, DeliverableStatus, RunSpec};

use crate::synthesis::SynthesisOutput;

const NEXT_ACTIONS: usize = 4;

/// Render the markdown morning brief stored with each artifact.
pub fn render_brief(
    client_name: &str,
    spec: &RunSpec,
    synthesis: &SynthesisOutput,
    deliverables: &[Deliverable],
) -> String {
    let mut md = String::new();
    let constraints = spec.constraints();

    writeln!(md, "# Morning Brief: {}", client_name).ok();
    writeln!(md).ok();
    writeln!(md, "## Executive summary").ok();
    writeln!(md, "Your goal is: **{}**.", spec.goal()).ok();
    if !constraints.kpi.is_empty() {
        writeln!(md, "Primary KPI: {}.", constraints.kpi).ok();
    }
    let completed: usize = synthesis.succeeded_by_category.values().map(Vec::len).sum();
    let expected = completed + synthesis.failed_tasks.len();
    writeln!(
        md,
        "{} of {} specialist analyses completed. {} deliverables ready, {} in draft, {} blocked.",
        completed,
        expected,
        count(deliverables, DeliverableStatus::Ready),
        count(deliverables, DeliverableStatus::Draft),
        count(deliverables, DeliverableStatus::Blocked),
    )
    .ok();
    writeln!(md).ok();

    writeln!(md, "## What we'll do next").ok();
    for action in synthesis.ranked_actions.iter().take(NEXT_ACTIONS) {
        writeln!(md, "{}) {} ({})", action.rank, action.action, action.category.label()).ok();
    }
    writeln!(md).ok();

    if !synthesis.conflicts.is_empty() {
        writeln!(md, "## Resolved conflicts").ok();
        for conflict in &synthesis.conflicts {
            let losers: Vec<&str> = conflict
                .superseded
                .iter()
                .map(|s| s.category.label())
                .collect();
            writeln!(
                md,
                "- {}: {} wins with \"{}\" (superseded: {})",
                conflict.key,
                conflict.winner.category.label(),
                conflict.winner.value,
                losers.join(", ")
            )
            .ok();
        }
        writeln!(md).ok();
    }

    writeln!(md, "## Deliverables").ok();
    for deliverable in deliverables {
        writeln!(
            md,
            "- {} ({}): {:?}",
            deliverable.title, deliverable.kind, deliverable.status
        )
        .ok();
    }
    writeln!(md).ok();

    writeln!(md, "## Assumptions + confidence").ok();
    for assumption in &synthesis.assumptions {
        writeln!(md, "- {}", assumption).ok();
    }
    writeln!(md, "- Confidence: **{}**", synthesis.confidence.label()).ok();

    if !synthesis.missing_info.is_empty() {
        writeln!(md).ok();
        writeln!(md, "## Missing information").ok();
        for item in &synthesis.missing_info {
            writeln!(md, "- {}", item).ok();
        }
    }

    md
}

fn count(deliverables: &[Deliverable], status: DeliverableStatus) -> usize {
    deliverables.iter().filter(|d| d.status == status).count()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use strategist_core::{Category, Confidence, TaskDefId};

    use super::*;
    use crate::synthesis::RankedAction;
    use crate::test_support::sample_spec;

    #[test]
    fn test_brief_sections() {
        let synthesis = SynthesisOutput {
            ranked_actions: vec![RankedAction {
                rank: 1,
                action: "Bias spend toward high-LTV services".to_string(),
                task_id: TaskDefId::new("unit-economics"),
                category: Category::Finance,
                score: 4.5,
            }],
            conflicts: vec![],
            confidence: Confidence::Medium,
            assumptions: vec!["Budgets are controllable".to_string()],
            missing_info: vec!["Top 3 zip codes".to_string()],
            succeeded_by_category: BTreeMap::from([(
                Category::Finance,
                vec![TaskDefId::new("unit-economics")],
            )]),
            failed_tasks: vec![TaskDefId::new("pricing-insurance")],
        };

        let md = render_brief("Acme Dental", &sample_spec(), &synthesis, &[]);
        assert!(md.starts_with("# Morning Brief: Acme Dental\n"));
        assert!(md.contains("1 of 2 specialist analyses completed"));
        assert!(md.contains("1) Bias spend toward high-LTV services (Finance)"));
        assert!(md.contains("- Confidence: **Medium**"));
        assert!(md.contains("## Missing information\n- Top 3 zip codes"));
        assert!(!md.contains("## Resolved conflicts"));
    }
}
