//! Deterministic, rules-based agent executor.
//!
//! Produces a structured output for every catalog task from its projected
//! inputs and a fixed playbook. Used as the default capability provider and
//! as the output source for test doubles.

use async_trait::async_trait;
use tracing::debug;

use strategist_core::{
    Category, InputField, Recommendation, TaskDefinition, TaskOutput,
};

use super::{AgentExecutor, ExecutorError, TaskRequest};

/// Conflict key for how a flat budget should be split.
pub const BUDGET_ALLOCATION: &str = "budget_allocation";

/// Conflict key for when spend is allowed to scale.
pub const SCALING_GATE: &str = "scaling_gate";

/// Rules-based executor. Stateless; every call with the same request
/// yields the same output.
#[derive(Debug, Clone, Default)]
pub struct RulesExecutor;

impl RulesExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Build the output for one request without going through the trait.
    pub fn compose(&self, definition: &TaskDefinition, request: &TaskRequest) -> TaskOutput {
        let mut output = TaskOutput::new(format!("{}: {}", definition.name, definition.purpose));

        for tag in &definition.outputs {
            output = output.with_section(tag.clone(), section_lines(tag, request));
        }
        for recommendation in playbook(definition.id.as_str()) {
            output = output.with_recommendation(recommendation);
        }
        output = output.with_assumption(category_assumption(definition.category));
        if let Some(question) = open_question(definition.id.as_str()) {
            output = output.with_missing_info(question);
        }
        for field in &request.missing_inputs {
            output =
                output.with_missing_info(format!("Constraint not provided: {}", field.label()));
        }
        output
    }
}

#[async_trait]
impl AgentExecutor for RulesExecutor {
    async fn invoke(
        &self,
        definition: &TaskDefinition,
        request: TaskRequest,
    ) -> Result<TaskOutput, ExecutorError> {
        debug!(task_id = %request.task_id, attempt = request.attempt, "Composing rules output");
        Ok(self.compose(definition, &request))
    }
}

fn section_lines(tag: &str, request: &TaskRequest) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(goal) = request.input(InputField::Goal) {
        lines.push(format!("{tag} in service of: {goal}"));
    }
    if let Some(kpi) = request.input(InputField::Kpi) {
        lines.push(format!("Measured against {kpi}"));
    }
    if let Some(channels) = request.input(InputField::Channels) {
        lines.push(format!("Scope: {channels}"));
    }
    if let Some(timeframe) = request.input(InputField::Timeframe) {
        lines.push(format!("Horizon: {timeframe}"));
    }
    if let Some(budget) = request.input(InputField::Budget) {
        lines.push(format!("Budget posture: {budget}"));
    }
    if lines.is_empty() {
        lines.push(format!("{tag} drafted without run constraints"));
    }
    lines
}

fn playbook(task_id: &str) -> Vec<Recommendation> {
    match task_id {
        "intent-demand-capture" => vec![
            Recommendation::new(
                "Segment search campaigns by service line and tighten the geo radius",
                8.0,
                3.0,
            ),
            Recommendation::new(
                "Shift budget toward emergency and high-intent search terms",
                7.0,
                2.0,
            )
            .claims(BUDGET_ALLOCATION, "increase high-intent search share"),
        ],
        "messaging-positioning" => vec![Recommendation::new(
            "Launch three differentiated positioning angles with proof points",
            6.0,
            3.0,
        )],
        "landing-experience" => vec![Recommendation::new(
            "Rebuild the landing page around a single booking call to action",
            7.0,
            4.0,
        )],
        "experiment-designer" => vec![
            Recommendation::new("Run an offer and landing page alignment test", 6.0, 2.0),
            Recommendation::new(
                "Run a budget reallocation test shifting 10-20% toward best marginal returns",
                7.0,
                3.0,
            ),
        ],
        "competitive-pressure" => vec![
            Recommendation::new("Defend branded terms where competitors bid aggressively", 5.0, 2.0)
                .claims(BUDGET_ALLOCATION, "raise competitive defense spend"),
        ],
        "measurement-integrity" => vec![
            Recommendation::new(
                "Fix call tracking and conversion events before scaling spend",
                9.0,
                3.0,
            )
            .claims(SCALING_GATE, "hold scaling until tracking is verified"),
        ],
        "anomalies-baseline" => vec![Recommendation::new(
            "Flag anomalies against baseline and isolate what changed",
            5.0,
            2.0,
        )],
        "incrementality-options" => vec![Recommendation::new(
            "Run a geo holdout to measure incrementality",
            6.0,
            5.0,
        )],
        "front-desk-workflow" => vec![Recommendation::new(
            "Stand up a missed-call recovery loop with same-day callbacks",
            8.0,
            2.0,
        )],
        "capacity-scheduling" => vec![Recommendation::new(
            "Route demand toward service lines with open capacity",
            6.0,
            3.0,
        )],
        "patient-experience" => vec![Recommendation::new(
            "Remove intake and wait-time friction points",
            5.0,
            4.0,
        )],
        "unit-economics" => vec![
            Recommendation::new("Bias spend toward high-LTV services", 9.0, 2.0)
                .claims(BUDGET_ALLOCATION, "reallocate flat spend toward high-LTV services"),
        ],
        "pricing-insurance" => vec![Recommendation::new(
            "Publish an insurance FAQ and billing guardrails",
            4.0,
            2.0,
        )],
        "reputation-reviews" => vec![Recommendation::new(
            "Automate review requests after every completed visit",
            6.0,
            2.0,
        )],
        "retention-reactivation" => vec![
            Recommendation::new("Reactivate lapsed customers with a recall campaign", 6.0, 3.0)
                .claims(SCALING_GATE, "scale reactivation immediately"),
        ],
        _ => Vec::new(),
    }
}

fn category_assumption(category: Category) -> &'static str {
    match category {
        Category::Growth => "Conversion events are consistent across channels",
        Category::Measurement => "Tracking is reliable enough to establish a baseline",
        Category::Operations => "Front desk staffing is stable over the timeframe",
        Category::Finance => "Budgets are controllable and can be re-allocated",
        Category::Reputation => "Review platforms allow automated requests",
        Category::Retention => "Contact consent exists for the existing customer base",
        Category::Synthesis => "Upstream outputs are internally consistent",
    }
}

fn open_question(task_id: &str) -> Option<&'static str> {
    match task_id {
        "unit-economics" => Some("Which services are highest margin and currently underutilized?"),
        "experiment-designer" => {
            Some("Average lead to consult to treatment conversion rates (approx is fine)")
        }
        "front-desk-workflow" => {
            Some("Call handling: hours, staffing, voicemail, response time, booking scripts")
        }
        "pricing-insurance" => {
            Some("Insurance posture: in-network vs out-of-network split and messaging constraints")
        }
        "intent-demand-capture" => Some("Top 3 zip codes that matter most (and any to avoid)"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use strategist_core::{RunSpecBuilder, TaskCatalog};

    use super::*;

    fn request_for(definition: &TaskDefinition) -> TaskRequest {
        let spec = RunSpecBuilder::new("acme-dental", "Increase booked consults by 30%")
            .kpi("Booked consults")
            .timeframe("90 days")
            .build()
            .unwrap();
        let (inputs, missing_inputs) = spec.project(&definition.inputs);
        TaskRequest {
            task_id: definition.id.clone(),
            attempt: 1,
            timeout_ms: definition.timeout_ms,
            inputs,
            missing_inputs,
            upstream: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_every_reference_task_covers_declared_outputs() {
        let catalog = TaskCatalog::reference().unwrap();
        let executor = RulesExecutor::new();
        for definition in catalog.definitions().iter().filter(|d| !d.is_synthesis()) {
            let output = executor
                .invoke(definition, request_for(definition))
                .await
                .unwrap();
            assert!(
                output.missing_outputs(&definition.outputs).is_empty(),
                "{} is missing outputs",
                definition.id
            );
            assert!(!output.recommendations.is_empty(), "{} has no plays", definition.id);
        }
    }

    #[test]
    fn test_missing_constraints_are_reported() {
        let catalog = TaskCatalog::reference().unwrap();
        let definition = catalog.get(&"intent-demand-capture".into()).unwrap();
        let output = RulesExecutor::new().compose(definition, &request_for(definition));

        assert!(output.missing_info.contains(&"Constraint not provided: budget".to_string()));
        assert!(output.missing_info.contains(&"Constraint not provided: channels".to_string()));
    }
}
