//! Task catalog: the fixed registry of agent task definitions.
//!
//! The catalog is a read-only table loaded once at process start. Behavior
//! per task is uniform (invoke, time out, retry), so a definition is plain
//! data keyed by [`TaskDefId`] rather than a type per agent.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::ids::TaskDefId;
use crate::spec::InputField;

/// Analytical category of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Growth,
    Measurement,
    Operations,
    Finance,
    Reputation,
    Retention,
    Synthesis,
}

impl Category {
    /// Conflict-resolution precedence; lower wins.
    ///
    /// Finance > Growth > Measurement > Operations > Reputation > Retention.
    pub fn precedence(&self) -> u8 {
        match self {
            Self::Finance => 0,
            Self::Growth => 1,
            Self::Measurement => 2,
            Self::Operations => 3,
            Self::Reputation => 4,
            Self::Retention => 5,
            Self::Synthesis => 6,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Growth => "Growth",
            Self::Measurement => "Measurement",
            Self::Operations => "Operations",
            Self::Finance => "Finance",
            Self::Reputation => "Reputation",
            Self::Retention => "Retention",
            Self::Synthesis => "Synthesis",
        }
    }
}

/// Concurrency class of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// May share the worker pool with any other task.
    #[default]
    Parallel,
    /// Runs alone: nothing else is in flight while it runs.
    Sequential,
}

/// How many times a task is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff_ms: u64,
    /// Growth factor applied per further attempt.
    pub multiplier: u32,
    /// Upper bound on any single delay.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 2_000,
            multiplier: 2,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempts_made`.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts.max(1)
    }

    /// Exponential backoff before attempt `attempts_made + 1`.
    pub fn backoff_after(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1);
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(exponent);
        let delay = self.initial_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

fn default_timeout_ms() -> u64 {
    300_000
}

/// One entry of the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: TaskDefId,
    pub name: String,
    pub category: Category,
    #[serde(default)]
    pub purpose: String,
    /// RunSpec fields this task may see.
    #[serde(default)]
    pub inputs: Vec<InputField>,
    /// Output-kind tags the task must produce.
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<TaskDefId>,
    #[serde(default)]
    pub run_mode: RunMode,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl TaskDefinition {
    /// Create a parallel, dependency-free definition with default timeout
    /// and retry policy.
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: Category) -> Self {
        Self {
            id: TaskDefId::new(id),
            name: name.into(),
            category,
            purpose: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            depends_on: Vec::new(),
            run_mode: RunMode::Parallel,
            timeout_ms: default_timeout_ms(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    pub fn with_inputs(mut self, inputs: &[InputField]) -> Self {
        self.inputs = inputs.to_vec();
        self
    }

    pub fn with_outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|o| o.to_string()).collect();
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(TaskDefId::new(id));
        self
    }

    pub fn with_run_mode(mut self, mode: RunMode) -> Self {
        self.run_mode = mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn is_synthesis(&self) -> bool {
        self.category == Category::Synthesis
    }
}

/// Validated, read-only set of task definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<TaskDefinition>", into = "Vec<TaskDefinition>")]
pub struct TaskCatalog {
    definitions: Vec<TaskDefinition>,
    index: HashMap<TaskDefId, usize>,
}

impl TaskCatalog {
    /// Validate ids, dependency references and acyclicity.
    pub fn new(definitions: Vec<TaskDefinition>) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(definitions.len());
        for (i, def) in definitions.iter().enumerate() {
            if index.insert(def.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateTask(def.id.clone()));
            }
        }
        for def in &definitions {
            for dep in &def.depends_on {
                if !index.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        task: def.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        topological_order(&definitions)?;
        Ok(Self { definitions, index })
    }

    /// The built-in strategist catalog: fifteen independent specialists and
    /// one synthesis task that depends on all of them.
    pub fn reference() -> Result<Self, GraphError> {
        Self::new(reference_definitions())
    }

    pub fn definitions(&self) -> &[TaskDefinition] {
        &self.definitions
    }

    pub fn get(&self, id: &TaskDefId) -> Option<&TaskDefinition> {
        self.index.get(id).map(|&i| &self.definitions[i])
    }

    pub fn contains(&self, id: &TaskDefId) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Dependency-respecting order, ties broken by catalog order.
    pub fn topological_order(&self) -> Result<Vec<TaskDefId>, GraphError> {
        topological_order(&self.definitions)
    }

    /// Check the fan-out/fan-in shape: exactly one synthesis task, it
    /// depends on every other task, and no other task has dependencies.
    pub fn validate_fan_in(&self) -> Result<&TaskDefinition, GraphError> {
        let synthesis: Vec<&TaskDefinition> =
            self.definitions.iter().filter(|d| d.is_synthesis()).collect();
        let synthesis = match synthesis.as_slice() {
            [] => return Err(GraphError::MissingSynthesis),
            [one] => *one,
            many => {
                return Err(GraphError::MultipleSynthesis(
                    many.iter().map(|d| d.id.clone()).collect(),
                ))
            }
        };

        let deps: HashSet<&TaskDefId> = synthesis.depends_on.iter().collect();
        let others: HashSet<&TaskDefId> = self
            .definitions
            .iter()
            .filter(|d| !d.is_synthesis())
            .map(|d| &d.id)
            .collect();
        if deps != others {
            return Err(GraphError::InvalidFanIn(synthesis.id.clone()));
        }

        if let Some(def) = self
            .definitions
            .iter()
            .find(|d| !d.is_synthesis() && !d.depends_on.is_empty())
        {
            return Err(GraphError::InvalidFanIn(def.id.clone()));
        }

        Ok(synthesis)
    }
}

impl TryFrom<Vec<TaskDefinition>> for TaskCatalog {
    type Error = GraphError;

    fn try_from(definitions: Vec<TaskDefinition>) -> Result<Self, Self::Error> {
        Self::new(definitions)
    }
}

impl From<TaskCatalog> for Vec<TaskDefinition> {
    fn from(catalog: TaskCatalog) -> Self {
        catalog.definitions
    }
}

/// Kahn's algorithm over the definitions, processing ready nodes in
/// catalog order so the result is deterministic.
///
/// Unknown dependency ids are ignored here; [`TaskCatalog::new`] rejects
/// them before calling this.
pub fn topological_order(definitions: &[TaskDefinition]) -> Result<Vec<TaskDefId>, GraphError> {
    let position: HashMap<&TaskDefId, usize> = definitions
        .iter()
        .enumerate()
        .map(|(i, d)| (&d.id, i))
        .collect();

    let mut indegree = vec![0usize; definitions.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); definitions.len()];
    for (i, def) in definitions.iter().enumerate() {
        for dep in &def.depends_on {
            if let Some(&d) = position.get(dep) {
                indegree[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    let mut order = Vec::with_capacity(definitions.len());
    let mut done = vec![false; definitions.len()];
    loop {
        let next = (0..definitions.len()).find(|&i| !done[i] && indegree[i] == 0);
        let Some(i) = next else { break };
        done[i] = true;
        order.push(definitions[i].id.clone());
        for &j in &dependents[i] {
            indegree[j] -= 1;
        }
    }

    if order.len() != definitions.len() {
        let stuck = definitions
            .iter()
            .zip(done.iter())
            .filter(|(_, done)| !**done)
            .map(|(d, _)| d.id.clone())
            .collect();
        return Err(GraphError::Cycle(stuck));
    }
    Ok(order)
}

/// Id of the synthesis task in the reference catalog.
pub const SYNTHESIS_TASK: &str = "synthesis-packaging";

/// Id of the measurement integrity task in the reference catalog.
pub const MEASUREMENT_INTEGRITY_TASK: &str = "measurement-integrity";

fn reference_definitions() -> Vec<TaskDefinition> {
    use Category::*;
    use InputField::*;

    let specialists = vec![
        // Growth + demand
        TaskDefinition::new("intent-demand-capture", "Intent & Demand Capture Agent", Growth)
            .with_purpose("Capture high-intent demand without waste.")
            .with_inputs(&[Goal, Channels, Budget, Kpi])
            .with_outputs(&["Channel plan", "Targeting posture", "Budget guardrails"]),
        TaskDefinition::new("messaging-positioning", "Messaging & Positioning Agent", Growth)
            .with_purpose("Generate 3 differentiated positioning angles + objection handling.")
            .with_inputs(&[Goal, Voice, Stance])
            .with_outputs(&["Messaging angles", "Proof points", "Claims guardrails"]),
        TaskDefinition::new("landing-experience", "Landing Experience Agent", Growth)
            .with_purpose("Design the conversion path from click to booking with minimal friction.")
            .with_inputs(&[Goal, Kpi, Channels])
            .with_outputs(&["Landing outline", "CTA strategy", "Routing recommendations"]),
        TaskDefinition::new("experiment-designer", "Experiment Designer Agent", Growth)
            .with_purpose("Create a 2-week experiment plan with hypotheses and success metrics.")
            .with_inputs(&[Goal, Kpi, Timeframe, Channels])
            .with_outputs(&["Experiments", "Impact/effort", "Stop conditions"]),
        TaskDefinition::new("competitive-pressure", "Competitive Pressure Agent", Growth)
            .with_purpose("Map where competitors bid and where demand is under-served.")
            .with_inputs(&[Goal, Channels, Budget])
            .with_outputs(&["Competitor map", "Defensive posture"]),
        // Measurement + truth
        TaskDefinition::new(MEASUREMENT_INTEGRITY_TASK, "Measurement Integrity Agent", Measurement)
            .with_purpose("Assess tracking gaps; define lead quality rubric and attribution rules.")
            .with_inputs(&[Kpi, Channels])
            .with_outputs(&["Tracking fixes", "Lead quality rubric", "Confidence level"]),
        TaskDefinition::new("anomalies-baseline", "Anomalies & Baseline Agent", Measurement)
            .with_purpose("Detect what changed vs baseline; separate signal from noise.")
            .with_inputs(&[Kpi, Timeframe])
            .with_outputs(&["Anomalies list", "Likely causes", "Data requests"]),
        TaskDefinition::new("incrementality-options", "Incrementality Options Agent", Measurement)
            .with_purpose("Suggest feasible incrementality tests for local businesses.")
            .with_inputs(&[Budget, Channels, Timeframe])
            .with_outputs(&["Holdout options", "Geo split plan", "Minimum sample guidance"]),
        // Operations + service delivery
        TaskDefinition::new("front-desk-workflow", "Front Desk Workflow Agent", Operations)
            .with_purpose(
                "Reduce missed calls and improve booking conversion without extra headcount.",
            )
            .with_inputs(&[Goal, Kpi])
            .with_outputs(&["Missed-call recovery SOP", "Scripts", "SLAs"]),
        TaskDefinition::new("capacity-scheduling", "Capacity & Scheduling Agent", Operations)
            .with_purpose("Align marketing with capacity constraints and provider availability.")
            .with_inputs(&[Goal, Timeframe])
            .with_outputs(&["Service-line routing", "Scheduling rules", "Demand shaping ideas"]),
        TaskDefinition::new("patient-experience", "Patient Experience Agent", Operations)
            .with_purpose("Identify friction points that destroy reviews and referrals.")
            .with_inputs(&[Goal])
            .with_outputs(&["Experience fixes", "Service recovery loop", "Messaging alignment"]),
        // Finance + unit economics
        TaskDefinition::new("unit-economics", "Unit Economics Agent", Finance)
            .with_purpose("Tie spend to margin and prioritize high-LTV services.")
            .with_inputs(&[Goal, Budget, Kpi])
            .with_outputs(&["LTV prioritization", "Spend guardrails", "ROI assumptions"]),
        TaskDefinition::new("pricing-insurance", "Pricing & Insurance Agent", Finance)
            .with_purpose("Navigate in/out-of-network messaging and minimize billing surprises.")
            .with_inputs(&[Goal, Budget])
            .with_outputs(&["Messaging constraints", "FAQ outline", "Front desk scripts guidance"]),
        // Reputation + retention
        TaskDefinition::new("reputation-reviews", "Reputation & Reviews Agent", Reputation)
            .with_purpose("Increase review velocity and handle negatives without escalation.")
            .with_inputs(&[Goal, Channels])
            .with_outputs(&["Review capture plan", "Response templates", "Recovery loop"]),
        TaskDefinition::new("retention-reactivation", "Retention & Re-activation Agent", Retention)
            .with_purpose("Turn the existing customer base into recurring revenue + referrals.")
            .with_inputs(&[Goal, Channels, Timeframe])
            .with_outputs(&["Recall plan", "Reactivation messaging", "Referral prompts"]),
    ];

    let mut synthesis =
        TaskDefinition::new(SYNTHESIS_TASK, "Synthesis & Packaging Agent", Synthesis)
            .with_purpose("Resolve conflicts, rank actions, and package the morning deliverables.")
            .with_outputs(&["Ranked actions", "Confidence", "Assumptions"])
            .with_run_mode(RunMode::Sequential)
            .with_timeout(Duration::from_secs(120))
            .with_retry(RetryPolicy::no_retry());
    synthesis.depends_on = specialists.iter().map(|d| d.id.clone()).collect();

    let mut definitions = specialists;
    definitions.push(synthesis);
    definitions
}
