//! Run specification: the validated, immutable intake of one run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Longest goal accepted at intake, in characters.
pub const MAX_GOAL_CHARS: usize = 4000;

/// A single field of the RunSpec that a task may declare as an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputField {
    ClientRef,
    Goal,
    Kpi,
    Timeframe,
    Budget,
    Channels,
    Voice,
    Stance,
    Depth,
}

impl InputField {
    /// All fields in declaration order.
    pub const ALL: [InputField; 9] = [
        InputField::ClientRef,
        InputField::Goal,
        InputField::Kpi,
        InputField::Timeframe,
        InputField::Budget,
        InputField::Channels,
        InputField::Voice,
        InputField::Stance,
        InputField::Depth,
    ];

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ClientRef => "client",
            Self::Goal => "goal",
            Self::Kpi => "primary KPI",
            Self::Timeframe => "timeframe",
            Self::Budget => "budget",
            Self::Channels => "channels",
            Self::Voice => "voice",
            Self::Stance => "stance",
            Self::Depth => "depth",
        }
    }
}

/// Run constraints. Free text; an empty string means "not provided".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    pub kpi: String,
    pub timeframe: String,
    pub budget: String,
    pub channels: String,
}

/// Voice, stance and depth the deliverables should be written in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpertProfile {
    pub voice: String,
    pub stance: String,
    pub depth: String,
}

impl Default for ExpertProfile {
    fn default() -> Self {
        Self {
            voice: "neutral".to_string(),
            stance: "pragmatic".to_string(),
            depth: "high".to_string(),
        }
    }
}

/// Raw intake as submitted by the UI/API collaborator.
///
/// Every field is optional here; [`RunSpecBuilder`] decides what is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunIntake {
    pub client_ref: Option<String>,
    pub goal: Option<String>,
    pub kpi: Option<String>,
    pub timeframe: Option<String>,
    pub budget: Option<String>,
    pub channels: Option<String>,
    pub voice: Option<String>,
    pub stance: Option<String>,
    pub depth: Option<String>,
}

/// Validated, immutable run specification.
///
/// Built by [`RunSpecBuilder::build`]; there are no setters. Deserializing
/// runs the same validation, so a stored spec cannot bypass it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RunSpecRecord")]
pub struct RunSpec {
    client_ref: String,
    goal: String,
    constraints: Constraints,
    expert_profile: ExpertProfile,
}

/// Wire shape of a [`RunSpec`] before validation.
#[derive(Deserialize)]
struct RunSpecRecord {
    client_ref: String,
    goal: String,
    #[serde(default)]
    constraints: Constraints,
    #[serde(default)]
    expert_profile: ExpertProfile,
}

impl TryFrom<RunSpecRecord> for RunSpec {
    type Error = ValidationError;

    fn try_from(record: RunSpecRecord) -> Result<Self, Self::Error> {
        let Constraints {
            kpi,
            timeframe,
            budget,
            channels,
        } = record.constraints;
        RunSpecBuilder::new(record.client_ref, record.goal)
            .kpi(kpi)
            .timeframe(timeframe)
            .budget(budget)
            .channels(channels)
            .expert_profile(record.expert_profile)
            .build()
    }
}

impl RunSpec {
    pub fn client_ref(&self) -> &str {
        &self.client_ref
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    pub fn expert_profile(&self) -> &ExpertProfile {
        &self.expert_profile
    }

    /// Value of a single field, `None` when the field was left empty.
    pub fn value(&self, field: InputField) -> Option<&str> {
        let value = match field {
            InputField::ClientRef => &self.client_ref,
            InputField::Goal => &self.goal,
            InputField::Kpi => &self.constraints.kpi,
            InputField::Timeframe => &self.constraints.timeframe,
            InputField::Budget => &self.constraints.budget,
            InputField::Channels => &self.constraints.channels,
            InputField::Voice => &self.expert_profile.voice,
            InputField::Stance => &self.expert_profile.stance,
            InputField::Depth => &self.expert_profile.depth,
        };
        if value.is_empty() {
            None
        } else {
            Some(value.as_str())
        }
    }

    /// Project the spec down to the given fields.
    ///
    /// Fields with no value are left out of the map and reported in the
    /// second element so the caller can surface them as missing inputs.
    pub fn project(
        &self,
        fields: &[InputField],
    ) -> (BTreeMap<InputField, String>, Vec<InputField>) {
        let mut values = BTreeMap::new();
        let mut missing = Vec::new();
        for field in fields {
            match self.value(*field) {
                Some(v) => {
                    values.insert(*field, v.to_string());
                }
                None => {
                    if !missing.contains(field) {
                        missing.push(*field);
                    }
                }
            }
        }
        (values, missing)
    }
}

/// Normalizes raw intake into a [`RunSpec`].
#[derive(Debug, Clone, Default)]
pub struct RunSpecBuilder {
    client_ref: String,
    goal: String,
    constraints: Constraints,
    expert_profile: Option<ExpertProfile>,
    voice: Option<String>,
    stance: Option<String>,
    depth: Option<String>,
}

impl RunSpecBuilder {
    /// Start a builder for the given client and goal.
    pub fn new(client_ref: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            client_ref: client_ref.into(),
            goal: goal.into(),
            ..Default::default()
        }
    }

    /// Start a builder from a raw intake record.
    pub fn from_intake(intake: RunIntake) -> Self {
        let mut builder = Self::new(
            intake.client_ref.unwrap_or_default(),
            intake.goal.unwrap_or_default(),
        );
        builder.constraints = Constraints {
            kpi: intake.kpi.unwrap_or_default(),
            timeframe: intake.timeframe.unwrap_or_default(),
            budget: intake.budget.unwrap_or_default(),
            channels: intake.channels.unwrap_or_default(),
        };
        builder.voice = intake.voice;
        builder.stance = intake.stance;
        builder.depth = intake.depth;
        builder
    }

    pub fn kpi(mut self, kpi: impl Into<String>) -> Self {
        self.constraints.kpi = kpi.into();
        self
    }

    pub fn timeframe(mut self, timeframe: impl Into<String>) -> Self {
        self.constraints.timeframe = timeframe.into();
        self
    }

    pub fn budget(mut self, budget: impl Into<String>) -> Self {
        self.constraints.budget = budget.into();
        self
    }

    pub fn channels(mut self, channels: impl Into<String>) -> Self {
        self.constraints.channels = channels.into();
        self
    }

    /// Replace the whole expert profile.
    pub fn expert_profile(mut self, profile: ExpertProfile) -> Self {
        self.expert_profile = Some(profile);
        self
    }

    /// Validate and freeze the spec.
    pub fn build(self) -> Result<RunSpec, ValidationError> {
        let client_ref = self.client_ref.trim().to_string();
        if client_ref.is_empty() {
            return Err(ValidationError::MissingClientRef);
        }

        let goal = normalize_text(&self.goal);
        if goal.is_empty() {
            return Err(ValidationError::EmptyGoal);
        }
        let len = goal.chars().count();
        if len > MAX_GOAL_CHARS {
            return Err(ValidationError::GoalTooLong {
                len,
                max: MAX_GOAL_CHARS,
            });
        }

        let constraints = Constraints {
            kpi: normalize_text(&self.constraints.kpi),
            timeframe: normalize_text(&self.constraints.timeframe),
            budget: normalize_text(&self.constraints.budget),
            channels: normalize_text(&self.constraints.channels),
        };

        let base = self.expert_profile.unwrap_or_default();
        let expert_profile = ExpertProfile {
            voice: or_default(self.voice.as_deref(), &base.voice),
            stance: or_default(self.stance.as_deref(), &base.stance),
            depth: or_default(self.depth.as_deref(), &base.depth),
        };

        Ok(RunSpec {
            client_ref,
            goal,
            constraints,
            expert_profile,
        })
    }
}

/// Trim and collapse internal whitespace runs to a single space.
fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn or_default(value: Option<&str>, default: &str) -> String {
    match value.map(normalize_text) {
        Some(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}
