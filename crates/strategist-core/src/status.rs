//! Status enums for Runs, Task instances and Deliverables.

use serde::{Deserialize, Serialize};

/// Lifecycle of a Run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Spec validated, not yet scheduled.
    #[default]
    Draft,
    /// Graph built, awaiting an executor slot.
    Scheduled,
    /// Scheduler active.
    Running,
    /// Synthesis and packaging finished.
    Complete,
    /// Fatal error at any stage, including cancellation.
    Failed,
}

impl RunStatus {
    /// Returns true if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Transitions only move forward; any non-terminal state may fail.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Draft, Scheduled)
                | (Scheduled, Running)
                | (Running, Complete)
                | (Draft, Failed)
                | (Scheduled, Failed)
                | (Running, Failed)
        )
    }
}

/// State of one TaskInstance within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Waiting on dependencies.
    #[default]
    Pending,
    /// Dependencies terminal, queued for a worker.
    Ready,
    /// Invocation in flight.
    Running,
    /// Last attempt failed; waiting out the backoff before re-queueing.
    Retrying,
    /// Finished with an output.
    Succeeded,
    /// Exhausted retries; last attempt failed.
    Failed,
    /// Exhausted retries; last attempt exceeded the task timeout.
    TimedOut,
}

impl TaskState {
    /// Returns true if the instance will not change again in this run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

/// Readiness of a packaged deliverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliverableStatus {
    /// Every required source succeeded.
    Ready,
    /// Some sources succeeded; best-effort composition.
    Draft,
    /// No usable source, or a hard-required source is missing.
    Blocked,
}

/// Overall confidence of a run's synthesis.
///
/// Ordered from lowest to highest so that comparisons read naturally:
/// `Confidence::Low < Confidence::High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Confidence for a given upstream failure profile.
    ///
    /// Any Measurement failure or two or more failures in total yield `Low`;
    /// exactly one other failure yields `Medium`; none yields `High`.
    pub fn from_failures(failed: usize, measurement_failed: bool) -> Self {
        if measurement_failed || failed >= 2 {
            Self::Low
        } else if failed == 1 {
            Self::Medium
        } else {
            Self::High
        }
    }

    /// Display label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_forward_only() {
        assert!(RunStatus::Draft.can_transition_to(RunStatus::Scheduled));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Complete));
        assert!(!RunStatus::Complete.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Draft));
        assert!(!RunStatus::Draft.can_transition_to(RunStatus::Complete));
    }

    #[test]
    fn test_task_state_terminal() {
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::TimedOut.is_terminal());
        assert!(!TaskState::Retrying.is_terminal());
        assert!(!TaskState::Ready.is_terminal());
    }

    #[test]
    fn test_confidence_never_increases_with_failures() {
        for measurement in [false, true] {
            let mut previous = Confidence::from_failures(0, false);
            for failed in 1..16 {
                let current = Confidence::from_failures(failed, measurement);
                assert!(current <= previous, "failed={failed} measurement={measurement}");
                previous = current;
            }
        }
    }

    #[test]
    fn test_confidence_levels() {
        assert_eq!(Confidence::from_failures(0, false), Confidence::High);
        assert_eq!(Confidence::from_failures(1, false), Confidence::Medium);
        assert_eq!(Confidence::from_failures(1, true), Confidence::Low);
        assert_eq!(Confidence::from_failures(2, false), Confidence::Low);
    }
}
