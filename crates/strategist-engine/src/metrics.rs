//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;
use std::sync::Arc;

use strategist_core::{RunStatus, TaskState};
use tracing::warn;

use crate::state::AppState;

const RUN_STATUSES: [(RunStatus, &str); 5] = [
    (RunStatus::Draft, "draft"),
    (RunStatus::Scheduled, "scheduled"),
    (RunStatus::Running, "running"),
    (RunStatus::Complete, "complete"),
    (RunStatus::Failed, "failed"),
];

const TASK_STATES: [(TaskState, &str); 7] = [
    (TaskState::Pending, "pending"),
    (TaskState::Ready, "ready"),
    (TaskState::Running, "running"),
    (TaskState::Retrying, "retrying"),
    (TaskState::Succeeded, "succeeded"),
    (TaskState::Failed, "failed"),
    (TaskState::TimedOut, "timed_out"),
];

/// Collect all metrics from AppState and format as Prometheus text.
pub async fn collect_metrics(state: &Arc<AppState>) -> String {
    let mut output = String::new();

    collect_run_metrics(state, &mut output).await;
    collect_task_metrics(state, &mut output).await;
    collect_artifact_metrics(state, &mut output).await;

    output
}

/// Collect run metrics by status.
async fn collect_run_metrics(state: &Arc<AppState>, output: &mut String) {
    let counts = state.runs_by_status().await;

    writeln!(
        output,
        "# HELP strategist_runs_total Number of tracked runs by status"
    )
    .ok();
    writeln!(output, "# TYPE strategist_runs_total gauge").ok();
    for (status, label) in RUN_STATUSES {
        let count = counts.get(&status).copied().unwrap_or(0);
        writeln!(output, "strategist_runs_total{{status=\"{label}\"}} {count}").ok();
    }
}

/// Collect task instance metrics by state, across all tracked runs.
async fn collect_task_metrics(state: &Arc<AppState>, output: &mut String) {
    let runs = state.runs.read().await;

    let mut counts = [0u64; TASK_STATES.len()];
    for entry in runs.values() {
        for instance in &entry.run.task_instances {
            if let Some(i) = TASK_STATES.iter().position(|(s, _)| *s == instance.state) {
                counts[i] += 1;
            }
        }
    }

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP strategist_task_instances Task instances by state"
    )
    .ok();
    writeln!(output, "# TYPE strategist_task_instances gauge").ok();
    for ((_, label), count) in TASK_STATES.iter().zip(counts) {
        writeln!(output, "strategist_task_instances{{state=\"{label}\"}} {count}").ok();
    }
}

/// Collect the persisted artifact count.
async fn collect_artifact_metrics(state: &Arc<AppState>, output: &mut String) {
    let count = match state.store.artifact_count().await {
        Ok(count) => count,
        Err(e) => {
            warn!(error = %e, "Failed to count artifacts");
            return;
        }
    };

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP strategist_artifacts_total Artifacts persisted"
    )
    .ok();
    writeln!(output, "# TYPE strategist_artifacts_total counter").ok();
    writeln!(output, "strategist_artifacts_total {count}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::StaticClientDirectory;
    use crate::config::Config;
    use crate::executor::RulesExecutor;
    use crate::packager::Manifest;
    use crate::store::MemoryStore;
    use strategist_core::TaskCatalog;

    #[tokio::test]
    async fn test_collect_metrics_empty_state() {
        let state = AppState::new(
            Config::default(),
            TaskCatalog::reference().unwrap(),
            Manifest::reference(),
            Arc::new(StaticClientDirectory::demo()),
            Arc::new(RulesExecutor::new()),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        let output = collect_metrics(&state).await;

        assert!(output.contains("strategist_runs_total{status=\"running\"} 0"));
        assert!(output.contains("strategist_task_instances{state=\"timed_out\"} 0"));
        assert!(output.contains("strategist_artifacts_total 0"));
    }
}
