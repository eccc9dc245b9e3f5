//! RunService: the externally invocable surface of the engine.
//!
//! `schedule_run` and `get_run_status` are the core operations; cancel,
//! rerun and artifact lookup sit alongside them. Each admitted run is driven
//! by its own tokio task through Scheduled, Running and a terminal state.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use strategist_core::{
    Artifact, ArtifactId, CoreError, DeliverableStatus, FailureReason, GraphError, Run, RunId,
    RunIntake, RunSpec, RunSpecBuilder, RunStatus, StateTransition, TaskInstance, ValidationError,
};

use crate::brief::render_brief;
use crate::clients::ClientProfile;
use crate::graph::TaskGraph;
use crate::packager::package;
use crate::scheduler::{Scheduler, SchedulerError, SchedulerEvent};
use crate::state::{AppState, RunEntry};
use crate::store::StoreError;

/// Service errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Run not found: {0}")]
    NotFound(RunId),

    #[error("Run {0} is already terminal")]
    AlreadyTerminal(RunId),

    #[error(transparent)]
    State(#[from] CoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// RunService implementation.
#[derive(Clone)]
pub struct RunService {
    state: Arc<AppState>,
}

fn log_transition(run_id: &RunId, transition: &StateTransition) {
    info!(
        run_id = %run_id,
        from = ?transition.from,
        to = ?transition.to,
        event = %transition.event,
        "Run transition"
    );
}

impl RunService {
    /// Create a new RunService.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Validate raw intake and schedule it.
    pub async fn submit_intake(&self, intake: RunIntake) -> Result<RunId, ServiceError> {
        let spec = RunSpecBuilder::from_intake(intake).build()?;
        self.schedule_run(spec).await
    }

    /// Admit a validated spec. Returns once the run is `Scheduled`.
    pub async fn schedule_run(&self, spec: RunSpec) -> Result<RunId, ServiceError> {
        let client = self.resolve_client(&spec).await?;
        self.admit(Run::new(spec), client).await
    }

    /// Snapshot of a run.
    pub async fn get_run_status(&self, run_id: &RunId) -> Result<Run, ServiceError> {
        let runs = self.state.runs.read().await;
        runs.get(run_id)
            .map(|entry| entry.run.clone())
            .ok_or_else(|| ServiceError::NotFound(run_id.clone()))
    }

    /// Request cancellation. The run moves to `Failed` asynchronously once
    /// its in-flight tasks are interrupted.
    pub async fn cancel_run(&self, run_id: &RunId) -> Result<Run, ServiceError> {
        let runs = self.state.runs.read().await;
        let entry = runs
            .get(run_id)
            .ok_or_else(|| ServiceError::NotFound(run_id.clone()))?;
        if entry.run.is_terminal() {
            return Err(ServiceError::AlreadyTerminal(run_id.clone()));
        }
        info!(run_id = %run_id, status = ?entry.run.status(), "Cancellation requested");
        entry.cancel.cancel();
        Ok(entry.run.clone())
    }

    /// Start a fresh run with the same spec as a terminal one.
    pub async fn rerun(&self, run_id: &RunId) -> Result<RunId, ServiceError> {
        let run = {
            let runs = self.state.runs.read().await;
            let entry = runs
                .get(run_id)
                .ok_or_else(|| ServiceError::NotFound(run_id.clone()))?;
            entry.run.rerun()?
        };
        let client = self.resolve_client(&run.spec).await?;
        info!(run_id = %run.id, parent_run = %run_id, "Re-running");
        self.admit(run, client).await
    }

    /// Artifacts persisted for a run. Runs evicted from the run table are
    /// still answered from the store.
    pub async fn artifacts(&self, run_id: &RunId) -> Result<Vec<Artifact>, ServiceError> {
        let tracked = self.state.runs.read().await.contains_key(run_id);
        let artifacts = self.state.store.artifacts_for(run_id).await?;
        if !tracked && artifacts.is_empty() {
            return Err(ServiceError::NotFound(run_id.clone()));
        }
        Ok(artifacts)
    }

    async fn resolve_client(&self, spec: &RunSpec) -> Result<ClientProfile, ServiceError> {
        self.state
            .clients
            .resolve(spec.client_ref())
            .await
            .ok_or_else(|| ValidationError::UnknownClient(spec.client_ref().to_string()).into())
    }

    async fn admit(&self, mut run: Run, client: ClientProfile) -> Result<RunId, ServiceError> {
        let run_id = run.id.clone();
        self.state.store.save_run(&run).await?;
        info!(run_id = %run_id, client = %client.client_ref, "Run created");

        let graph = TaskGraph::build(Arc::clone(&self.state.catalog))?;
        run.task_instances = graph.instances();
        let transition = run.transition(RunStatus::Scheduled, "graph built")?;
        log_transition(&run_id, transition);

        let cancel = CancellationToken::new();
        self.state.runs.write().await.insert(
            run_id.clone(),
            RunEntry {
                run,
                cancel: cancel.clone(),
            },
        );

        tokio::spawn(drive_run(
            Arc::clone(&self.state),
            run_id.clone(),
            graph,
            client,
            cancel,
        ));
        Ok(run_id)
    }
}

/// Apply `f` to the tracked run and log the transition it produced.
async fn transition_run<F>(state: &AppState, run_id: &RunId, f: F)
where
    F: FnOnce(&mut Run) -> Result<&StateTransition, CoreError>,
{
    let mut runs = state.runs.write().await;
    let Some(entry) = runs.get_mut(run_id) else {
        error!(run_id = %run_id, "Run disappeared while executing");
        return;
    };
    match f(&mut entry.run) {
        Ok(transition) => log_transition(run_id, transition),
        Err(e) => warn!(run_id = %run_id, error = %e, "Rejected run transition"),
    }
}

async fn fail_run(
    state: &AppState,
    run_id: &RunId,
    reason: FailureReason,
    instances: Option<Vec<TaskInstance>>,
) {
    transition_run(state, run_id, move |run| {
        if let Some(instances) = instances {
            run.task_instances = instances;
        }
        run.fail(reason)
    })
    .await;
}

async fn drive_run(
    state: Arc<AppState>,
    run_id: RunId,
    graph: TaskGraph,
    client: ClientProfile,
    cancel: CancellationToken,
) {
    execute_run(&state, &run_id, graph, client, cancel).await;

    let evicted = state.prune_terminal_runs().await;
    if !evicted.is_empty() {
        debug!(count = evicted.len(), "Evicted terminal runs from the run table");
    }
}

async fn execute_run(
    state: &Arc<AppState>,
    run_id: &RunId,
    mut graph: TaskGraph,
    client: ClientProfile,
    cancel: CancellationToken,
) {
    let slot = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            fail_run(state, run_id, FailureReason::Cancelled, None).await;
            return;
        }
        slot = Arc::clone(&state.run_slots).acquire_owned() => slot,
    };
    let Ok(_slot) = slot else {
        fail_run(state, run_id, FailureReason::Graph("run slots closed".to_string()), None).await;
        return;
    };

    let spec = {
        let runs = state.runs.read().await;
        match runs.get(run_id) {
            Some(entry) => entry.run.spec.clone(),
            None => return,
        }
    };
    transition_run(state, run_id, |run| {
        run.transition(RunStatus::Running, "executor slot acquired")
    })
    .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = Scheduler::new(Arc::clone(&state.executor))
        .with_concurrency_limit(state.config.task_concurrency)
        .with_events(tx);

    let execute = async {
        let result = scheduler.run(&mut graph, &spec, &cancel).await;
        drop(scheduler);
        result
    };
    let forward = async {
        while let Some(SchedulerEvent::TaskUpdated(instance)) = rx.recv().await {
            let mut runs = state.runs.write().await;
            if let Some(entry) = runs.get_mut(run_id) {
                if let Some(slot) = entry
                    .run
                    .task_instances
                    .iter_mut()
                    .find(|i| i.task_id == instance.task_id)
                {
                    *slot = instance;
                }
            }
        }
    };
    let (result, ()) = tokio::join!(execute, forward);

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(SchedulerError::Cancelled { .. }) => {
            fail_run(state, run_id, FailureReason::Cancelled, Some(graph.instances())).await;
            return;
        }
        Err(e @ SchedulerError::Synthesis(_)) => {
            error!(run_id = %run_id, error = %e, "Synthesis failed");
            let reason = FailureReason::Synthesis(e.to_string());
            fail_run(state, run_id, reason, Some(graph.instances())).await;
            return;
        }
        Err(e) => {
            error!(run_id = %run_id, error = %e, "Run aborted");
            let reason = FailureReason::Graph(e.to_string());
            fail_run(state, run_id, reason, Some(graph.instances())).await;
            return;
        }
    };

    let deliverables = package(&state.manifest, &outcome.synthesis_input, &outcome.synthesis);
    let artifact = Artifact {
        id: ArtifactId::generate(),
        run_id: run_id.clone(),
        client_name: client.name.clone(),
        deliverables: deliverables.clone(),
        confidence: outcome.synthesis.confidence,
        assumptions: outcome.synthesis.assumptions.clone(),
        missing_info: outcome.synthesis.missing_info.clone(),
        brief_markdown: render_brief(&client.name, &spec, &outcome.synthesis, &deliverables),
        generated_at: Utc::now(),
    };

    if cancel.is_cancelled() {
        fail_run(state, run_id, FailureReason::Cancelled, Some(outcome.instances)).await;
        return;
    }
    if let Err(e) = state.store.save_artifact(&artifact).await {
        error!(run_id = %run_id, error = %e, "Failed to persist artifact");
        let reason = FailureReason::Persistence(e.to_string());
        fail_run(state, run_id, reason, Some(outcome.instances)).await;
        return;
    }
    info!(
        run_id = %run_id,
        artifact_id = %artifact.id,
        confidence = outcome.synthesis.confidence.label(),
        ready = artifact.count(DeliverableStatus::Ready),
        draft = artifact.count(DeliverableStatus::Draft),
        blocked = artifact.count(DeliverableStatus::Blocked),
        "Artifact persisted"
    );

    let confidence = outcome.synthesis.confidence;
    transition_run(state, run_id, move |run| {
        run.complete(outcome.instances, deliverables, confidence)
    })
    .await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use strategist_core::{
        Confidence, TaskState, MEASUREMENT_INTEGRITY_TASK, SYNTHESIS_TASK,
    };

    use super::*;
    use crate::clients::StaticClientDirectory;
    use crate::config::Config;
    use crate::executor::AgentExecutor;
    use crate::packager::Manifest;
    use crate::store::{MemoryStore, RunStore};
    use crate::test_support::{fast_catalog, sample_spec, Behavior, ScriptedExecutor};

    fn service_with(
        executor: Arc<dyn AgentExecutor>,
        store: Arc<MemoryStore>,
        max_runs: usize,
    ) -> RunService {
        let config = Config {
            max_concurrent_runs: max_runs,
            ..Config::default()
        };
        service_with_config(executor, store, config)
    }

    fn service_with_config(
        executor: Arc<dyn AgentExecutor>,
        store: Arc<MemoryStore>,
        config: Config,
    ) -> RunService {
        let catalog = fast_catalog().as_ref().clone();
        let state = AppState::new(
            config,
            catalog,
            Manifest::reference(),
            Arc::new(StaticClientDirectory::demo()),
            executor,
            store,
        )
        .unwrap();
        RunService::new(state)
    }

    async fn wait_terminal(service: &RunService, run_id: &RunId) -> Run {
        for _ in 0..500 {
            let run = service.get_run_status(run_id).await.unwrap();
            if run.is_terminal() {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {run_id} did not finish");
    }

    #[tokio::test]
    async fn test_run_completes_and_persists_artifact() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(ScriptedExecutor::new().into_arc(), Arc::clone(&store), 2);

        let run_id = service.schedule_run(sample_spec()).await.unwrap();
        let run = wait_terminal(&service, &run_id).await;

        assert_eq!(run.status(), RunStatus::Complete);
        assert_eq!(run.confidence, Some(Confidence::High));
        assert_eq!(run.deliverables.len(), 10);
        assert!(run.task_instances.iter().all(|i| i.state == TaskState::Succeeded));

        let statuses: Vec<RunStatus> = run.transitions().iter().map(|t| t.to).collect();
        assert_eq!(
            statuses,
            vec![RunStatus::Scheduled, RunStatus::Running, RunStatus::Complete]
        );

        let artifacts = service.artifacts(&run_id).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].client_name, "Acme Dental");
        assert!(artifacts[0].brief_markdown.starts_with("# Morning Brief: Acme Dental"));
        assert_eq!(store.run_count().await, 1);
    }

    #[tokio::test]
    async fn test_measurement_failure_completes_with_low_confidence() {
        let executor = ScriptedExecutor::new()
            .with(MEASUREMENT_INTEGRITY_TASK, Behavior::AlwaysFail)
            .into_arc();
        let service = service_with(executor, Arc::new(MemoryStore::new()), 2);

        let run_id = service.schedule_run(sample_spec()).await.unwrap();
        let run = wait_terminal(&service, &run_id).await;

        assert_eq!(run.status(), RunStatus::Complete);
        assert_eq!(run.confidence, Some(Confidence::Low));
        let fixes = run
            .deliverables
            .iter()
            .find(|d| d.title == "Measurement & Attribution Fixes")
            .unwrap();
        assert_eq!(fixes.status, DeliverableStatus::Blocked);
        assert!(!fixes.content.missing_inputs.is_empty());
        let front_desk = run
            .deliverables
            .iter()
            .find(|d| d.title == "Front Desk + After-Hours Workflow")
            .unwrap();
        assert_eq!(front_desk.status, DeliverableStatus::Ready);

        let artifacts = service.artifacts(&run_id).await.unwrap();
        let artifact = &artifacts[0];
        assert!(artifact.count(DeliverableStatus::Blocked) >= 1);
        assert_eq!(
            artifact.count(DeliverableStatus::Ready)
                + artifact.count(DeliverableStatus::Draft)
                + artifact.count(DeliverableStatus::Blocked),
            10
        );
    }

    #[tokio::test]
    async fn test_terminal_runs_beyond_retention_are_evicted() {
        let store = Arc::new(MemoryStore::new());
        let config = Config {
            retained_runs: 1,
            ..Config::default()
        };
        let executor = ScriptedExecutor::new().into_arc();
        let service = service_with_config(executor, Arc::clone(&store), config);

        let first = service.schedule_run(sample_spec()).await.unwrap();
        wait_terminal(&service, &first).await;
        let second = service.schedule_run(sample_spec()).await.unwrap();
        wait_terminal(&service, &second).await;

        for _ in 0..100 {
            if service.state().run_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(service.state().run_count().await, 1);
        assert!(matches!(
            service.get_run_status(&first).await,
            Err(ServiceError::NotFound(_))
        ));
        assert_eq!(service.get_run_status(&second).await.unwrap().status(), RunStatus::Complete);

        // Evicted runs keep their persisted artifact.
        assert_eq!(service.artifacts(&first).await.unwrap().len(), 1);
        assert_eq!(store.run_count().await, 2);
    }

    #[tokio::test]
    async fn test_synthesis_failure_fails_run_without_artifact() {
        let store = Arc::new(MemoryStore::new());
        let executor = ScriptedExecutor::new()
            .with("unit-economics", Behavior::UnrankableAction)
            .into_arc();
        let service = service_with(executor, Arc::clone(&store), 2);

        let run_id = service.schedule_run(sample_spec()).await.unwrap();
        let run = wait_terminal(&service, &run_id).await;

        assert_eq!(run.status(), RunStatus::Failed);
        assert!(matches!(run.failure, Some(FailureReason::Synthesis(_))));
        assert!(run.deliverables.is_empty());

        let synthesis = run
            .task_instances
            .iter()
            .find(|i| i.task_id.as_str() == SYNTHESIS_TASK)
            .unwrap();
        assert_eq!(synthesis.attempts, 1);
        assert_eq!(synthesis.state, TaskState::Failed);

        assert_eq!(store.artifact_count().await.unwrap(), 0);
        assert!(service.artifacts(&run_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_run_persists_nothing() {
        let catalog = fast_catalog();
        let mut executor = ScriptedExecutor::new();
        for definition in catalog.definitions().iter().skip(5) {
            if !definition.is_synthesis() {
                executor = executor.with(definition.id.as_str(), Behavior::Hang);
            }
        }
        let store = Arc::new(MemoryStore::new());
        let service = service_with(executor.into_arc(), Arc::clone(&store), 2);

        let run_id = service.schedule_run(sample_spec()).await.unwrap();
        for _ in 0..200 {
            let run = service.get_run_status(&run_id).await.unwrap();
            if run.task_instances.iter().filter(|i| i.is_terminal()).count() == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        service.cancel_run(&run_id).await.unwrap();
        let run = wait_terminal(&service, &run_id).await;

        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.failure, Some(FailureReason::Cancelled));
        assert!(run.deliverables.is_empty());
        assert_eq!(run.task_instances.iter().filter(|i| i.is_terminal()).count(), 5);
        assert_eq!(store.artifact_count().await.unwrap(), 0);
        assert!(service.artifacts(&run_id).await.unwrap().is_empty());
        assert!(matches!(
            service.cancel_run(&run_id).await,
            Err(ServiceError::AlreadyTerminal(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_slot() {
        let executor = ScriptedExecutor::new()
            .with("intent-demand-capture", Behavior::Delay(Duration::from_millis(200)))
            .into_arc();
        let service = service_with(executor, Arc::new(MemoryStore::new()), 1);

        let first = service.schedule_run(sample_spec()).await.unwrap();
        let second = service.schedule_run(sample_spec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            service.get_run_status(&second).await.unwrap().status(),
            RunStatus::Scheduled
        );

        service.cancel_run(&second).await.unwrap();
        let second = wait_terminal(&service, &second).await;
        assert_eq!(second.failure, Some(FailureReason::Cancelled));
        let statuses: Vec<RunStatus> = second.transitions().iter().map(|t| t.to).collect();
        assert_eq!(statuses, vec![RunStatus::Scheduled, RunStatus::Failed]);

        let first = wait_terminal(&service, &first).await;
        assert_eq!(first.status(), RunStatus::Complete);
    }

    #[tokio::test]
    async fn test_rerun_creates_new_run_and_artifact() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(ScriptedExecutor::new().into_arc(), Arc::clone(&store), 2);

        let original = service.schedule_run(sample_spec()).await.unwrap();
        assert!(matches!(
            service.rerun(&original).await,
            Err(ServiceError::State(_))
        ));
        wait_terminal(&service, &original).await;

        let rerun = service.rerun(&original).await.unwrap();
        assert_ne!(rerun, original);
        let run = wait_terminal(&service, &rerun).await;
        assert_eq!(run.parent_run, Some(original.clone()));
        assert_eq!(run.status(), RunStatus::Complete);

        assert_eq!(store.artifact_count().await.unwrap(), 2);
        assert_eq!(
            service.get_run_status(&original).await.unwrap().status(),
            RunStatus::Complete
        );
    }

    #[tokio::test]
    async fn test_intake_validation() {
        let executor = ScriptedExecutor::new().into_arc();
        let service = service_with(executor, Arc::new(MemoryStore::new()), 1);

        let empty_goal = RunIntake {
            client_ref: Some("acme-dental".to_string()),
            goal: Some("   ".to_string()),
            ..RunIntake::default()
        };
        assert!(matches!(
            service.submit_intake(empty_goal).await,
            Err(ServiceError::Validation(ValidationError::EmptyGoal))
        ));

        let unknown = RunIntake {
            client_ref: Some("globex".to_string()),
            goal: Some("Grow".to_string()),
            ..RunIntake::default()
        };
        assert!(matches!(
            service.submit_intake(unknown).await,
            Err(ServiceError::Validation(ValidationError::UnknownClient(_)))
        ));
        assert_eq!(service.state().run_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let executor = ScriptedExecutor::new().into_arc();
        let service = service_with(executor, Arc::new(MemoryStore::new()), 1);
        let missing = RunId::new("nope");
        assert!(matches!(
            service.get_run_status(&missing).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
