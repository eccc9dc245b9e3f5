//! Scheduler/executor: drives one run's task graph to completion.
//!
//! The control loop is the graph's only writer. Attempts run on a
//! [`JoinSet`] and report back with a [`WorkerEvent`]; the loop applies each
//! result to the graph, re-queues retries after their backoff and dispatches
//! whatever became ready. Synthesis goes through the same dispatch path once
//! the fan-in barrier opens.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, info, warn};

use strategist_core::{
    CoreError, GraphError, RunMode, RunSpec, TaskDefId, TaskInstance, TaskOutput, TaskResult,
};

use crate::executor::{AgentExecutor, ExecutorError, TaskRequest};
use crate::graph::TaskGraph;
use crate::synthesis::{synthesize, SynthesisError, SynthesisInput, SynthesisOutput};

/// Why a single attempt failed.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("missing declared outputs: {}", .0.join(", "))]
    MissingOutputs(Vec<String>),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("invocation panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("run cancelled with {terminal} of {total} tasks terminal")]
    Cancelled { terminal: usize, total: usize },

    #[error("scheduler stalled with non-terminal tasks: {0:?}")]
    Deadlock(Vec<TaskDefId>),

    #[error("synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    State(#[from] CoreError),
}

/// Progress notifications emitted while a run executes.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// An instance changed state.
    TaskUpdated(TaskInstance),
}

/// Everything a finished run hands to packaging.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Final instances in catalog order.
    pub instances: Vec<TaskInstance>,
    pub synthesis_input: SynthesisInput,
    pub synthesis: SynthesisOutput,
}

enum Completion {
    Agent(TaskOutput),
    Synthesis(Box<SynthesisOutput>),
}

enum WorkerEvent {
    Finished {
        task_id: TaskDefId,
        attempt: u32,
        elapsed_ms: u64,
        outcome: Result<Completion, TaskError>,
    },
    BackoffElapsed(TaskDefId),
}

/// Mutable bookkeeping of one `run` call.
#[derive(Default)]
struct Dispatch {
    queue: VecDeque<TaskDefId>,
    in_flight: usize,
    sequential_active: bool,
    synthesis_input: Option<SynthesisInput>,
    synthesis: Option<SynthesisOutput>,
}

/// Task scheduler.
pub struct Scheduler {
    executor: Arc<dyn AgentExecutor>,
    concurrency_limit: Option<usize>,
    events: Option<mpsc::UnboundedSender<SchedulerEvent>>,
}

impl Scheduler {
    /// Create a scheduler with unbounded concurrency.
    pub fn new(executor: Arc<dyn AgentExecutor>) -> Self {
        Self {
            executor,
            concurrency_limit: None,
            events: None,
        }
    }

    /// Cap the number of attempts in flight. `None` is unbounded.
    pub fn with_concurrency_limit(mut self, limit: Option<usize>) -> Self {
        self.concurrency_limit = limit.filter(|&n| n > 0);
        self
    }

    /// Send a [`SchedulerEvent`] for every instance state change.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Drive `graph` until every instance is terminal.
    ///
    /// Task failures are absorbed. Cancellation, a stalled graph or a
    /// synthesis failure end the run with an error; in-flight attempts are
    /// aborted when this returns.
    pub async fn run(
        &self,
        graph: &mut TaskGraph,
        spec: &RunSpec,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, SchedulerError> {
        let mut workers: JoinSet<WorkerEvent> = JoinSet::new();
        let mut state = Dispatch::default();

        let initial = graph.ready_tasks();
        self.enqueue(graph, &mut state, initial)?;

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled(graph, &mut workers));
            }

            self.dispatch(graph, spec, &mut state, &mut workers)?;

            if graph.is_complete() {
                break;
            }
            if workers.is_empty() {
                return Err(SchedulerError::Deadlock(graph.non_terminal()));
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(self.cancelled(graph, &mut workers));
                }
                joined = workers.join_next() => match joined {
                    Some(Ok(event)) => self.handle(graph, &mut state, &mut workers, event)?,
                    Some(Err(e)) => error!(error = %e, "Scheduler worker failed"),
                    None => {}
                },
            }
        }

        let synthesis = state
            .synthesis
            .ok_or_else(|| SynthesisError::Aborted("synthesis never ran".to_string()))?;
        let synthesis_input = match state.synthesis_input {
            Some(input) => input,
            None => graph.synthesis_input()?,
        };

        Ok(RunOutcome {
            instances: graph.instances(),
            synthesis_input,
            synthesis,
        })
    }

    fn cancelled(&self, graph: &TaskGraph, workers: &mut JoinSet<WorkerEvent>) -> SchedulerError {
        workers.abort_all();
        let terminal = graph.terminal_count();
        let total = graph.catalog().len();
        info!(terminal, total, "Run cancelled, aborting in-flight tasks");
        SchedulerError::Cancelled { terminal, total }
    }

    fn emit(&self, graph: &TaskGraph, id: &TaskDefId) {
        if let (Some(tx), Some(instance)) = (&self.events, graph.instance(id)) {
            tx.send(SchedulerEvent::TaskUpdated(instance.clone())).ok();
        }
    }

    fn enqueue(
        &self,
        graph: &mut TaskGraph,
        state: &mut Dispatch,
        ids: Vec<TaskDefId>,
    ) -> Result<(), SchedulerError> {
        for id in ids {
            graph.mark_ready(&id)?;
            self.emit(graph, &id);
            state.queue.push_back(id);
        }
        Ok(())
    }

    fn has_capacity(&self, state: &Dispatch) -> bool {
        self.concurrency_limit
            .map(|limit| state.in_flight < limit)
            .unwrap_or(true)
    }

    /// Start queued attempts while capacity allows. A sequential task waits
    /// for the in-flight set to drain and then runs alone.
    fn dispatch(
        &self,
        graph: &mut TaskGraph,
        spec: &RunSpec,
        state: &mut Dispatch,
        workers: &mut JoinSet<WorkerEvent>,
    ) -> Result<(), SchedulerError> {
        while let Some(next) = state.queue.front() {
            if state.sequential_active || !self.has_capacity(state) {
                break;
            }
            let sequential = graph.definition(next)?.run_mode == RunMode::Sequential;
            if sequential && state.in_flight > 0 {
                break;
            }
            let Some(id) = state.queue.pop_front() else {
                break;
            };

            self.start(graph, spec, state, workers, id)?;
            state.in_flight += 1;
            state.sequential_active = sequential;
        }
        Ok(())
    }

    fn start(
        &self,
        graph: &mut TaskGraph,
        spec: &RunSpec,
        state: &mut Dispatch,
        workers: &mut JoinSet<WorkerEvent>,
        id: TaskDefId,
    ) -> Result<(), SchedulerError> {
        let attempt = graph.start_attempt(&id)?;
        self.emit(graph, &id);

        let definition = graph.definition(&id)?.clone();
        let timeout = definition.timeout();
        info!(task_id = %id, attempt, "Dispatching task");

        if definition.is_synthesis() {
            let input = graph.synthesis_input()?;
            state.synthesis_input = Some(input.clone());
            workers.spawn(attempt_worker(id, attempt, timeout, async move {
                let output = synthesize(&input)?;
                Ok(Completion::Synthesis(Box::new(output)))
            }));
            return Ok(());
        }

        let (inputs, missing_inputs) = spec.project(&definition.inputs);
        let request = TaskRequest {
            task_id: id.clone(),
            attempt,
            timeout_ms: definition.timeout_ms,
            inputs,
            missing_inputs,
            upstream: graph.upstream_outputs(&id)?,
        };
        let executor = Arc::clone(&self.executor);
        workers.spawn(attempt_worker(id, attempt, timeout, async move {
            let output = executor.invoke(&definition, request).await?;
            let missing = output.missing_outputs(&definition.outputs);
            if !missing.is_empty() {
                return Err(TaskError::MissingOutputs(missing));
            }
            Ok(Completion::Agent(output))
        }));
        Ok(())
    }

    fn handle(
        &self,
        graph: &mut TaskGraph,
        state: &mut Dispatch,
        workers: &mut JoinSet<WorkerEvent>,
        event: WorkerEvent,
    ) -> Result<(), SchedulerError> {
        let (task_id, attempt, elapsed_ms, outcome) = match event {
            WorkerEvent::BackoffElapsed(task_id) => {
                debug!(task_id = %task_id, "Backoff elapsed, re-queueing");
                return self.enqueue(graph, state, vec![task_id]);
            }
            WorkerEvent::Finished {
                task_id,
                attempt,
                elapsed_ms,
                outcome,
            } => (task_id, attempt, elapsed_ms, outcome),
        };

        state.in_flight = state.in_flight.saturating_sub(1);
        let definition = graph.definition(&task_id)?.clone();
        if definition.run_mode == RunMode::Sequential {
            state.sequential_active = false;
        }

        let error = match outcome {
            Ok(Completion::Agent(output)) => {
                info!(task_id = %task_id, attempt, elapsed_ms, "Task succeeded");
                let result = TaskResult::succeeded(task_id.clone(), output, attempt, elapsed_ms);
                return self.finish(graph, state, &task_id, result);
            }
            Ok(Completion::Synthesis(output)) => {
                info!(
                    task_id = %task_id,
                    elapsed_ms,
                    confidence = output.confidence.label(),
                    "Synthesis finished"
                );
                let result = TaskResult::succeeded(
                    task_id.clone(),
                    output.to_task_output(),
                    attempt,
                    elapsed_ms,
                );
                state.synthesis = Some(*output);
                return self.finish(graph, state, &task_id, result);
            }
            Err(error) => error,
        };

        if definition.is_synthesis() {
            error!(task_id = %task_id, error = %error, "Synthesis failed");
            let result = terminal_failure(&task_id, &error, attempt, elapsed_ms);
            graph.mark_terminal(&task_id, result)?;
            self.emit(graph, &task_id);
            return Err(SchedulerError::Synthesis(match error {
                TaskError::Synthesis(e) => e,
                other => SynthesisError::Aborted(other.to_string()),
            }));
        }

        if definition.retry.allows_retry(attempt) {
            let delay = definition.retry.backoff_after(attempt);
            warn!(
                task_id = %task_id,
                attempt,
                error = %error,
                backoff_ms = delay.as_millis() as u64,
                "Task attempt failed, retrying"
            );
            graph.mark_retrying(&task_id, error.to_string())?;
            self.emit(graph, &task_id);
            workers.spawn(async move {
                tokio::time::sleep(delay).await;
                WorkerEvent::BackoffElapsed(task_id)
            });
            return Ok(());
        }

        warn!(
            task_id = %task_id,
            attempts = attempt,
            error = %error,
            "Task failed, retries exhausted"
        );
        let result = terminal_failure(&task_id, &error, attempt, elapsed_ms);
        self.finish(graph, state, &task_id, result)
    }

    fn finish(
        &self,
        graph: &mut TaskGraph,
        state: &mut Dispatch,
        task_id: &TaskDefId,
        result: TaskResult,
    ) -> Result<(), SchedulerError> {
        let unlocked = graph.mark_terminal(task_id, result)?;
        self.emit(graph, task_id);
        self.enqueue(graph, state, unlocked)
    }
}

fn terminal_failure(
    task_id: &TaskDefId,
    error: &TaskError,
    attempts: u32,
    elapsed_ms: u64,
) -> TaskResult {
    if error.is_timeout() {
        TaskResult::timed_out(task_id.clone(), error.to_string(), attempts, elapsed_ms)
    } else {
        TaskResult::failed(task_id.clone(), error.to_string(), attempts, elapsed_ms)
    }
}

/// Run one attempt on its own task under a wall-clock limit.
///
/// Dropping the returned future (timeout, cancellation) aborts the attempt.
/// A panic inside the attempt is reported as a failed attempt.
async fn attempt_worker<F>(
    task_id: TaskDefId,
    attempt: u32,
    timeout: Duration,
    work: F,
) -> WorkerEvent
where
    F: Future<Output = Result<Completion, TaskError>> + Send + 'static,
{
    let started = Instant::now();
    let handle = AbortOnDropHandle::new(tokio::spawn(work));
    let outcome = match tokio::time::timeout(timeout, handle).await {
        Err(_) => Err(TaskError::Timeout(timeout)),
        Ok(Err(join)) => Err(TaskError::Panicked(join.to_string())),
        Ok(Ok(result)) => result,
    };
    WorkerEvent::Finished {
        task_id,
        attempt,
        elapsed_ms: started.elapsed().as_millis() as u64,
        outcome,
    }
}
