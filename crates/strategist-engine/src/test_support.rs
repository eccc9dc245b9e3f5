//! Test doubles shared by the engine's unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use strategist_core::{
    Recommendation, RetryPolicy, RunSpec, RunSpecBuilder, TaskCatalog, TaskDefId, TaskDefinition,
    TaskOutput,
};

use crate::executor::{AgentExecutor, ExecutorError, RulesExecutor, TaskRequest};

/// Scripted behavior for one task id.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    /// Fail the first `n` attempts, then succeed.
    FailTimes(u32),
    AlwaysFail,
    /// Never return.
    Hang,
    /// Succeed after a delay.
    Delay(Duration),
    /// Return an output without the declared sections.
    OmitOutputs,
    /// Panic inside the invocation.
    Panic,
    /// Succeed with an extra recommendation that has zero effort.
    UnrankableAction,
}

/// Entry in the start/finish log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trace {
    Started(TaskDefId),
    Finished(TaskDefId),
}

/// Executor that follows a per-task script and records what it saw.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: RulesExecutor,
    behaviors: HashMap<TaskDefId, Behavior>,
    default_delay: Option<Duration>,
    requests: Mutex<Vec<TaskRequest>>,
    trace: Mutex<Vec<Trace>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, task_id: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(TaskDefId::new(task_id), behavior);
        self
    }

    /// Delay applied to every task without an explicit behavior.
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = Some(delay);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn requests(&self) -> Vec<TaskRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls_for(&self, task_id: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.task_id.as_str() == task_id)
            .count()
    }

    pub fn trace(&self) -> Vec<Trace> {
        self.trace.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a ScriptedExecutor, TaskDefId);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.0.trace.lock().unwrap().push(Trace::Finished(self.1.clone()));
    }
}

#[async_trait]
impl AgentExecutor for ScriptedExecutor {
    async fn invoke(
        &self,
        definition: &TaskDefinition,
        request: TaskRequest,
    ) -> Result<TaskOutput, ExecutorError> {
        self.requests.lock().unwrap().push(request.clone());
        self.trace.lock().unwrap().push(Trace::Started(request.task_id.clone()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(self, request.task_id.clone());

        let behavior = self.behaviors.get(&request.task_id).cloned();
        match behavior {
            None | Some(Behavior::Succeed) => {
                if let (None, Some(delay)) = (&behavior, self.default_delay) {
                    tokio::time::sleep(delay).await;
                }
            }
            Some(Behavior::FailTimes(n)) if request.attempt <= n => {
                return Err(ExecutorError::Failed(format!("scripted failure #{}", request.attempt)));
            }
            Some(Behavior::FailTimes(_)) => {}
            Some(Behavior::AlwaysFail) => {
                return Err(ExecutorError::Unavailable("scripted outage".to_string()));
            }
            Some(Behavior::Hang) => std::future::pending::<()>().await,
            Some(Behavior::Delay(delay)) => tokio::time::sleep(delay).await,
            Some(Behavior::OmitOutputs) => return Ok(TaskOutput::new("incomplete")),
            Some(Behavior::Panic) => panic!("scripted panic in {}", request.task_id),
            Some(Behavior::UnrankableAction) => {
                return Ok(self
                    .rules
                    .compose(definition, &request)
                    .with_recommendation(Recommendation::new("Do everything at once", 8.0, 0.0)));
            }
        }
        Ok(self.rules.compose(definition, &request))
    }
}

/// Reference catalog with millisecond-scale retries and timeouts.
pub fn fast_catalog() -> Arc<TaskCatalog> {
    let fast_retry = RetryPolicy {
        max_attempts: 3,
        initial_backoff_ms: 5,
        multiplier: 2,
        max_backoff_ms: 20,
    };
    let definitions = TaskCatalog::reference()
        .unwrap()
        .definitions()
        .iter()
        .cloned()
        .map(|d| {
            if d.is_synthesis() {
                d.with_timeout(Duration::from_secs(5))
            } else {
                d.with_retry(fast_retry).with_timeout(Duration::from_millis(300))
            }
        })
        .collect();
    Arc::new(TaskCatalog::new(definitions).unwrap())
}

pub fn sample_spec() -> RunSpec {
    RunSpecBuilder::new("acme-dental", "Increase booked consults by 30% without raising spend")
        .kpi("Booked consults")
        .timeframe("90 days")
        .budget("Flat")
        .channels("Google Ads, Meta, Local SEO")
        .build()
        .unwrap()
}
