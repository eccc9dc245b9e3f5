//! Overnight Strategist Engine
//!
//! Orchestrates an overnight run: builds the task graph from the catalog,
//! schedules specialist tasks under bounded concurrency with timeouts and
//! retries, waits at the fan-in barrier, synthesizes a ranked plan and
//! packages the deliverables. Also hosts the HTTP surface and persistence.

pub mod brief;
pub mod clients;
pub mod config;
pub mod executor;
pub mod graph;
pub mod http;
pub mod metrics;
pub mod packager;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod store;
pub mod synthesis;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use executor::{AgentExecutor, HttpExecutor, RulesExecutor};
pub use graph::TaskGraph;
pub use packager::Manifest;
pub use scheduler::Scheduler;
pub use service::{RunService, ServiceError};
pub use state::AppState;
pub use store::{FileStore, MemoryStore, RunStore};
