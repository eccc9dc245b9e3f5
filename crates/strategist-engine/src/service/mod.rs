//! Run lifecycle services.

mod run_service;

pub use run_service::{RunService, ServiceError};
