//! HTTP request handlers.

mod catalog;
mod health;
mod runs;

pub use catalog::get_catalog;
pub use health::{health_check, metrics_handler};
pub use runs::{cancel_run, create_run, get_run, list_artifacts, rerun};
