//! Run handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, warn};

use strategist_core::{RunId, RunIntake, RunStatus};

use crate::http::responses::{CreateRunResponse, ErrorResponse};
use crate::service::{RunService, ServiceError};
use crate::state::AppState;

fn error_response(err: ServiceError) -> Response {
    let status = match &err {
        ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::AlreadyTerminal(_) | ServiceError::State(_) => StatusCode::CONFLICT,
        ServiceError::Graph(_) | ServiceError::Store(_) => {
            error!(error = %err, "Request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_client_error() {
        warn!(error = %err, status = %status, "Request rejected");
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// Submit a new run.
pub async fn create_run(
    State(state): State<Arc<AppState>>,
    Json(intake): Json<RunIntake>,
) -> Response {
    match RunService::new(state).submit_intake(intake).await {
        Ok(run_id) => (
            StatusCode::CREATED,
            Json(CreateRunResponse {
                run_id,
                status: RunStatus::Scheduled,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// Current state of a run.
pub async fn get_run(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match RunService::new(state).get_run_status(&RunId::new(id)).await {
        Ok(run) => Json(run).into_response(),
        Err(e) => error_response(e),
    }
}

/// Request cancellation of a run.
pub async fn cancel_run(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match RunService::new(state).cancel_run(&RunId::new(id)).await {
        Ok(run) => (StatusCode::ACCEPTED, Json(run)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Re-run a terminal run under a new id.
pub async fn rerun(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match RunService::new(state).rerun(&RunId::new(id)).await {
        Ok(run_id) => (
            StatusCode::CREATED,
            Json(CreateRunResponse {
                run_id,
                status: RunStatus::Scheduled,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// Artifacts persisted for a run.
pub async fn list_artifacts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match RunService::new(state).artifacts(&RunId::new(id)).await {
        Ok(artifacts) => Json(artifacts).into_response(),
        Err(e) => error_response(e),
    }
}
