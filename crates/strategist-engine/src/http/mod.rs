//! HTTP API for the engine.
//!
//! Provides endpoints for:
//! - Run submission and status (`/v1/runs`, `/v1/runs/:id`)
//! - Cancellation and re-runs (`/v1/runs/:id/cancel`, `/v1/runs/:id/rerun`)
//! - Persisted artifacts (`/v1/runs/:id/artifacts`)
//! - The task catalog (`/v1/catalog`)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod handlers;
pub mod responses;

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Run routes
        .route("/v1/runs", post(handlers::create_run))
        .route("/v1/runs/:id", get(handlers::get_run))
        .route("/v1/runs/:id/cancel", post(handlers::cancel_run))
        .route("/v1/runs/:id/rerun", post(handlers::rerun))
        .route("/v1/runs/:id/artifacts", get(handlers::list_artifacts))
        .route("/v1/catalog", get(handlers::get_catalog))
        // Observability routes
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::clients::StaticClientDirectory;
    use crate::config::Config;
    use crate::executor::RulesExecutor;
    use crate::http::responses::CreateRunResponse;
    use crate::packager::Manifest;
    use crate::store::MemoryStore;
    use strategist_core::TaskCatalog;

    fn app() -> Router {
        let state = AppState::new(
            Config::default(),
            TaskCatalog::reference().unwrap(),
            Manifest::reference(),
            Arc::new(StaticClientDirectory::demo()),
            Arc::new(RulesExecutor::new()),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        create_router(state)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_catalog_lists_reference_tasks() {
        let response = app()
            .oneshot(Request::builder().uri("/v1/catalog").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_create_run_rejects_empty_goal() {
        let response = app()
            .oneshot(post_json(
                "/v1/runs",
                serde_json::json!({"client_ref": "acme-dental", "goal": "  "}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("goal"));
    }

    #[tokio::test]
    async fn test_create_then_fetch_run() {
        let app = app();
        let response = app
            .clone()
            .oneshot(post_json(
                "/v1/runs",
                serde_json::json!({
                    "client_ref": "acme-dental",
                    "goal": "More booked consults",
                    "kpi": "Booked consults",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let created: CreateRunResponse = serde_json::from_slice(&bytes).unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/runs/{}", created.run_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], created.run_id.as_str());
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let response = app()
            .oneshot(Request::builder().uri("/v1/runs/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
