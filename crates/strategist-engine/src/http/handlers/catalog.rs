//! Catalog handler.

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::http::responses::CatalogEntryResponse;
use crate::state::AppState;

/// List the task catalog in catalog order.
pub async fn get_catalog(State(state): State<Arc<AppState>>) -> Json<Vec<CatalogEntryResponse>> {
    Json(
        state
            .catalog
            .definitions()
            .iter()
            .map(CatalogEntryResponse::from)
            .collect(),
    )
}
