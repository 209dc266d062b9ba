use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::app::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub document_processing: String,
}

/// Health check endpoint. Reports configuration only, no upstream call.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let document_processing = if state.processor.is_configured() {
        "configured"
    } else {
        "not_configured"
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        document_processing: document_processing.to_string(),
    })
}
