//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use transport::Publisher;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

/// GET /health: returns service health status.
pub async fn check<P: Publisher>(State(state): State<Arc<AppState<P>>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: state.participant.name(),
    })
}
