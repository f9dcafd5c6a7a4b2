//! Prometheus metrics endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use ledger::StepStore;
use transport::Publisher;

use crate::AppState;

/// GET /metrics: returns Prometheus-formatted metrics.
///
/// Gauges derived from in-memory state are refreshed on every scrape.
pub async fn get<P: Publisher>(State(state): State<Arc<AppState<P>>>) -> impl IntoResponse {
    let service = state.participant.name();
    metrics::gauge!("saga_records", "service" => service)
        .set(state.participant.store().len().await as f64);
    metrics::gauge!("saga_dead_letters_parked", "service" => service)
        .set(state.dead_letters.len() as f64);

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.render(),
    )
}
