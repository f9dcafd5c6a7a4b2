//! Read-only inspection of local saga state.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use ledger::{StepRecord, StepStore};
use protocol::CorrelationId;
use transport::{DeadLetter, Publisher};

use crate::AppState;
use crate::error::ApiError;

/// GET /sagas/{id}: this participant's record for one correlation id.
pub async fn get<P: Publisher>(
    State(state): State<Arc<AppState<P>>>,
    Path(id): Path<String>,
) -> Result<Json<StepRecord>, ApiError> {
    let correlation_id = CorrelationId::parse(id)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    state
        .participant
        .store()
        .get(&correlation_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no saga {correlation_id}")))
}

/// GET /dead_letters: deliveries parked because they could not be decoded.
pub async fn dead_letters<P: Publisher>(State(state): State<Arc<AppState<P>>>) -> Json<Vec<DeadLetter>> {
    Json(state.dead_letters.entries())
}
