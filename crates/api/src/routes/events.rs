//! Inbound event deliveries from the broker.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use protocol::{EventEnvelope, Topic};
use serde_json::json;
use transport::Publisher;

use crate::AppState;
use crate::error::ApiError;

/// POST /{topic}_events: hands one delivery to the participant.
///
/// Undecodable bodies are dead-lettered and acknowledged so the broker does
/// not redeliver them. Decoded envelopes are handled on their own task; the
/// response carries the resulting disposition, or 503 if the outcome could
/// not be published and the delivery should be retried.
pub async fn receive<P: Publisher + 'static>(
    State(state): State<Arc<AppState<P>>>,
    topic: Topic,
    body: Bytes,
) -> Result<Response, ApiError> {
    let envelope = match EventEnvelope::decode(topic, &body) {
        Ok(envelope) => envelope,
        Err(err) => {
            state.dead_letters.push(topic, &body, &err);
            let ack = json!({ "outcome": "dead_lettered", "error": err.to_string() });
            return Ok(Json(ack).into_response());
        }
    };

    let participant = state.participant.clone();
    let handled = tokio::spawn(async move { participant.handle(&envelope).await }).await;

    match handled {
        Ok(Ok(disposition)) => Ok(Json(disposition).into_response()),
        Ok(Err(err)) => Err(err.into()),
        Err(join) => Err(ApiError::Internal(format!("event handler task failed: {join}"))),
    }
}
