//! Saga entry point.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use protocol::{CorrelationId, OrderPayload};
use saga::SagaError;
use saga::steps::DEFAULT_ORDER;
use serde::Deserialize;
use transport::Publisher;

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

/// Optional body of `POST /orders`; missing fields take the demo defaults.
#[derive(Debug, Default, Deserialize)]
pub struct CreateOrderRequest {
    pub order_id: Option<i64>,
    pub product_id: Option<i64>,
}

impl CreateOrderRequest {
    fn into_payload(self) -> OrderPayload {
        OrderPayload {
            order_id: self.order_id.unwrap_or(DEFAULT_ORDER.order_id),
            product_id: self.product_id.unwrap_or(DEFAULT_ORDER.product_id),
        }
    }
}

// -- Handlers --

/// POST /orders: starts a saga and returns its correlation id as text.
///
/// Answers once `OrderCreated` is confirmed by the broker, without waiting
/// for the rest of the saga. If the announcement fails nothing is kept.
pub async fn create<P: Publisher>(
    State(state): State<Arc<AppState<P>>>,
    body: Bytes,
) -> Result<String, ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        CreateOrderRequest::default()
    } else {
        serde_json::from_slice::<CreateOrderRequest>(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid order request: {e}")))?
    };

    let correlation_id = CorrelationId::generate();
    state
        .participant
        .initiate(correlation_id.clone(), request.into_payload().into())
        .await
        .map_err(|err| match err {
            SagaError::PublishFailure { .. } => ApiError::Internal(err.to_string()),
            other => ApiError::Saga(other),
        })?;

    Ok(correlation_id.to_string())
}
