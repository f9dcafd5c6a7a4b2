//! Subscription discovery for the broker.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use transport::{Publisher, SubscriptionConfig};

use crate::AppState;

/// GET /turbine/config: which topics to deliver here, and to which path.
pub async fn config<P: Publisher>(State(state): State<Arc<AppState<P>>>) -> Json<SubscriptionConfig> {
    Json(state.participant.subscription_config())
}
