//! Shipping service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use protocol::CorrelationId;

use crate::error::SagaError;
use crate::failure::{FailureStrategy, NeverFail};

/// Address every in-memory shipment goes to.
pub const DEFAULT_ADDRESS: &str = "acme address";

/// Result of a successful shipment creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentResult {
    /// The tracking number assigned by the shipping service.
    pub tracking_number: String,
    pub address: String,
}

/// Trait for shipping operations.
#[async_trait]
pub trait ShippingService: Send + Sync {
    /// Creates a shipment for a saga. Creating it twice returns the
    /// existing shipment.
    async fn create_shipment(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<ShipmentResult, SagaError>;

    /// Cancels a previously created shipment. Cancelling twice is a no-op.
    async fn cancel_shipment(&self, tracking_number: &str) -> Result<(), SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryShippingState {
    shipments: HashMap<String, (CorrelationId, ShipmentResult)>,
    by_saga: HashMap<CorrelationId, String>,
    next_id: u32,
    created: usize,
    cancelled: usize,
}

/// In-memory shipping service.
#[derive(Debug, Clone)]
pub struct InMemoryShippingService {
    state: Arc<RwLock<InMemoryShippingState>>,
    failures: Arc<dyn FailureStrategy>,
}

impl InMemoryShippingService {
    /// Creates a shipping service that accepts every shipment.
    pub fn new() -> Self {
        Self::with_strategy(NeverFail)
    }

    pub fn with_strategy(failures: impl FailureStrategy + 'static) -> Self {
        Self {
            state: Arc::default(),
            failures: Arc::new(failures),
        }
    }

    /// Returns the number of active shipments.
    pub fn shipment_count(&self) -> usize {
        self.read(|s| s.shipments.len())
    }

    pub fn created_count(&self) -> usize {
        self.read(|s| s.created)
    }

    pub fn cancelled_count(&self) -> usize {
        self.read(|s| s.cancelled)
    }

    /// Returns true if a shipment exists with the given tracking number.
    pub fn has_shipment(&self, tracking_number: &str) -> bool {
        self.read(|s| s.shipments.contains_key(tracking_number))
    }

    fn read<T>(&self, f: impl FnOnce(&InMemoryShippingState) -> T) -> T {
        f(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Default for InMemoryShippingService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShippingService for InMemoryShippingService {
    async fn create_shipment(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<ShipmentResult, SagaError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let existing = state
            .by_saga
            .get(correlation_id)
            .and_then(|tracking| state.shipments.get(tracking))
            .map(|(_, result)| result.clone());
        if let Some(existing) = existing {
            return Ok(existing);
        }

        super::check(
            self.failures.decide(correlation_id),
            "shipping",
            "carrier rejected shipment",
            "carrier unavailable",
        )?;

        state.next_id += 1;
        state.created += 1;
        let result = ShipmentResult {
            tracking_number: format!("TRACK-{:04}", state.next_id),
            address: DEFAULT_ADDRESS.to_string(),
        };
        state.shipments.insert(
            result.tracking_number.clone(),
            (correlation_id.clone(), result.clone()),
        );
        state
            .by_saga
            .insert(correlation_id.clone(), result.tracking_number.clone());

        Ok(result)
    }

    async fn cancel_shipment(&self, tracking_number: &str) -> Result<(), SagaError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some((correlation_id, _)) = state.shipments.remove(tracking_number) {
            state.by_saga.remove(&correlation_id);
            state.cancelled += 1;
        }
        Ok(())
    }
}
