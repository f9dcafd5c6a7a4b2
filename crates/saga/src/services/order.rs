//! Order book trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use protocol::{CorrelationId, OrderPayload};

use crate::error::SagaError;
use crate::failure::{FailureStrategy, NeverFail};

/// Result of confirming an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderConfirmation {
    pub reference: String,
}

/// Trait for the order book.
#[async_trait]
pub trait OrderService: Send + Sync {
    /// Marks an order as fulfilled once it has shipped. Confirming the same
    /// saga twice returns the existing confirmation.
    async fn confirm(
        &self,
        correlation_id: &CorrelationId,
        order: &OrderPayload,
    ) -> Result<OrderConfirmation, SagaError>;

    /// Withdraws a confirmation. Withdrawing twice is a no-op.
    async fn reopen(&self, reference: &str) -> Result<(), SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryOrderState {
    confirmed: HashMap<String, (CorrelationId, OrderPayload)>,
    by_saga: HashMap<CorrelationId, String>,
    next_id: u32,
}

/// In-memory order book.
#[derive(Debug, Clone)]
pub struct InMemoryOrderService {
    state: Arc<RwLock<InMemoryOrderState>>,
    failures: Arc<dyn FailureStrategy>,
}

impl InMemoryOrderService {
    pub fn new() -> Self {
        Self::with_strategy(NeverFail)
    }

    pub fn with_strategy(failures: impl FailureStrategy + 'static) -> Self {
        Self {
            state: Arc::default(),
            failures: Arc::new(failures),
        }
    }

    /// Returns the number of confirmed orders.
    pub fn confirmed_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .confirmed
            .len()
    }
}

impl Default for InMemoryOrderService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderService for InMemoryOrderService {
    async fn confirm(
        &self,
        correlation_id: &CorrelationId,
        order: &OrderPayload,
    ) -> Result<OrderConfirmation, SagaError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(reference) = state.by_saga.get(correlation_id) {
            return Ok(OrderConfirmation {
                reference: reference.clone(),
            });
        }

        super::check(
            self.failures.decide(correlation_id),
            "order",
            "order can no longer be fulfilled",
            "order book unavailable",
        )?;

        state.next_id += 1;
        let reference = format!("ORD-{:04}", state.next_id);
        state
            .confirmed
            .insert(reference.clone(), (correlation_id.clone(), *order));
        state
            .by_saga
            .insert(correlation_id.clone(), reference.clone());

        Ok(OrderConfirmation { reference })
    }

    async fn reopen(&self, reference: &str) -> Result<(), SagaError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some((correlation_id, _)) = state.confirmed.remove(reference) {
            state.by_saga.remove(&correlation_id);
        }
        Ok(())
    }
}
