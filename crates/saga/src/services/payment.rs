//! Payment service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use protocol::CorrelationId;

use crate::error::SagaError;
use crate::failure::{FailureStrategy, NeverFail};

/// Result of a successful payment charge.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentResult {
    /// The payment ID assigned by the payment service.
    pub payment_id: String,
    pub billing_id: i64,
    pub amount: f64,
}

/// Trait for payment processing operations.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Charges the customer behind a saga. Charging the same saga twice
    /// returns the existing payment.
    async fn charge(
        &self,
        correlation_id: &CorrelationId,
        amount: f64,
    ) -> Result<PaymentResult, SagaError>;

    /// Refunds a previously made payment. Refunding twice is a no-op.
    async fn refund(&self, payment_id: &str) -> Result<(), SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: HashMap<String, (CorrelationId, PaymentResult)>,
    by_saga: HashMap<CorrelationId, String>,
    next_id: u32,
    charges: usize,
    refunds: usize,
}

/// In-memory payment service.
#[derive(Debug, Clone)]
pub struct InMemoryPaymentService {
    state: Arc<RwLock<InMemoryPaymentState>>,
    failures: Arc<dyn FailureStrategy>,
}

impl InMemoryPaymentService {
    /// Creates a payment service that accepts every charge.
    pub fn new() -> Self {
        Self::with_strategy(NeverFail)
    }

    pub fn with_strategy(failures: impl FailureStrategy + 'static) -> Self {
        Self {
            state: Arc::default(),
            failures: Arc::new(failures),
        }
    }

    /// Returns the number of active payments.
    pub fn payment_count(&self) -> usize {
        self.read(|s| s.payments.len())
    }

    /// Returns how many charges actually took money.
    pub fn charge_count(&self) -> usize {
        self.read(|s| s.charges)
    }

    /// Returns how many refunds actually gave money back.
    pub fn refund_count(&self) -> usize {
        self.read(|s| s.refunds)
    }

    /// Returns true if a payment exists with the given ID.
    pub fn has_payment(&self, payment_id: &str) -> bool {
        self.read(|s| s.payments.contains_key(payment_id))
    }

    fn read<T>(&self, f: impl FnOnce(&InMemoryPaymentState) -> T) -> T {
        f(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Default for InMemoryPaymentService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn charge(
        &self,
        correlation_id: &CorrelationId,
        amount: f64,
    ) -> Result<PaymentResult, SagaError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let existing = state
            .by_saga
            .get(correlation_id)
            .and_then(|payment_id| state.payments.get(payment_id))
            .map(|(_, result)| result.clone());
        if let Some(existing) = existing {
            return Ok(existing);
        }

        super::check(
            self.failures.decide(correlation_id),
            "payment",
            "payment declined",
            "payment gateway unavailable",
        )?;

        state.next_id += 1;
        state.charges += 1;
        let result = PaymentResult {
            payment_id: format!("PAY-{:04}", state.next_id),
            billing_id: i64::from(state.next_id),
            amount,
        };
        state
            .payments
            .insert(result.payment_id.clone(), (correlation_id.clone(), result.clone()));
        state
            .by_saga
            .insert(correlation_id.clone(), result.payment_id.clone());

        Ok(result)
    }

    async fn refund(&self, payment_id: &str) -> Result<(), SagaError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some((correlation_id, _)) = state.payments.remove(payment_id) {
            state.by_saga.remove(&correlation_id);
            state.refunds += 1;
        }
        Ok(())
    }
}
