//! Local business actions behind each saga step, with in-memory
//! implementations whose failures are driven by a [`FailureStrategy`].
//!
//! [`FailureStrategy`]: crate::failure::FailureStrategy

pub mod order;
pub mod payment;
pub mod shipping;

pub use order::{InMemoryOrderService, OrderConfirmation, OrderService};
pub use payment::{InMemoryPaymentService, PaymentResult, PaymentService};
pub use shipping::{InMemoryShippingService, ShipmentResult, ShippingService};

use crate::error::SagaError;
use crate::failure::FailureDecision;

/// Turns a failure decision into the error a service reports.
pub(crate) fn check(
    decision: FailureDecision,
    service: &'static str,
    rejected: &str,
    unavailable: &str,
) -> Result<(), SagaError> {
    match decision {
        FailureDecision::Proceed => Ok(()),
        FailureDecision::Retryable => Err(SagaError::Unavailable {
            service,
            reason: unavailable.to_string(),
        }),
        FailureDecision::Reject => Err(SagaError::Rejected {
            service,
            reason: rejected.to_string(),
        }),
    }
}
