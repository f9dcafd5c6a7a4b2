//! Saga error types.

use ledger::LedgerError;
use protocol::{CorrelationId, EventKind, MalformedEvent};
use thiserror::Error;
use transport::PublishError;

/// Errors that can occur while a participant handles an event.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The event could not be built or decoded.
    #[error("Malformed event: {0}")]
    Malformed(#[from] MalformedEvent),

    /// An outbound event was not confirmed by the broker; the transition
    /// that produced it was rolled back.
    #[error("Publishing {kind} for {correlation_id} failed: {source}")]
    PublishFailure {
        kind: EventKind,
        correlation_id: CorrelationId,
        source: PublishError,
    },

    /// The reversal action failed; the record stays `Compensating`.
    #[error("Compensation for {correlation_id} failed: {reason}")]
    CompensationFailed {
        correlation_id: CorrelationId,
        reason: String,
    },

    /// A local service refused the request for good.
    #[error("{service} rejected the request: {reason}")]
    Rejected {
        service: &'static str,
        reason: String,
    },

    /// A local service could not serve the request right now.
    #[error("{service} is unavailable: {reason}")]
    Unavailable {
        service: &'static str,
        reason: String,
    },

    /// A record change was refused by the step state machine.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A saga with this correlation id already exists.
    #[error("Saga {0} has already been started")]
    AlreadyStarted(CorrelationId),

    /// The participant has no initiating event.
    #[error("{0} does not start sagas")]
    NotInitiator(&'static str),
}

impl SagaError {
    /// True if the same delivery may succeed when retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SagaError::PublishFailure { .. }
                | SagaError::CompensationFailed { .. }
                | SagaError::Unavailable { .. }
        )
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
