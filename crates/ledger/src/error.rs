use thiserror::Error;

use crate::{CorrelationId, StepState};

/// Errors raised by the step ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The requested transition is not allowed by the step state machine.
    #[error("Invalid transition for {correlation_id}: {from} -> {to}")]
    InvalidTransition {
        correlation_id: CorrelationId,
        from: StepState,
        to: StepState,
    },
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
