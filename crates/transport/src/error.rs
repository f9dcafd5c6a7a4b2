use thiserror::Error;

/// Errors surfaced when an envelope could not be handed to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The broker could not be reached (refused, reset, timed out).
    #[error("Broker unreachable: {0}")]
    Connection(String),

    /// The broker answered with something other than 200.
    #[error("Broker rejected message with status {status}")]
    Status { status: u16 },

    /// The HTTP client could not be built or the broker URL is invalid.
    #[error("Broker client misconfigured: {0}")]
    Configuration(String),

    /// Every allowed attempt failed with a transient error.
    #[error("Publish gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: usize,
        last: Box<PublishError>,
    },
}

impl PublishError {
    /// Returns true if retrying the same publish may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PublishError::Connection(_) => true,
            PublishError::Status { status } => *status >= 500 || matches!(status, 408 | 429),
            PublishError::Configuration(_) | PublishError::Exhausted { .. } => false,
        }
    }
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, PublishError>;
