use thiserror::Error;

use crate::{EventKind, Topic};

/// Reasons an inbound delivery cannot be turned into an [`EventEnvelope`].
///
/// [`EventEnvelope`]: crate::EventEnvelope
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedEvent {
    /// The body is not a JSON object with the common envelope fields.
    #[error("Invalid JSON body: {0}")]
    InvalidJson(String),

    /// The correlation id is present but empty.
    #[error("Correlation id must not be empty")]
    EmptyCorrelationId,

    /// The `kind` field names no known event kind.
    #[error("Unknown event kind: {0}")]
    UnknownKind(String),

    /// The delivery topic is not one of the saga topics.
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// The kind does not travel on the topic it was delivered on.
    #[error("Event kind {kind} is not published on topic {topic}")]
    TopicMismatch { kind: EventKind, topic: Topic },

    /// The explicit kind contradicts the `status` flag.
    #[error("Event kind {kind} contradicts status={status}")]
    StatusMismatch { kind: EventKind, status: bool },

    /// Required payload fields are absent or have the wrong type.
    #[error("Invalid payload for {kind}: {reason}")]
    Payload { kind: EventKind, reason: String },
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, MalformedEvent>;
