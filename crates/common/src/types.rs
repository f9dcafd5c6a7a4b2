use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier threading every event of one saga instance.
///
/// The initiator generates it once; every other participant only propagates
/// it. It is treated as an opaque, non-empty string so that ids minted by
/// other emitters (not necessarily UUIDs) are still accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CorrelationId(String);

/// Error returned when an empty string is offered as a correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidCorrelationId;

impl std::fmt::Display for InvalidCorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "correlation id must not be empty")
    }
}

impl std::error::Error for InvalidCorrelationId {}

impl CorrelationId {
    /// Generates a fresh, globally unique correlation id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an existing id, rejecting empty or whitespace-only strings.
    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidCorrelationId> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(InvalidCorrelationId);
        }
        Ok(Self(value))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for CorrelationId {
    type Error = InvalidCorrelationId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for CorrelationId {
    type Error = InvalidCorrelationId;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<CorrelationId> for String {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
