//! Shared types for the order saga services.

pub mod types;

pub use types::{CorrelationId, InvalidCorrelationId};
