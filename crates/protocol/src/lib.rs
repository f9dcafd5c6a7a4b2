//! Event protocol shared by every saga participant.
//!
//! Defines the immutable [`EventEnvelope`], the closed set of
//! [`EventKind`]s, the broker [`Topic`]s they travel on, and the JSON wire
//! codec. Decoding is strict: anything that cannot be mapped onto a known
//! kind with a complete payload is reported as [`MalformedEvent`] so that
//! no state machine ever sees it.

pub mod envelope;
pub mod error;
pub mod kind;
pub mod payload;

pub use common::CorrelationId;
pub use envelope::{EventEnvelope, EventId};
pub use error::{MalformedEvent, Result};
pub use kind::{EventKind, Topic};
pub use payload::{OrderPayload, Payload, PaymentPayload, ShippingPayload};
