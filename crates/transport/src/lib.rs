//! Transport adapter between saga participants and the external broker.
//!
//! Outbound, envelopes are posted to `<broker>/v1/pubsub/<topic>/message`
//! and transient failures are retried with jittered exponential backoff up
//! to a fixed attempt ceiling. Inbound, each participant declares which
//! topics it wants delivered to which local endpoint; deliveries that cannot
//! be decoded end up in a [`DeadLetterQueue`].

pub mod dead_letter;
pub mod discovery;
pub mod error;
pub mod http;
pub mod memory;
pub mod publisher;
pub mod retry;

pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use discovery::{Subscription, SubscriptionConfig};
pub use error::{PublishError, Result};
pub use http::HttpPublisher;
pub use memory::InMemoryBroker;
pub use publisher::Publisher;
pub use retry::{RetryPolicy, RetryingPublisher};
