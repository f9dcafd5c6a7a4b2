use std::sync::Arc;

use async_trait::async_trait;
use protocol::EventEnvelope;

use crate::Result;

/// Hands envelopes to the broker.
///
/// The topic is implied by the envelope's kind. An `Ok` return means the
/// broker confirmed the message; anything else means it may not have been
/// delivered and the caller must not treat the emitting transition as
/// committed.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<()>;
}

#[async_trait]
impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<()> {
        (**self).publish(envelope).await
    }
}
