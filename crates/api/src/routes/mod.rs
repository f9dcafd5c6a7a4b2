//! Route handlers.

pub mod discovery;
pub mod events;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod sagas;
