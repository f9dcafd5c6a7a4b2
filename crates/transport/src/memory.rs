use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use protocol::{EventEnvelope, EventKind, Topic};

use crate::{PublishError, Publisher, Result};

#[derive(Debug, Default)]
struct BrokerState {
    published: Vec<EventEnvelope>,
    undelivered: VecDeque<EventEnvelope>,
    injected_failures: VecDeque<PublishError>,
    attempts: usize,
}

/// In-memory stand-in for the broker.
///
/// Keeps every confirmed message in publish order, plus a queue of messages
/// not yet handed to subscribers. Failures can be injected ahead of time to
/// exercise retry and rollback paths.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    /// Creates a new empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `count` publish attempts fail with a transient 503.
    pub fn fail_next(&self, count: usize) {
        let mut state = self.lock();
        for _ in 0..count {
            state
                .injected_failures
                .push_back(PublishError::Status { status: 503 });
        }
    }

    /// Makes the next publish attempt fail with `error`.
    pub fn fail_next_with(&self, error: PublishError) {
        self.lock().injected_failures.push_back(error);
    }

    /// Total publish attempts seen, successful or not.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Every confirmed message, in publish order.
    pub fn published(&self) -> Vec<EventEnvelope> {
        self.lock().published.clone()
    }

    /// Confirmed messages on one topic.
    pub fn published_on(&self, topic: Topic) -> Vec<EventEnvelope> {
        self.lock()
            .published
            .iter()
            .filter(|e| e.topic() == topic)
            .cloned()
            .collect()
    }

    /// Kinds of every confirmed message, in publish order.
    pub fn published_kinds(&self) -> Vec<EventKind> {
        self.lock().published.iter().map(EventEnvelope::kind).collect()
    }

    /// How many confirmed messages have `kind`.
    pub fn count(&self, kind: EventKind) -> usize {
        self.lock()
            .published
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }

    /// Removes and returns messages not yet delivered to subscribers.
    pub fn drain_undelivered(&self) -> Vec<EventEnvelope> {
        self.lock().undelivered.drain(..).collect()
    }

    /// Forgets everything, including injected failures.
    pub fn clear(&self) {
        *self.lock() = BrokerState::default();
    }
}

#[async_trait]
impl Publisher for InMemoryBroker {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<()> {
        let mut state = self.lock();
        state.attempts += 1;
        if let Some(error) = state.injected_failures.pop_front() {
            return Err(error);
        }
        state.published.push(envelope.clone());
        state.undelivered.push_back(envelope.clone());
        Ok(())
    }
}
