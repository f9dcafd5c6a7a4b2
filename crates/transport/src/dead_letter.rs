use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use protocol::{MalformedEvent, Topic};
use serde::Serialize;

/// A delivery that could not be decoded into an envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub topic: Topic,
    pub body: String,
    pub error: String,
    pub received_at: DateTime<Utc>,
}

/// Bounded queue of undecodable deliveries, oldest dropped first.
#[derive(Debug, Clone)]
pub struct DeadLetterQueue {
    entries: Arc<Mutex<VecDeque<DeadLetter>>>,
    capacity: usize,
}

impl DeadLetterQueue {
    pub const DEFAULT_CAPACITY: usize = 1_000;

    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DeadLetter>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parks a raw delivery together with the reason it was rejected.
    pub fn push(&self, topic: Topic, body: &[u8], error: &MalformedEvent) {
        let letter = DeadLetter {
            topic,
            body: String::from_utf8_lossy(body).into_owned(),
            error: error.to_string(),
            received_at: Utc::now(),
        };
        tracing::warn!(%topic, error = %letter.error, "dead-lettered malformed delivery");
        metrics::counter!("saga_dead_letters_total", "topic" => topic.as_str()).increment(1);

        let mut entries = self.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(letter);
    }

    pub fn entries(&self) -> Vec<DeadLetter> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_body_and_reason() {
        let queue = DeadLetterQueue::default();
        queue.push(
            Topic::ShippingUpdates,
            br#"{"status":true}"#,
            &MalformedEvent::EmptyCorrelationId,
        );

        let entries = queue.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].topic, Topic::ShippingUpdates);
        assert_eq!(entries[0].body, r#"{"status":true}"#);
        assert_eq!(entries[0].error, MalformedEvent::EmptyCorrelationId.to_string());
    }

    #[test]
    fn test_drops_oldest_past_capacity() {
        let queue = DeadLetterQueue::new(2);
        for body in [b"a", b"b", b"c"] {
            queue.push(
                Topic::OrderUpdates,
                body,
                &MalformedEvent::InvalidJson("eof".into()),
            );
        }
        let bodies: Vec<_> = queue.entries().into_iter().map(|l| l.body).collect();
        assert_eq!(bodies, vec!["b", "c"]);
        assert_eq!(queue.len(), 2);
    }
}
