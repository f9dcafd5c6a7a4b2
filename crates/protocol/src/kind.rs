//! Event kinds and the broker topics they travel on.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::MalformedEvent;

/// Broker topic. Each participant publishes on exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    OrderUpdates,
    PaymentUpdates,
    ShippingUpdates,
}

impl Topic {
    /// All topics, in saga order.
    pub const ALL: [Topic; 3] = [
        Topic::OrderUpdates,
        Topic::PaymentUpdates,
        Topic::ShippingUpdates,
    ];

    /// Returns the topic name used on the broker.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::OrderUpdates => "order_updates",
            Topic::PaymentUpdates => "payment_updates",
            Topic::ShippingUpdates => "shipping_updates",
        }
    }

    /// Returns the local HTTP path a subscriber receives this topic on.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Topic::OrderUpdates => "/order_events",
            Topic::PaymentUpdates => "/payment_events",
            Topic::ShippingUpdates => "/shipping_events",
        }
    }

    /// The kind published when the step owning this topic succeeds.
    pub fn success_kind(&self) -> EventKind {
        match self {
            Topic::OrderUpdates => EventKind::OrderCompleted,
            Topic::PaymentUpdates => EventKind::PaymentSucceeded,
            Topic::ShippingUpdates => EventKind::ShippingSucceeded,
        }
    }

    /// The kind published when the step owning this topic fails.
    pub fn failure_kind(&self) -> EventKind {
        match self {
            Topic::OrderUpdates => EventKind::OrderCancelled,
            Topic::PaymentUpdates => EventKind::PaymentFailed,
            Topic::ShippingUpdates => EventKind::ShippingFailed,
        }
    }

    /// The kind published after the step owning this topic was reversed.
    ///
    /// The order step is never reversed; a failed order is cancelled instead.
    pub fn compensated_kind(&self) -> Option<EventKind> {
        match self {
            Topic::OrderUpdates => None,
            Topic::PaymentUpdates => Some(EventKind::PaymentCompensated),
            Topic::ShippingUpdates => Some(EventKind::ShippingCompensated),
        }
    }

    /// Kind inferred for emitters that only send `status`.
    pub fn legacy_kind(&self, status: bool) -> EventKind {
        match (self, status) {
            (Topic::OrderUpdates, true) => EventKind::OrderCreated,
            (topic, true) => topic.success_kind(),
            (topic, false) => topic.failure_kind(),
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Topic {
    type Err = MalformedEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| MalformedEvent::UnknownTopic(s.to_string()))
    }
}

/// The closed set of saga event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A new saga instance was started by the order service.
    OrderCreated,
    /// The order observed the whole saga succeed.
    OrderCompleted,
    /// The order gave up on the saga (failure or timeout).
    OrderCancelled,
    PaymentSucceeded,
    PaymentFailed,
    /// A captured payment was refunded.
    PaymentCompensated,
    ShippingSucceeded,
    ShippingFailed,
    /// A created shipment was cancelled.
    ShippingCompensated,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::OrderCreated,
        EventKind::OrderCompleted,
        EventKind::OrderCancelled,
        EventKind::PaymentSucceeded,
        EventKind::PaymentFailed,
        EventKind::PaymentCompensated,
        EventKind::ShippingSucceeded,
        EventKind::ShippingFailed,
        EventKind::ShippingCompensated,
    ];

    /// Returns the kind name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OrderCreated => "OrderCreated",
            EventKind::OrderCompleted => "OrderCompleted",
            EventKind::OrderCancelled => "OrderCancelled",
            EventKind::PaymentSucceeded => "PaymentSucceeded",
            EventKind::PaymentFailed => "PaymentFailed",
            EventKind::PaymentCompensated => "PaymentCompensated",
            EventKind::ShippingSucceeded => "ShippingSucceeded",
            EventKind::ShippingFailed => "ShippingFailed",
            EventKind::ShippingCompensated => "ShippingCompensated",
        }
    }

    /// The topic this kind is published on.
    pub fn topic(&self) -> Topic {
        match self {
            EventKind::OrderCreated | EventKind::OrderCompleted | EventKind::OrderCancelled => {
                Topic::OrderUpdates
            }
            EventKind::PaymentSucceeded
            | EventKind::PaymentFailed
            | EventKind::PaymentCompensated => Topic::PaymentUpdates,
            EventKind::ShippingSucceeded
            | EventKind::ShippingFailed
            | EventKind::ShippingCompensated => Topic::ShippingUpdates,
        }
    }

    /// Value of the wire `status` flag for this kind.
    pub fn status(&self) -> bool {
        matches!(
            self,
            EventKind::OrderCreated
                | EventKind::OrderCompleted
                | EventKind::PaymentSucceeded
                | EventKind::ShippingSucceeded
        )
    }

    /// Kinds that report the other outcome of the same step.
    ///
    /// Only one member of an outcome group may ever be honored for a given
    /// correlation id; whichever is recorded first wins.
    pub fn siblings(&self) -> &'static [EventKind] {
        match self {
            EventKind::OrderCompleted => &[EventKind::OrderCancelled],
            EventKind::OrderCancelled => &[EventKind::OrderCompleted],
            EventKind::PaymentSucceeded => &[EventKind::PaymentFailed],
            EventKind::PaymentFailed => &[EventKind::PaymentSucceeded],
            EventKind::ShippingSucceeded => &[EventKind::ShippingFailed],
            EventKind::ShippingFailed => &[EventKind::ShippingSucceeded],
            EventKind::OrderCreated
            | EventKind::PaymentCompensated
            | EventKind::ShippingCompensated => &[],
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = MalformedEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| MalformedEvent::UnknownKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names_match_broker_topics() {
        assert_eq!(Topic::OrderUpdates.as_str(), "order_updates");
        assert_eq!(Topic::PaymentUpdates.as_str(), "payment_updates");
        assert_eq!(Topic::ShippingUpdates.as_str(), "shipping_updates");
        assert_eq!(
            "payment_updates".parse::<Topic>().unwrap(),
            Topic::PaymentUpdates
        );
        assert!("inventory_updates".parse::<Topic>().is_err());
    }

    #[test]
    fn test_every_kind_round_trips_through_its_name() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert_eq!(
            "RefundIssued".parse::<EventKind>(),
            Err(MalformedEvent::UnknownKind("RefundIssued".to_string()))
        );
    }

    #[test]
    fn test_outcome_kinds_belong_to_their_topic() {
        for topic in Topic::ALL {
            assert_eq!(topic.success_kind().topic(), topic);
            assert_eq!(topic.failure_kind().topic(), topic);
            assert!(topic.success_kind().status());
            assert!(!topic.failure_kind().status());
            if let Some(kind) = topic.compensated_kind() {
                assert_eq!(kind.topic(), topic);
                assert!(!kind.status());
            }
        }
    }

    #[test]
    fn test_legacy_kind_inference() {
        assert_eq!(Topic::OrderUpdates.legacy_kind(true), EventKind::OrderCreated);
        assert_eq!(Topic::OrderUpdates.legacy_kind(false), EventKind::OrderCancelled);
        assert_eq!(
            Topic::PaymentUpdates.legacy_kind(true),
            EventKind::PaymentSucceeded
        );
        assert_eq!(
            Topic::ShippingUpdates.legacy_kind(false),
            EventKind::ShippingFailed
        );
    }

    #[test]
    fn test_siblings_are_symmetric() {
        for kind in EventKind::ALL {
            for sibling in kind.siblings() {
                assert!(sibling.siblings().contains(&kind));
                assert_eq!(sibling.topic(), kind.topic());
            }
        }
        assert!(EventKind::PaymentCompensated.siblings().is_empty());
    }
}
