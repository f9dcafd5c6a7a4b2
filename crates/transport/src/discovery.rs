use protocol::Topic;
use serde::{Deserialize, Serialize};

/// One topic a participant wants delivered, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub topic: Topic,
    pub endpoint: String,
}

/// What the broker reads from a participant's discovery endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionConfig {
    pub service_name: String,
    pub subscriptions: Vec<Subscription>,
}

impl SubscriptionConfig {
    /// Subscribes `service_name` to each topic at its conventional endpoint.
    pub fn for_topics(service_name: impl Into<String>, topics: &[Topic]) -> Self {
        Self {
            service_name: service_name.into(),
            subscriptions: topics
                .iter()
                .map(|&topic| Subscription {
                    topic,
                    endpoint: topic.endpoint().to_string(),
                })
                .collect(),
        }
    }

    pub fn topics(&self) -> impl Iterator<Item = Topic> + '_ {
        self.subscriptions.iter().map(|s| s.topic)
    }
}
