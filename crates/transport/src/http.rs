use std::time::Duration;

use async_trait::async_trait;
use protocol::{EventEnvelope, Topic};
use reqwest::{Client, StatusCode};

use crate::{PublishError, Publisher, Result};

/// Publishes envelopes to the broker's HTTP pub/sub endpoint.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: Client,
    broker_url: String,
}

impl HttpPublisher {
    /// Creates a publisher for the broker at `broker_url`.
    pub fn new(broker_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let broker_url = broker_url.into().trim_end_matches('/').to_string();
        if !(broker_url.starts_with("http://") || broker_url.starts_with("https://")) {
            return Err(PublishError::Configuration(format!(
                "broker url must be http(s): {broker_url}"
            )));
        }
        let client = Client::builder()
            .user_agent(concat!("saga-transport/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Configuration(e.to_string()))?;
        Ok(Self { client, broker_url })
    }

    /// Returns the URL messages for `topic` are posted to.
    pub fn topic_url(&self, topic: Topic) -> String {
        format!("{}/v1/pubsub/{}/message", self.broker_url, topic)
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    #[tracing::instrument(
        skip(self, envelope),
        fields(topic = %envelope.topic(), kind = %envelope.kind(), correlation_id = %envelope.correlation_id())
    )]
    async fn publish(&self, envelope: &EventEnvelope) -> Result<()> {
        let url = self.topic_url(envelope.topic());
        let response = self
            .client
            .post(&url)
            .json(&envelope.to_json())
            .send()
            .await
            .map_err(|e| PublishError::Connection(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::OK {
            tracing::debug!("message published");
            Ok(())
        } else {
            tracing::warn!(status = status.as_u16(), "broker rejected message");
            Err(PublishError::Status {
                status: status.as_u16(),
            })
        }
    }
}
