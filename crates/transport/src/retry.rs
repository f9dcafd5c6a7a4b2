use std::time::Duration;

use async_trait::async_trait;
use protocol::EventEnvelope;
use rand::Rng;
use tokio::time::sleep;

use crate::{PublishError, Publisher, Result};

/// Jittered exponential backoff with an attempt ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64, jitter_pct: f64) -> Self {
        let base_delay_ms = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, 1, 1, 0.0)
    }

    /// Delay to wait after the `attempt`-th failure (0-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(attempt.min(32) as u32);
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        let delay = if self.jitter_pct > 0.0 {
            let spread = (delay as f64 * self.jitter_pct) as i64;
            let delta = rand::thread_rng().gen_range(-spread..=spread);
            delay.saturating_add_signed(delta)
        } else {
            delay
        };
        Duration::from_millis(delay)
    }

    /// Runs `op` until it succeeds, `retryable` rejects its error, or the
    /// attempt ceiling is reached. Returns the final error with the number
    /// of attempts made.
    pub async fn retry_async<F, Fut, T, E>(
        &self,
        mut op: F,
        retryable: impl Fn(&E) -> bool,
    ) -> std::result::Result<T, (usize, E)>
    where
        F: FnMut(usize) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !retryable(&err) {
                        return Err((attempt, err));
                    }
                    sleep(self.delay_for(attempt - 1)).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, 100, 2_000, 0.2)
    }
}

/// Wraps a publisher with bounded retry of transient failures.
///
/// Permanent failures are returned as-is; transient failures that outlast
/// the ceiling come back as [`PublishError::Exhausted`].
#[derive(Debug, Clone)]
pub struct RetryingPublisher<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: Publisher> RetryingPublisher<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<P: Publisher> Publisher for RetryingPublisher<P> {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<()> {
        let result = self
            .policy
            .retry_async(
                |attempt| async move {
                    if attempt > 0 {
                        metrics::counter!("saga_publish_retries_total", "topic" => envelope.topic().as_str())
                            .increment(1);
                        tracing::debug!(attempt, kind = %envelope.kind(), "retrying publish");
                    }
                    self.inner.publish(envelope).await
                },
                PublishError::is_transient,
            )
            .await;

        match result {
            Ok(()) => {
                metrics::counter!("saga_events_published_total", "kind" => envelope.kind().as_str())
                    .increment(1);
                Ok(())
            }
            Err((attempts, err)) if err.is_transient() => {
                tracing::error!(
                    attempts,
                    error = %err,
                    kind = %envelope.kind(),
                    correlation_id = %envelope.correlation_id(),
                    "publish retries exhausted"
                );
                Err(PublishError::Exhausted {
                    attempts,
                    last: Box::new(err),
                })
            }
            Err((_, err)) => {
                tracing::error!(error = %err, kind = %envelope.kind(), "publish failed permanently");
                Err(err)
            }
        }
    }
}
