//! Background sweep for stuck records.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ledger::{StepState, StepStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use transport::Publisher;

use crate::participant::Participant;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub timed_out: usize,
    pub resumed: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Periodically fails records that made no progress within the step
/// timeout and finishes compensations left half done by a failed publish.
pub struct Sweeper<S, P> {
    participant: Arc<Participant<S, P>>,
    interval: Duration,
}

impl<S, P> Sweeper<S, P>
where
    S: StepStore + 'static,
    P: Publisher + 'static,
{
    pub fn new(participant: Arc<Participant<S, P>>, interval: Duration) -> Self {
        Self {
            participant,
            interval,
        }
    }

    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = Utc::now();
        let store = self.participant.store();

        for id in store
            .ids_in_states(&[StepState::AwaitingUpstream, StepState::Processing])
            .await
        {
            match self.participant.expire(&id, now).await {
                Ok(Some(_)) => report.timed_out += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(correlation_id = %id, error = %e, "timeout handling failed");
                    report.failed += 1;
                }
            }
        }

        for id in store.ids_in_states(&[StepState::Compensating]).await {
            match self.participant.resume_compensation(&id).await {
                Ok(Some(_)) => report.resumed += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(correlation_id = %id, error = %e, "compensation still failing");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Runs sweeps every interval until `shutdown` flips to true or its
    /// sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                service = self.participant.name(),
                interval_secs = self.interval.as_secs(),
                "sweeper started"
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.sweep_once().await;
                        if !report.is_empty() {
                            tracing::info!(?report, "sweep finished");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!(service = self.participant.name(), "sweeper stopped");
        })
    }
}
