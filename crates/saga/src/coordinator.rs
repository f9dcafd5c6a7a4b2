//! Reversal of an already-succeeded local step.

use std::sync::Arc;

use ledger::{StepEntry, StepRecord, StepState};
use protocol::{EventEnvelope, EventKind};
use transport::Publisher;

use crate::disposition::{Disposition, IgnoreReason};
use crate::error::{Result, SagaError};
use crate::step::StepDefinition;

/// Publishes `envelope`, mapping an unconfirmed publish onto
/// [`SagaError::PublishFailure`].
pub(crate) async fn publish_event<P: Publisher + ?Sized>(
    publisher: &P,
    envelope: &EventEnvelope,
) -> Result<()> {
    publisher
        .publish(envelope)
        .await
        .map_err(|source| SagaError::PublishFailure {
            kind: envelope.kind(),
            correlation_id: envelope.correlation_id().clone(),
            source,
        })
}

/// Decides what a downstream failure means for the local step and runs the
/// reversal when there is something to reverse.
///
/// A reversal is issued at most once per correlation id: the record goes to
/// `Compensating` before the reversal runs and to `Compensated` only after
/// the compensated event is confirmed. A failure in between leaves it in
/// `Compensating`, from where a redelivery or the sweeper resumes it.
pub struct CompensationCoordinator<P> {
    step: Arc<dyn StepDefinition>,
    publisher: Arc<P>,
}

impl<P: Publisher> CompensationCoordinator<P> {
    pub fn new(step: Arc<dyn StepDefinition>, publisher: Arc<P>) -> Self {
        Self { step, publisher }
    }

    pub async fn on_downstream_failure(
        &self,
        entry: &mut StepEntry,
        cause: EventKind,
    ) -> Result<Disposition> {
        match entry.state() {
            StepState::Idle | StepState::AwaitingUpstream | StepState::Processing => {
                entry.get_or_create().defer_compensation(cause);
                tracing::info!(%cause, "compensation deferred until the step resolves");
                Ok(Disposition::Deferred)
            }
            StepState::Succeeded | StepState::Compensating => self.compensate(entry, cause).await,
            StepState::Failed => {
                entry.get_or_create().mark_processed(cause);
                Ok(Disposition::Ignored(IgnoreReason::NothingToUndo))
            }
            state @ StepState::Compensated => {
                entry.get_or_create().mark_processed(cause);
                Ok(Disposition::Ignored(IgnoreReason::AlreadyResolved { state }))
            }
        }
    }

    /// Picks up a record left in `Compensating`.
    pub async fn resume(&self, entry: &mut StepEntry) -> Result<Disposition> {
        let cause = entry
            .record()
            .filter(|r| r.state() == StepState::Compensating)
            .and_then(StepRecord::pending_compensation);
        match cause {
            Some(cause) => self.compensate(entry, cause).await,
            None => Ok(Disposition::Ignored(IgnoreReason::AlreadyResolved {
                state: entry.state(),
            })),
        }
    }

    /// Reverses a `Succeeded` step, or finishes one already `Compensating`.
    #[tracing::instrument(skip(self, entry), fields(service = self.step.name(), correlation_id = %entry.correlation_id()))]
    pub async fn compensate(&self, entry: &mut StepEntry, cause: EventKind) -> Result<Disposition> {
        let correlation_id = entry.correlation_id().clone();
        let record = entry.get_or_create();

        if record.state() == StepState::Succeeded {
            record.defer_compensation(cause);
            record.transition(StepState::Compensating)?;
            metrics::counter!("saga_compensations_total", "service" => self.step.name())
                .increment(1);
            tracing::info!(%cause, "compensation started");
        } else {
            tracing::info!(%cause, "resuming compensation");
        }
        let first_cause = record.pending_compensation().unwrap_or(cause);

        if let Err(e) = self.step.compensate(record).await {
            tracing::error!(error = %e, "reversal failed");
            return Err(SagaError::CompensationFailed {
                correlation_id,
                reason: e.to_string(),
            });
        }

        let emitted = match self.step.compensated_kind() {
            Some(kind) => {
                let event =
                    EventEnvelope::new(correlation_id, kind, self.step.outbound_payload(record))?
                        .with_source(self.step.name())
                        .with_reason(format!("compensating {first_cause}"));
                publish_event(self.publisher.as_ref(), &event).await?;
                Some(kind)
            }
            None => None,
        };

        record.take_pending_compensation();
        record.transition(StepState::Compensated)?;
        record.mark_processed(first_cause);
        record.mark_processed(cause);
        tracing::info!(?emitted, "compensation completed");
        Ok(Disposition::Compensated { emitted })
    }
}
