//! The per-participant saga step state machine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ledger::{FailureCause, StepEntry, StepRecord, StepState, StepStore};
use protocol::{CorrelationId, EventEnvelope, EventKind, Payload};
use transport::{Publisher, RetryPolicy, SubscriptionConfig};

use crate::coordinator::{CompensationCoordinator, publish_event};
use crate::disposition::{Disposition, IgnoreReason};
use crate::error::{Result, SagaError};
use crate::step::{Reaction, StepDefinition, StepOutcome};

/// Tunables for one participant.
#[derive(Debug, Clone)]
pub struct ParticipantSettings {
    /// Local retry of retryable business failures.
    pub step_retry: RetryPolicy,
    /// How long a record may sit in `AwaitingUpstream` or `Processing`.
    pub step_timeout: Duration,
}

impl Default for ParticipantSettings {
    fn default() -> Self {
        Self {
            step_retry: RetryPolicy::new(3, 50, 1_000, 0.2),
            step_timeout: Duration::from_secs(300),
        }
    }
}

/// One saga participant: reacts to inbound events for its step, keeps its
/// local record per correlation id, and publishes its own outcome.
///
/// Every event for a correlation id is handled while holding that id's
/// [`StepEntry`], so the ledger check, the transition and the publish
/// happen as one unit. An outcome that cannot be published is rolled back
/// to the state before the event arrived.
pub struct Participant<S, P> {
    step: Arc<dyn StepDefinition>,
    store: S,
    publisher: Arc<P>,
    coordinator: CompensationCoordinator<P>,
    settings: ParticipantSettings,
}

impl<S, P> Participant<S, P>
where
    S: StepStore,
    P: Publisher,
{
    pub fn new(
        step: impl StepDefinition + 'static,
        store: S,
        publisher: P,
        settings: ParticipantSettings,
    ) -> Self {
        let step: Arc<dyn StepDefinition> = Arc::new(step);
        let publisher = Arc::new(publisher);
        let coordinator = CompensationCoordinator::new(step.clone(), publisher.clone());
        Self {
            step,
            store,
            publisher,
            coordinator,
            settings,
        }
    }

    pub fn name(&self) -> &'static str {
        self.step.name()
    }

    pub fn step(&self) -> &dyn StepDefinition {
        self.step.as_ref()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn settings(&self) -> &ParticipantSettings {
        &self.settings
    }

    /// The document the broker reads to learn where to deliver events.
    pub fn subscription_config(&self) -> SubscriptionConfig {
        SubscriptionConfig::for_topics(self.step.name(), self.step.subscriptions())
    }

    /// Starts a new saga instance and announces it.
    ///
    /// The record is created in `AwaitingUpstream` with the initiating kind
    /// in its ledger. If the announcement is not confirmed the record is
    /// removed again.
    #[tracing::instrument(skip(self, payload), fields(service = self.step.name()))]
    pub async fn initiate(
        &self,
        correlation_id: CorrelationId,
        payload: Payload,
    ) -> Result<EventEnvelope> {
        let kind = self
            .step
            .initiating_kind()
            .ok_or(SagaError::NotInitiator(self.step.name()))?;
        let event = self.envelope(&correlation_id, kind, payload.clone())?;

        let mut entry = self.store.entry(&correlation_id).await;
        if entry.record().is_some() {
            return Err(SagaError::AlreadyStarted(correlation_id));
        }
        let snapshot = entry.snapshot();
        let record = entry.get_or_create();
        record.set_payload(payload);
        record.mark_processed(kind);

        if let Err(e) = publish_event(self.publisher.as_ref(), &event).await {
            entry.restore(snapshot);
            return Err(e);
        }
        tracing::info!(%correlation_id, "saga started");
        Ok(event)
    }

    /// Handles one delivered event.
    #[tracing::instrument(
        skip(self, envelope),
        fields(service = self.step.name(), kind = %envelope.kind(), correlation_id = %envelope.correlation_id())
    )]
    pub async fn handle(&self, envelope: &EventEnvelope) -> Result<Disposition> {
        let kind = envelope.kind();
        metrics::counter!(
            "saga_events_received_total",
            "service" => self.step.name(),
            "kind" => kind.as_str()
        )
        .increment(1);

        let reaction = self.step.reaction(kind);
        if reaction == Reaction::Irrelevant {
            tracing::debug!("event not subscribed to");
            return Ok(Disposition::Ignored(IgnoreReason::NotSubscribed));
        }

        let started = Instant::now();
        let mut entry = self.store.entry(envelope.correlation_id()).await;

        if entry.has_processed(kind) {
            tracing::debug!("duplicate delivery");
            return Ok(Disposition::Ignored(IgnoreReason::Duplicate));
        }
        if let Some(by) = honored_sibling(&entry, kind) {
            tracing::info!(%by, "outcome already decided by sibling event");
            return Ok(Disposition::Ignored(IgnoreReason::Superseded { by }));
        }

        let result = match reaction {
            Reaction::Trigger => self.run_step(&mut entry, envelope).await,
            Reaction::UpstreamFailure => self.fail_upstream(&mut entry, kind).await,
            Reaction::DownstreamFailure => {
                self.coordinator
                    .on_downstream_failure(&mut entry, kind)
                    .await
            }
            Reaction::Observe => {
                entry.get_or_create().mark_processed(kind);
                Ok(Disposition::Observed)
            }
            Reaction::Irrelevant => Ok(Disposition::Ignored(IgnoreReason::NotSubscribed)),
        };

        metrics::histogram!("saga_step_duration_seconds", "service" => self.step.name())
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(disposition) => tracing::info!(?disposition, state = %entry.state(), "event handled"),
            Err(e) => tracing::warn!(error = %e, state = %entry.state(), "event handling failed"),
        }
        result
    }

    /// Fails a record that made no progress within the step timeout.
    ///
    /// Returns `None` if the record is missing, already resolved, or not
    /// stale yet.
    pub async fn expire(
        &self,
        correlation_id: &CorrelationId,
        now: DateTime<Utc>,
    ) -> Result<Option<Disposition>> {
        let mut entry = self.store.entry(correlation_id).await;
        let stale = entry
            .record()
            .is_some_and(|r| r.is_stale(now, self.settings.step_timeout));
        if !stale {
            return Ok(None);
        }

        metrics::counter!("saga_timeouts_total", "service" => self.step.name()).increment(1);
        tracing::warn!(
            %correlation_id,
            state = %entry.state(),
            timeout_secs = self.settings.step_timeout.as_secs(),
            "step timed out"
        );
        let snapshot = entry.snapshot();
        let reason = format!(
            "no progress within {}s",
            self.settings.step_timeout.as_secs()
        );
        self.fail(&mut entry, snapshot, FailureCause::Timeout, reason, true)
            .await
            .map(Some)
    }

    /// Finishes a compensation that an earlier attempt left half done.
    pub async fn resume_compensation(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Option<Disposition>> {
        let mut entry = self.store.entry(correlation_id).await;
        if entry.state() != StepState::Compensating {
            return Ok(None);
        }
        self.coordinator.resume(&mut entry).await.map(Some)
    }

    async fn run_step(
        &self,
        entry: &mut StepEntry,
        trigger: &EventEnvelope,
    ) -> Result<Disposition> {
        let state = entry.state();
        if !state.can_process() {
            return Ok(Disposition::Ignored(IgnoreReason::AlreadyResolved { state }));
        }

        let correlation_id = trigger.correlation_id().clone();
        let snapshot = entry.snapshot();
        let record = entry.get_or_create();
        record.transition(StepState::Processing)?;
        record.mark_processed(trigger.kind());

        let (resource_ref, payload) = match self.execute_with_retry(record, trigger).await {
            StepOutcome::Succeeded {
                resource_ref,
                payload,
            } => (resource_ref, payload),
            StepOutcome::PermanentFailure(reason) | StepOutcome::RetryableFailure(reason) => {
                return self
                    .fail(entry, snapshot, FailureCause::Business, reason, true)
                    .await;
            }
        };

        let event = self.envelope(&correlation_id, self.step.success_kind(), payload.clone())?;
        record.transition(StepState::Succeeded)?;
        record.set_resource_ref(resource_ref);
        record.set_payload(payload);

        if let Err(e) = publish_event(self.publisher.as_ref(), &event).await {
            if let Err(void) = self.step.compensate(record).await {
                tracing::error!(error = %void, "could not void unpublished step");
            }
            entry.restore(snapshot);
            return Err(e);
        }

        let mut emitted = vec![event.kind()];
        if let Some(cause) = record.pending_compensation() {
            tracing::info!(%cause, "applying deferred compensation");
            let compensated = self.coordinator.compensate(entry, cause).await?;
            emitted.extend(compensated.emitted());
        }
        Ok(Disposition::Advanced {
            state: entry.state(),
            emitted,
        })
    }

    async fn execute_with_retry(
        &self,
        record: &mut StepRecord,
        trigger: &EventEnvelope,
    ) -> StepOutcome {
        let policy = &self.settings.step_retry;
        let mut tries = 0;
        loop {
            tries += 1;
            let attempt = record.begin_attempt();
            match self.step.execute(record, trigger, attempt).await {
                StepOutcome::RetryableFailure(reason) if tries < policy.max_attempts => {
                    tracing::warn!(attempt, %reason, "step failed, retrying");
                    tokio::time::sleep(policy.delay_for(tries - 1)).await;
                }
                StepOutcome::RetryableFailure(reason) => {
                    return StepOutcome::PermanentFailure(format!(
                        "gave up after {tries} attempts: {reason}"
                    ));
                }
                outcome => return outcome,
            }
        }
    }

    async fn fail_upstream(&self, entry: &mut StepEntry, cause: EventKind) -> Result<Disposition> {
        let state = entry.state();
        if !state.is_unresolved() {
            return Ok(Disposition::Ignored(IgnoreReason::AlreadyResolved { state }));
        }
        let snapshot = entry.snapshot();
        entry.get_or_create().mark_processed(cause);
        let emit = self.step.emits_on_upstream_failure();
        self.fail(entry, snapshot, FailureCause::Upstream, format!("upstream {cause}"), emit)
            .await
    }

    /// Moves the record to `Failed` and, if `emit`, announces it. A deferred
    /// compensation has nothing to undo and is settled here.
    async fn fail(
        &self,
        entry: &mut StepEntry,
        snapshot: Option<StepRecord>,
        cause: FailureCause,
        reason: String,
        emit: bool,
    ) -> Result<Disposition> {
        let correlation_id = entry.correlation_id().clone();
        let record = entry.get_or_create();
        let event = if emit {
            let payload = self.step.outbound_payload(record);
            Some(
                self.envelope(&correlation_id, self.step.failure_kind(), payload)?
                    .with_reason(reason.clone()),
            )
        } else {
            None
        };

        record.transition(StepState::Failed)?;
        record.set_failure(cause, reason);
        if let Some(pending) = record.take_pending_compensation() {
            record.mark_processed(pending);
        }

        let mut emitted = Vec::new();
        if let Some(event) = event {
            if let Err(e) = publish_event(self.publisher.as_ref(), &event).await {
                entry.restore(snapshot);
                return Err(e);
            }
            emitted.push(event.kind());
        }
        Ok(Disposition::Advanced {
            state: StepState::Failed,
            emitted,
        })
    }

    fn envelope(
        &self,
        correlation_id: &CorrelationId,
        kind: EventKind,
        payload: Payload,
    ) -> Result<EventEnvelope> {
        Ok(EventEnvelope::new(correlation_id.clone(), kind, payload)?.with_source(self.step.name()))
    }
}

/// The sibling of `kind` that already decided this step's outcome, counting
/// a parked downstream failure as decided.
fn honored_sibling(entry: &StepEntry, kind: EventKind) -> Option<EventKind> {
    entry.superseded_by(kind).or_else(|| {
        entry
            .record()
            .and_then(StepRecord::pending_compensation)
            .filter(|pending| kind.siblings().contains(pending))
    })
}

#[cfg(test)]
mod tests {
    use ledger::InMemoryStepStore;
    use protocol::{OrderPayload, PaymentPayload};
    use transport::InMemoryBroker;

    use super::*;
    use crate::failure::{FailureDecision, ScriptedFailures};
    use crate::services::InMemoryPaymentService;
    use crate::steps::PaymentStep;

    fn participant(
        payments: InMemoryPaymentService,
        broker: &InMemoryBroker,
    ) -> Participant<InMemoryStepStore, InMemoryBroker> {
        Participant::new(
            PaymentStep::new(payments),
            InMemoryStepStore::new(),
            broker.clone(),
            ParticipantSettings {
                step_retry: RetryPolicy::new(3, 1, 1, 0.0),
                ..ParticipantSettings::default()
            },
        )
    }

    fn order_created(cid: &CorrelationId) -> EventEnvelope {
        EventEnvelope::new(
            cid.clone(),
            EventKind::OrderCreated,
            OrderPayload {
                order_id: 1,
                product_id: 2,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_unsubscribed_kind_creates_no_record() {
        let broker = InMemoryBroker::new();
        let p = participant(InMemoryPaymentService::new(), &broker);
        let cid = CorrelationId::generate();
        let own = EventEnvelope::new(
            cid.clone(),
            EventKind::PaymentSucceeded,
            PaymentPayload {
                billing_id: 1,
                amount: 22.0,
            },
        )
        .unwrap();

        let disposition = p.handle(&own).await.unwrap();

        assert_eq!(disposition, Disposition::Ignored(IgnoreReason::NotSubscribed));
        assert!(p.store().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_is_retried_locally() {
        let broker = InMemoryBroker::new();
        let payments = InMemoryPaymentService::with_strategy(ScriptedFailures::new([
            FailureDecision::Retryable,
            FailureDecision::Retryable,
        ]));
        let p = participant(payments.clone(), &broker);
        let cid = CorrelationId::generate();

        let disposition = p.handle(&order_created(&cid)).await.unwrap();

        assert_eq!(disposition.emitted(), vec![EventKind::PaymentSucceeded]);
        let record = p.store().get(&cid).await.unwrap();
        assert_eq!(record.attempt_count(), 3);
        assert_eq!(record.local_resource_ref(), Some("PAY-0001"));
        assert_eq!(payments.charge_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_becomes_permanent_at_ceiling() {
        let broker = InMemoryBroker::new();
        let payments = InMemoryPaymentService::with_strategy(ScriptedFailures::new(
            [FailureDecision::Retryable; 5],
        ));
        let p = participant(payments, &broker);
        let cid = CorrelationId::generate();

        let disposition = p.handle(&order_created(&cid)).await.unwrap();

        assert_eq!(
            disposition,
            Disposition::Advanced {
                state: StepState::Failed,
                emitted: vec![EventKind::PaymentFailed],
            }
        );
        let record = p.store().get(&cid).await.unwrap();
        assert_eq!(record.attempt_count(), 3);
        assert!(record.failure().unwrap().reason.contains("gave up after 3 attempts"));
        assert_eq!(broker.published()[0].reason(), record.failure().map(|f| f.reason.as_str()));
    }

    #[tokio::test]
    async fn test_expire_ignores_fresh_and_resolved_records() {
        let broker = InMemoryBroker::new();
        let p = participant(InMemoryPaymentService::new(), &broker);
        let cid = CorrelationId::generate();

        assert_eq!(p.expire(&cid, Utc::now()).await.unwrap(), None);

        p.handle(&order_created(&cid)).await.unwrap();
        let far_future = Utc::now() + chrono::Duration::days(1);
        assert_eq!(p.expire(&cid, far_future).await.unwrap(), None);
    }

    #[test]
    fn test_subscription_config() {
        let broker = InMemoryBroker::new();
        let p = participant(InMemoryPaymentService::new(), &broker);
        let config = p.subscription_config();
        assert_eq!(config.service_name, "payment-service");
        assert_eq!(
            config.topics().collect::<Vec<_>>(),
            vec![protocol::Topic::ShippingUpdates, protocol::Topic::OrderUpdates]
        );
    }
}
