//! Integration tests for the choreographed saga.

use std::sync::Arc;
use std::time::Duration;

use ledger::{FailureCause, InMemoryStepStore, StepState, StepStore};
use protocol::{
    CorrelationId, EventEnvelope, EventKind, OrderPayload, Payload, PaymentPayload,
    ShippingPayload,
};
use saga::steps::DEFAULT_ORDER;
use saga::{
    AlwaysReject, Disposition, IgnoreReason, InMemoryOrderService, InMemoryPaymentService,
    InMemoryShippingService, OrderStep, Participant, ParticipantSettings, PaymentStep, SagaError,
    ShippingStep, Sweeper,
};
use transport::{InMemoryBroker, PublishError, RetryPolicy, RetryingPublisher};

type TestParticipant = Participant<InMemoryStepStore, InMemoryBroker>;

fn settings() -> ParticipantSettings {
    ParticipantSettings {
        step_retry: RetryPolicy::new(3, 1, 1, 0.0),
        step_timeout: Duration::from_secs(60),
    }
}

struct TestHarness {
    broker: InMemoryBroker,
    order: Arc<TestParticipant>,
    payment: Arc<TestParticipant>,
    shipping: Arc<TestParticipant>,
    orders: InMemoryOrderService,
    payments: InMemoryPaymentService,
    shipments: InMemoryShippingService,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_services(
            InMemoryPaymentService::new(),
            InMemoryShippingService::new(),
            settings(),
        )
    }

    fn with_services(
        payments: InMemoryPaymentService,
        shipments: InMemoryShippingService,
        settings: ParticipantSettings,
    ) -> Self {
        let broker = InMemoryBroker::new();
        let orders = InMemoryOrderService::new();

        let order = Participant::new(
            OrderStep::new(orders.clone()),
            InMemoryStepStore::new(),
            broker.clone(),
            settings.clone(),
        );
        let payment = Participant::new(
            PaymentStep::new(payments.clone()),
            InMemoryStepStore::new(),
            broker.clone(),
            settings.clone(),
        );
        let shipping = Participant::new(
            ShippingStep::new(shipments.clone()),
            InMemoryStepStore::new(),
            broker.clone(),
            settings,
        );

        Self {
            broker,
            order: Arc::new(order),
            payment: Arc::new(payment),
            shipping: Arc::new(shipping),
            orders,
            payments,
            shipments,
        }
    }

    async fn start(&self) -> CorrelationId {
        let cid = CorrelationId::generate();
        self.order
            .initiate(cid.clone(), DEFAULT_ORDER.into())
            .await
            .unwrap();
        cid
    }

    /// Delivers every published message to its subscribers until the
    /// broker is quiet.
    async fn pump(&self) {
        loop {
            let batch = self.broker.drain_undelivered();
            if batch.is_empty() {
                return;
            }
            for envelope in batch {
                for participant in [&self.order, &self.payment, &self.shipping] {
                    if participant
                        .step()
                        .subscriptions()
                        .contains(&envelope.topic())
                    {
                        participant.handle(&envelope).await.unwrap();
                    }
                }
            }
        }
    }
}

async fn state(participant: &TestParticipant, cid: &CorrelationId) -> StepState {
    participant
        .store()
        .get(cid)
        .await
        .map(|r| r.state())
        .unwrap_or(StepState::Idle)
}

fn event(cid: &CorrelationId, kind: EventKind) -> EventEnvelope {
    let payload: Payload = match kind.topic() {
        protocol::Topic::OrderUpdates => OrderPayload {
            order_id: 1,
            product_id: 2,
        }
        .into(),
        protocol::Topic::PaymentUpdates => PaymentPayload {
            billing_id: 1,
            amount: 22.0,
        }
        .into(),
        protocol::Topic::ShippingUpdates => ShippingPayload {
            address: "acme address".into(),
        }
        .into(),
    };
    EventEnvelope::new(cid.clone(), kind, payload).unwrap()
}

#[tokio::test]
async fn test_happy_path_completes_every_step() {
    let h = TestHarness::new();
    let cid = h.start().await;

    h.pump().await;

    assert_eq!(state(&h.order, &cid).await, StepState::Succeeded);
    assert_eq!(state(&h.payment, &cid).await, StepState::Succeeded);
    assert_eq!(state(&h.shipping, &cid).await, StepState::Succeeded);
    assert_eq!(
        h.broker.published_kinds(),
        vec![
            EventKind::OrderCreated,
            EventKind::PaymentSucceeded,
            EventKind::ShippingSucceeded,
            EventKind::OrderCompleted,
        ]
    );
    assert_eq!(h.payments.charge_count(), 1);
    assert_eq!(h.shipments.created_count(), 1);
    assert_eq!(h.orders.confirmed_count(), 1);
    assert_eq!(h.payments.refund_count(), 0);

    let published = h.broker.published();
    assert!(published.iter().all(|e| e.correlation_id() == &cid));
    assert_eq!(published[1].source(), Some("payment-service"));
}

#[tokio::test]
async fn test_payment_declined_cancels_order_without_compensation() {
    let h = TestHarness::with_services(
        InMemoryPaymentService::with_strategy(AlwaysReject),
        InMemoryShippingService::new(),
        settings(),
    );
    let cid = h.start().await;

    h.pump().await;

    assert_eq!(
        h.broker.published_kinds(),
        vec![
            EventKind::OrderCreated,
            EventKind::PaymentFailed,
            EventKind::OrderCancelled,
        ]
    );
    assert_eq!(state(&h.order, &cid).await, StepState::Failed);
    assert_eq!(state(&h.payment, &cid).await, StepState::Failed);
    assert_eq!(state(&h.shipping, &cid).await, StepState::Failed);
    assert_eq!(h.shipments.created_count(), 0);
    assert_eq!(h.payments.refund_count(), 0);

    let shipping = h.shipping.store().get(&cid).await.unwrap();
    assert_eq!(shipping.failure().unwrap().cause, FailureCause::Upstream);
    let payment = h.payment.store().get(&cid).await.unwrap();
    assert_eq!(payment.failure().unwrap().cause, FailureCause::Business);
}

#[tokio::test]
async fn test_shipping_failure_compensates_payment_exactly_once() {
    let h = TestHarness::with_services(
        InMemoryPaymentService::new(),
        InMemoryShippingService::with_strategy(AlwaysReject),
        settings(),
    );
    let cid = h.start().await;

    h.pump().await;

    // Payment hears both ShippingFailed and OrderCancelled.
    assert_eq!(h.broker.count(EventKind::PaymentCompensated), 1);
    assert_eq!(h.broker.count(EventKind::OrderCancelled), 1);
    assert_eq!(h.broker.count(EventKind::ShippingCompensated), 0);
    assert_eq!(h.payments.refund_count(), 1);
    assert_eq!(h.payments.payment_count(), 0);

    assert_eq!(state(&h.order, &cid).await, StepState::Failed);
    assert_eq!(state(&h.payment, &cid).await, StepState::Compensated);
    assert_eq!(state(&h.shipping, &cid).await, StepState::Failed);

    let payment = h.payment.store().get(&cid).await.unwrap();
    assert!(payment.has_processed(EventKind::ShippingFailed));
    assert!(payment.has_processed(EventKind::OrderCancelled));
}

#[tokio::test]
async fn test_repeated_payment_failure_cancels_order_once() {
    let h = TestHarness::new();
    let cid = h.start().await;
    let failed = event(&cid, EventKind::PaymentFailed);

    let first = h.order.handle(&failed).await.unwrap();
    let second = h.order.handle(&failed).await.unwrap();

    assert_eq!(
        first,
        Disposition::Advanced {
            state: StepState::Failed,
            emitted: vec![EventKind::OrderCancelled],
        }
    );
    assert_eq!(second, Disposition::Ignored(IgnoreReason::Duplicate));
    assert_eq!(h.broker.count(EventKind::OrderCancelled), 1);
    assert_eq!(state(&h.order, &cid).await, StepState::Failed);
}

#[tokio::test]
async fn test_conflicting_shipping_outcomes_at_order() {
    let h = TestHarness::new();

    let cid = h.start().await;
    let first = h
        .order
        .handle(&event(&cid, EventKind::ShippingSucceeded))
        .await
        .unwrap();
    let second = h
        .order
        .handle(&event(&cid, EventKind::ShippingFailed))
        .await
        .unwrap();
    assert!(matches!(first, Disposition::Advanced { state: StepState::Succeeded, .. }));
    assert_eq!(
        second,
        Disposition::Ignored(IgnoreReason::Superseded {
            by: EventKind::ShippingSucceeded
        })
    );

    let cid = h.start().await;
    let first = h
        .order
        .handle(&event(&cid, EventKind::ShippingFailed))
        .await
        .unwrap();
    let second = h
        .order
        .handle(&event(&cid, EventKind::ShippingSucceeded))
        .await
        .unwrap();
    assert!(matches!(first, Disposition::Advanced { state: StepState::Failed, .. }));
    assert_eq!(
        second,
        Disposition::Ignored(IgnoreReason::Superseded {
            by: EventKind::ShippingFailed
        })
    );

    assert_eq!(h.broker.count(EventKind::OrderCompleted), 1);
    assert_eq!(h.broker.count(EventKind::OrderCancelled), 1);
}

#[tokio::test]
async fn test_conflicting_shipping_outcomes_at_payment() {
    let h = TestHarness::new();

    let cid = CorrelationId::generate();
    h.payment.handle(&event(&cid, EventKind::OrderCreated)).await.unwrap();
    h.payment
        .handle(&event(&cid, EventKind::ShippingSucceeded))
        .await
        .unwrap();
    let late_failure = h
        .payment
        .handle(&event(&cid, EventKind::ShippingFailed))
        .await
        .unwrap();
    assert!(matches!(late_failure, Disposition::Ignored(IgnoreReason::Superseded { .. })));
    assert_eq!(state(&h.payment, &cid).await, StepState::Succeeded);
    assert_eq!(h.payments.refund_count(), 0);

    let cid = CorrelationId::generate();
    h.payment.handle(&event(&cid, EventKind::OrderCreated)).await.unwrap();
    h.payment
        .handle(&event(&cid, EventKind::ShippingFailed))
        .await
        .unwrap();
    let late_success = h
        .payment
        .handle(&event(&cid, EventKind::ShippingSucceeded))
        .await
        .unwrap();
    assert!(matches!(late_success, Disposition::Ignored(IgnoreReason::Superseded { .. })));
    assert_eq!(state(&h.payment, &cid).await, StepState::Compensated);
    assert_eq!(h.payments.refund_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_publish_recovers_within_retry_ceiling() {
    let broker = InMemoryBroker::new();
    let payments = InMemoryPaymentService::new();
    let payment = Participant::new(
        PaymentStep::new(payments.clone()),
        InMemoryStepStore::new(),
        RetryingPublisher::new(broker.clone(), RetryPolicy::new(5, 10, 100, 0.0)),
        settings(),
    );
    let cid = CorrelationId::generate();
    broker.fail_next(3);

    let disposition = payment
        .handle(&event(&cid, EventKind::OrderCreated))
        .await
        .unwrap();

    assert_eq!(disposition.emitted(), vec![EventKind::PaymentSucceeded]);
    assert_eq!(broker.attempts(), 4);
    assert_eq!(broker.published().len(), 1);
    assert_eq!(payments.charge_count(), 1);
    let record = payment.store().get(&cid).await.unwrap();
    assert_eq!(record.state(), StepState::Succeeded);
    assert_eq!(record.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_publish_rolls_back_transition() {
    let broker = InMemoryBroker::new();
    let payments = InMemoryPaymentService::new();
    let payment = Participant::new(
        PaymentStep::new(payments.clone()),
        InMemoryStepStore::new(),
        RetryingPublisher::new(broker.clone(), RetryPolicy::new(3, 10, 100, 0.0)),
        settings(),
    );
    let cid = CorrelationId::generate();
    let trigger = event(&cid, EventKind::OrderCreated);
    broker.fail_next(10);

    let err = payment.handle(&trigger).await.unwrap_err();

    assert!(matches!(
        err,
        SagaError::PublishFailure {
            kind: EventKind::PaymentSucceeded,
            source: PublishError::Exhausted { attempts: 3, .. },
            ..
        }
    ));
    assert!(payment.store().get(&cid).await.is_none());
    assert_eq!(payments.payment_count(), 0);

    // The broker redelivers once it is healthy again.
    broker.clear();
    let disposition = payment.handle(&trigger).await.unwrap();
    assert!(matches!(disposition, Disposition::Advanced { state: StepState::Succeeded, .. }));
    assert_eq!(payments.payment_count(), 1);
    assert_eq!(broker.count(EventKind::PaymentSucceeded), 1);
}

#[tokio::test]
async fn test_redelivered_trigger_has_one_side_effect() {
    let h = TestHarness::new();
    let cid = CorrelationId::generate();
    let trigger = event(&cid, EventKind::OrderCreated);

    let first = h.payment.handle(&trigger).await.unwrap();
    let after_first = h.payment.store().get(&cid).await.unwrap();
    for _ in 0..4 {
        let again = h.payment.handle(&trigger).await.unwrap();
        assert_eq!(again, Disposition::Ignored(IgnoreReason::Duplicate));
    }

    assert!(matches!(first, Disposition::Advanced { .. }));
    assert_eq!(h.payment.store().get(&cid).await.unwrap(), after_first);
    assert_eq!(h.payments.charge_count(), 1);
    assert_eq!(h.broker.count(EventKind::PaymentSucceeded), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deliveries_run_the_step_once() {
    let h = TestHarness::new();
    let cid = CorrelationId::generate();
    let trigger = event(&cid, EventKind::OrderCreated);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let payment = h.payment.clone();
            let trigger = trigger.clone();
            tokio::spawn(async move { payment.handle(&trigger).await.unwrap() })
        })
        .collect();

    let mut advanced = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Disposition::Advanced { .. } => advanced += 1,
            other => assert_eq!(other, Disposition::Ignored(IgnoreReason::Duplicate)),
        }
    }

    assert_eq!(advanced, 1);
    assert_eq!(h.payments.charge_count(), 1);
    assert_eq!(h.broker.count(EventKind::PaymentSucceeded), 1);
}

#[tokio::test]
async fn test_stuck_order_times_out_and_saga_converges() {
    let h = TestHarness::with_services(
        InMemoryPaymentService::new(),
        InMemoryShippingService::new(),
        ParticipantSettings {
            step_timeout: Duration::ZERO,
            ..settings()
        },
    );
    let cid = h.start().await;

    let report = Sweeper::new(h.order.clone(), Duration::from_secs(1))
        .sweep_once()
        .await;
    assert_eq!(report.timed_out, 1);
    let order = h.order.store().get(&cid).await.unwrap();
    assert_eq!(order.state(), StepState::Failed);
    assert_eq!(order.failure().unwrap().cause, FailureCause::Timeout);
    assert_eq!(h.broker.count(EventKind::OrderCancelled), 1);

    // Payment and shipping still see the late OrderCreated and undo their work.
    h.pump().await;

    assert_eq!(state(&h.order, &cid).await, StepState::Failed);
    assert_eq!(state(&h.payment, &cid).await, StepState::Compensated);
    assert_eq!(state(&h.shipping, &cid).await, StepState::Compensated);
    assert_eq!(h.broker.count(EventKind::PaymentCompensated), 1);
    assert_eq!(h.broker.count(EventKind::ShippingCompensated), 1);
    assert_eq!(h.broker.count(EventKind::OrderCompleted), 0);
    assert_eq!(h.payments.payment_count(), 0);
    assert_eq!(h.shipments.shipment_count(), 0);
}

#[tokio::test]
async fn test_unpublished_cancellation_is_rolled_back() {
    let h = TestHarness::new();
    let cid = h.start().await;
    h.broker.drain_undelivered();
    let declined = event(&cid, EventKind::PaymentFailed);

    h.broker.fail_next(1);
    let err = h.order.handle(&declined).await.unwrap_err();
    assert!(matches!(
        err,
        SagaError::PublishFailure {
            kind: EventKind::OrderCancelled,
            ..
        }
    ));

    let order = h.order.store().get(&cid).await.unwrap();
    assert_eq!(order.state(), StepState::AwaitingUpstream);
    assert!(!order.has_processed(EventKind::PaymentFailed));
    assert!(order.failure().is_none());
    assert_eq!(h.broker.count(EventKind::OrderCancelled), 0);

    let redelivered = h.order.handle(&declined).await.unwrap();
    assert_eq!(
        redelivered,
        Disposition::Advanced {
            state: StepState::Failed,
            emitted: vec![EventKind::OrderCancelled],
        }
    );
    assert_eq!(h.broker.count(EventKind::OrderCancelled), 1);
}

#[tokio::test]
async fn test_unpublished_timeout_is_retried_by_next_sweep() {
    let h = TestHarness::with_services(
        InMemoryPaymentService::new(),
        InMemoryShippingService::new(),
        ParticipantSettings {
            step_timeout: Duration::ZERO,
            ..settings()
        },
    );
    let cid = CorrelationId::generate();
    let early = h
        .payment
        .handle(&event(&cid, EventKind::ShippingFailed))
        .await
        .unwrap();
    assert_eq!(early, Disposition::Deferred);
    let sweeper = Sweeper::new(h.payment.clone(), Duration::from_secs(1));

    h.broker.fail_next(1);
    let first = sweeper.sweep_once().await;
    assert_eq!(first.failed, 1);
    assert_eq!(first.timed_out, 0);
    let record = h.payment.store().get(&cid).await.unwrap();
    assert_eq!(record.state(), StepState::AwaitingUpstream);
    assert_eq!(record.pending_compensation(), Some(EventKind::ShippingFailed));
    assert!(!record.has_processed(EventKind::ShippingFailed));
    assert_eq!(h.broker.count(EventKind::PaymentFailed), 0);

    let second = sweeper.sweep_once().await;
    assert_eq!(second.timed_out, 1);
    assert_eq!(second.failed, 0);
    let record = h.payment.store().get(&cid).await.unwrap();
    assert_eq!(record.state(), StepState::Failed);
    assert_eq!(record.failure().unwrap().cause, FailureCause::Timeout);
    assert_eq!(record.pending_compensation(), None);
    assert!(record.has_processed(EventKind::ShippingFailed));
    assert_eq!(h.broker.count(EventKind::PaymentFailed), 1);
    assert_eq!(h.payments.refund_count(), 0);
}

#[tokio::test]
async fn test_failure_before_trigger_is_compensated_after_success() {
    let h = TestHarness::new();
    let cid = CorrelationId::generate();

    let early = h
        .payment
        .handle(&event(&cid, EventKind::ShippingFailed))
        .await
        .unwrap();
    assert_eq!(early, Disposition::Deferred);
    assert_eq!(state(&h.payment, &cid).await, StepState::AwaitingUpstream);

    let trigger = h
        .payment
        .handle(&event(&cid, EventKind::OrderCreated))
        .await
        .unwrap();

    assert_eq!(
        trigger,
        Disposition::Advanced {
            state: StepState::Compensated,
            emitted: vec![EventKind::PaymentSucceeded, EventKind::PaymentCompensated],
        }
    );
    assert_eq!(h.payments.refund_count(), 1);

    let record = h.payment.store().get(&cid).await.unwrap();
    assert!(record.has_processed(EventKind::ShippingFailed));
    assert_eq!(record.pending_compensation(), None);
}

#[tokio::test]
async fn test_failure_before_failed_trigger_has_nothing_to_undo() {
    let h = TestHarness::with_services(
        InMemoryPaymentService::with_strategy(AlwaysReject),
        InMemoryShippingService::new(),
        settings(),
    );
    let cid = CorrelationId::generate();
    let cancelled = event(&cid, EventKind::OrderCancelled);

    assert_eq!(h.payment.handle(&cancelled).await.unwrap(), Disposition::Deferred);
    let trigger = h
        .payment
        .handle(&event(&cid, EventKind::OrderCreated))
        .await
        .unwrap();
    assert_eq!(
        trigger,
        Disposition::Advanced {
            state: StepState::Failed,
            emitted: vec![EventKind::PaymentFailed],
        }
    );
    assert_eq!(
        h.payment.handle(&cancelled).await.unwrap(),
        Disposition::Ignored(IgnoreReason::Duplicate)
    );
    assert_eq!(h.broker.count(EventKind::PaymentCompensated), 0);
}

#[tokio::test]
async fn test_success_notifications_do_not_compensate() {
    let h = TestHarness::new();
    let cid = CorrelationId::generate();

    h.payment.handle(&event(&cid, EventKind::OrderCreated)).await.unwrap();
    for kind in [EventKind::ShippingSucceeded, EventKind::OrderCompleted] {
        let disposition = h.payment.handle(&event(&cid, kind)).await.unwrap();
        assert_eq!(disposition, Disposition::Observed);
    }

    assert_eq!(state(&h.payment, &cid).await, StepState::Succeeded);
    assert_eq!(h.payments.refund_count(), 0);
    assert_eq!(h.broker.count(EventKind::PaymentCompensated), 0);
}

#[tokio::test]
async fn test_unpublished_compensation_is_resumed_by_sweeper() {
    let h = TestHarness::new();
    let cid = CorrelationId::generate();
    h.payment.handle(&event(&cid, EventKind::OrderCreated)).await.unwrap();

    h.broker.fail_next(1);
    let err = h
        .payment
        .handle(&event(&cid, EventKind::ShippingFailed))
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::PublishFailure { .. }));
    assert_eq!(state(&h.payment, &cid).await, StepState::Compensating);

    let report = Sweeper::new(h.payment.clone(), Duration::from_secs(1))
        .sweep_once()
        .await;

    assert_eq!(report.resumed, 1);
    assert_eq!(state(&h.payment, &cid).await, StepState::Compensated);
    assert_eq!(h.broker.count(EventKind::PaymentCompensated), 1);
    assert_eq!(h.payments.refund_count(), 1);

    let redelivered = h
        .payment
        .handle(&event(&cid, EventKind::ShippingFailed))
        .await
        .unwrap();
    assert_eq!(redelivered, Disposition::Ignored(IgnoreReason::Duplicate));
}

#[tokio::test]
async fn test_initiation_is_refused_for_existing_saga() {
    let h = TestHarness::new();
    let cid = h.start().await;

    let err = h
        .order
        .initiate(cid.clone(), DEFAULT_ORDER.into())
        .await
        .unwrap_err();

    assert!(matches!(err, SagaError::AlreadyStarted(id) if id == cid));
    assert_eq!(h.broker.count(EventKind::OrderCreated), 1);
}

#[tokio::test]
async fn test_failed_initiation_leaves_no_record() {
    let h = TestHarness::new();
    let cid = CorrelationId::generate();
    h.broker.fail_next_with(PublishError::Status { status: 400 });

    let err = h
        .order
        .initiate(cid.clone(), DEFAULT_ORDER.into())
        .await
        .unwrap_err();

    assert!(matches!(err, SagaError::PublishFailure { .. }));
    assert!(h.order.store().get(&cid).await.is_none());
    h.order
        .initiate(cid.clone(), DEFAULT_ORDER.into())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_only_order_starts_sagas() {
    let h = TestHarness::new();
    let err = h
        .payment
        .initiate(CorrelationId::generate(), DEFAULT_ORDER.into())
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::NotInitiator("payment-service")));
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_stops_on_shutdown() {
    let h = TestHarness::new();
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = Sweeper::new(h.order.clone(), Duration::from_secs(30)).spawn(rx);

    tokio::time::sleep(Duration::from_secs(65)).await;
    tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}
