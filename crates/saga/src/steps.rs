//! The three concrete saga steps.

use async_trait::async_trait;
use ledger::StepRecord;
use protocol::{
    EventEnvelope, EventKind, OrderPayload, Payload, PaymentPayload, ShippingPayload, Topic,
};

use crate::error::Result;
use crate::services::shipping::DEFAULT_ADDRESS;
use crate::services::{OrderService, PaymentService, ShippingService};
use crate::step::{Reaction, StepDefinition, StepOutcome};

pub const ORDER_SERVICE: &str = "order-service";
pub const PAYMENT_SERVICE: &str = "payment-service";
pub const SHIPPING_SERVICE: &str = "shipping-service";

/// Amount charged for every order.
pub const DEFAULT_AMOUNT: f64 = 22.0;

/// Order used when a saga is started without one.
pub const DEFAULT_ORDER: OrderPayload = OrderPayload {
    order_id: 1,
    product_id: 2,
};

/// Starts sagas and closes them once the goods have shipped.
pub struct OrderStep<O> {
    orders: O,
}

impl<O: OrderService> OrderStep<O> {
    pub fn new(orders: O) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl<O: OrderService> StepDefinition for OrderStep<O> {
    fn name(&self) -> &'static str {
        ORDER_SERVICE
    }

    fn topic(&self) -> Topic {
        Topic::OrderUpdates
    }

    fn subscriptions(&self) -> &'static [Topic] {
        &[Topic::ShippingUpdates, Topic::PaymentUpdates]
    }

    fn reaction(&self, kind: EventKind) -> Reaction {
        match kind {
            EventKind::ShippingSucceeded => Reaction::Trigger,
            EventKind::PaymentFailed | EventKind::ShippingFailed => Reaction::UpstreamFailure,
            EventKind::PaymentSucceeded
            | EventKind::PaymentCompensated
            | EventKind::ShippingCompensated => Reaction::Observe,
            _ => Reaction::Irrelevant,
        }
    }

    fn emits_on_upstream_failure(&self) -> bool {
        true
    }

    fn initiating_kind(&self) -> Option<EventKind> {
        Some(EventKind::OrderCreated)
    }

    fn default_payload(&self) -> Payload {
        DEFAULT_ORDER.into()
    }

    async fn execute(&self, record: &StepRecord, _: &EventEnvelope, _: u32) -> StepOutcome {
        let order = record
            .payload()
            .and_then(Payload::as_order)
            .copied()
            .unwrap_or(DEFAULT_ORDER);
        match self.orders.confirm(record.correlation_id(), &order).await {
            Ok(confirmation) => StepOutcome::Succeeded {
                resource_ref: confirmation.reference,
                payload: order.into(),
            },
            Err(e) => StepOutcome::from_error(e),
        }
    }

    async fn compensate(&self, record: &StepRecord) -> Result<()> {
        match record.local_resource_ref() {
            Some(reference) => self.orders.reopen(reference).await,
            None => Ok(()),
        }
    }
}

/// Charges the customer once an order is created; refunds on a later failure.
pub struct PaymentStep<P> {
    payments: P,
    amount: f64,
}

impl<P: PaymentService> PaymentStep<P> {
    pub fn new(payments: P) -> Self {
        Self::with_amount(payments, DEFAULT_AMOUNT)
    }

    pub fn with_amount(payments: P, amount: f64) -> Self {
        Self { payments, amount }
    }
}

#[async_trait]
impl<P: PaymentService> StepDefinition for PaymentStep<P> {
    fn name(&self) -> &'static str {
        PAYMENT_SERVICE
    }

    fn topic(&self) -> Topic {
        Topic::PaymentUpdates
    }

    fn subscriptions(&self) -> &'static [Topic] {
        &[Topic::ShippingUpdates, Topic::OrderUpdates]
    }

    fn reaction(&self, kind: EventKind) -> Reaction {
        match kind {
            EventKind::OrderCreated => Reaction::Trigger,
            EventKind::ShippingFailed | EventKind::OrderCancelled => Reaction::DownstreamFailure,
            EventKind::ShippingSucceeded
            | EventKind::ShippingCompensated
            | EventKind::OrderCompleted => Reaction::Observe,
            _ => Reaction::Irrelevant,
        }
    }

    fn default_payload(&self) -> Payload {
        PaymentPayload {
            billing_id: 0,
            amount: self.amount,
        }
        .into()
    }

    async fn execute(&self, record: &StepRecord, _: &EventEnvelope, _: u32) -> StepOutcome {
        match self
            .payments
            .charge(record.correlation_id(), self.amount)
            .await
        {
            Ok(payment) => StepOutcome::Succeeded {
                resource_ref: payment.payment_id,
                payload: PaymentPayload {
                    billing_id: payment.billing_id,
                    amount: payment.amount,
                }
                .into(),
            },
            Err(e) => StepOutcome::from_error(e),
        }
    }

    async fn compensate(&self, record: &StepRecord) -> Result<()> {
        match record.local_resource_ref() {
            Some(payment_id) => self.payments.refund(payment_id).await,
            None => Ok(()),
        }
    }
}

/// Ships the goods once payment succeeded; cancels if the payment is refunded.
pub struct ShippingStep<S> {
    shipping: S,
}

impl<S: ShippingService> ShippingStep<S> {
    pub fn new(shipping: S) -> Self {
        Self { shipping }
    }
}

#[async_trait]
impl<S: ShippingService> StepDefinition for ShippingStep<S> {
    fn name(&self) -> &'static str {
        SHIPPING_SERVICE
    }

    fn topic(&self) -> Topic {
        Topic::ShippingUpdates
    }

    fn subscriptions(&self) -> &'static [Topic] {
        &[Topic::PaymentUpdates]
    }

    fn reaction(&self, kind: EventKind) -> Reaction {
        match kind {
            EventKind::PaymentSucceeded => Reaction::Trigger,
            EventKind::PaymentFailed => Reaction::UpstreamFailure,
            EventKind::PaymentCompensated => Reaction::DownstreamFailure,
            _ => Reaction::Irrelevant,
        }
    }

    fn default_payload(&self) -> Payload {
        ShippingPayload {
            address: DEFAULT_ADDRESS.to_string(),
        }
        .into()
    }

    async fn execute(&self, record: &StepRecord, _: &EventEnvelope, _: u32) -> StepOutcome {
        match self.shipping.create_shipment(record.correlation_id()).await {
            Ok(shipment) => StepOutcome::Succeeded {
                resource_ref: shipment.tracking_number,
                payload: ShippingPayload {
                    address: shipment.address,
                }
                .into(),
            },
            Err(e) => StepOutcome::from_error(e),
        }
    }

    async fn compensate(&self, record: &StepRecord) -> Result<()> {
        match record.local_resource_ref() {
            Some(tracking_number) => self.shipping.cancel_shipment(tracking_number).await,
            None => Ok(()),
        }
    }
}
