//! Kind-specific payloads. Field names are part of the wire contract.

use serde::{Deserialize, Serialize};

use crate::Topic;

/// Payload carried on `order_updates`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPayload {
    pub order_id: i64,
    pub product_id: i64,
}

/// Payload carried on `payment_updates`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaymentPayload {
    pub billing_id: i64,
    pub amount: f64,
}

/// Payload carried on `shipping_updates`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingPayload {
    pub address: String,
}

/// Payload of an envelope; the variant is fixed by the envelope's topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Order(OrderPayload),
    Payment(PaymentPayload),
    Shipping(ShippingPayload),
}

impl Payload {
    /// The topic this payload shape belongs to.
    pub fn topic(&self) -> Topic {
        match self {
            Payload::Order(_) => Topic::OrderUpdates,
            Payload::Payment(_) => Topic::PaymentUpdates,
            Payload::Shipping(_) => Topic::ShippingUpdates,
        }
    }

    /// Decodes the payload fields expected on `topic` from a JSON object.
    pub(crate) fn from_fields(
        topic: Topic,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, serde_json::Error> {
        let value = serde_json::Value::Object(fields);
        Ok(match topic {
            Topic::OrderUpdates => Payload::Order(serde_json::from_value(value)?),
            Topic::PaymentUpdates => Payload::Payment(serde_json::from_value(value)?),
            Topic::ShippingUpdates => Payload::Shipping(serde_json::from_value(value)?),
        })
    }

    /// Returns the payload fields as a JSON object, ready to be flattened.
    pub(crate) fn to_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    pub fn as_order(&self) -> Option<&OrderPayload> {
        match self {
            Payload::Order(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_payment(&self) -> Option<&PaymentPayload> {
        match self {
            Payload::Payment(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_shipping(&self) -> Option<&ShippingPayload> {
        match self {
            Payload::Shipping(p) => Some(p),
            _ => None,
        }
    }
}

impl From<OrderPayload> for Payload {
    fn from(p: OrderPayload) -> Self {
        Payload::Order(p)
    }
}

impl From<PaymentPayload> for Payload {
    fn from(p: PaymentPayload) -> Self {
        Payload::Payment(p)
    }
}

impl From<ShippingPayload> for Payload {
    fn from(p: ShippingPayload) -> Self {
        Payload::Shipping(p)
    }
}
