use chrono::{DateTime, Utc};
use common::CorrelationId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EventKind, MalformedEvent, Payload, Result, Topic};

/// Unique identifier for a single emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The immutable unit of communication between participants.
///
/// Built once by the emitting participant and never mutated afterwards; the
/// `with_*` methods consume the envelope and are meant for construction only.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    event_id: EventId,
    correlation_id: CorrelationId,
    kind: EventKind,
    payload: Payload,
    source: Option<String>,
    reason: Option<String>,
    emitted_at: DateTime<Utc>,
}

/// Flat JSON shape shared by every topic.
///
/// `kind` and the metadata fields are optional so that envelopes from
/// emitters that only send `correlation_id` + `status` + payload still decode.
#[derive(Debug, Serialize, Deserialize)]
struct WireEvent {
    correlation_id: String,
    status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_id: Option<EventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    emitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(flatten)]
    fields: serde_json::Map<String, serde_json::Value>,
}

impl EventEnvelope {
    /// Creates an envelope, checking that the payload shape matches the kind.
    pub fn new(
        correlation_id: CorrelationId,
        kind: EventKind,
        payload: impl Into<Payload>,
    ) -> Result<Self> {
        let payload = payload.into();
        if payload.topic() != kind.topic() {
            return Err(MalformedEvent::Payload {
                kind,
                reason: format!("payload belongs to topic {}", payload.topic()),
            });
        }
        Ok(Self {
            event_id: EventId::new(),
            correlation_id,
            kind,
            payload,
            source: None,
            reason: None,
            emitted_at: Utc::now(),
        })
    }

    /// Sets the emitting service name.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attaches a human readable failure reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The wire `status` flag, derived from the kind.
    pub fn status(&self) -> bool {
        self.kind.status()
    }

    /// The topic this envelope is published on.
    pub fn topic(&self) -> Topic {
        self.kind.topic()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn emitted_at(&self) -> DateTime<Utc> {
        self.emitted_at
    }

    /// Encodes the envelope as its flat JSON wire object.
    pub fn to_json(&self) -> serde_json::Value {
        let wire = WireEvent {
            correlation_id: self.correlation_id.to_string(),
            status: self.status(),
            kind: Some(self.kind.as_str().to_string()),
            event_id: Some(self.event_id),
            emitted_at: Some(self.emitted_at),
            source: self.source.clone(),
            reason: self.reason.clone(),
            fields: self.payload.to_fields(),
        };
        serde_json::to_value(wire).unwrap_or(serde_json::Value::Null)
    }

    /// Encodes the envelope as JSON bytes.
    pub fn encode(&self) -> Vec<u8> {
        self.to_json().to_string().into_bytes()
    }

    /// Decodes a delivery received on `topic`.
    pub fn decode(topic: Topic, body: &[u8]) -> Result<Self> {
        let wire: WireEvent = serde_json::from_slice(body)
            .map_err(|e| MalformedEvent::InvalidJson(e.to_string()))?;
        Self::from_wire(topic, wire)
    }

    /// Decodes an already parsed JSON value received on `topic`.
    pub fn from_json(topic: Topic, value: serde_json::Value) -> Result<Self> {
        let wire: WireEvent = serde_json::from_value(value)
            .map_err(|e| MalformedEvent::InvalidJson(e.to_string()))?;
        Self::from_wire(topic, wire)
    }

    fn from_wire(topic: Topic, wire: WireEvent) -> Result<Self> {
        let correlation_id = CorrelationId::parse(wire.correlation_id)
            .map_err(|_| MalformedEvent::EmptyCorrelationId)?;

        let kind = match wire.kind.as_deref() {
            Some(name) => {
                let kind: EventKind = name.parse()?;
                if kind.topic() != topic {
                    return Err(MalformedEvent::TopicMismatch { kind, topic });
                }
                if kind.status() != wire.status {
                    return Err(MalformedEvent::StatusMismatch {
                        kind,
                        status: wire.status,
                    });
                }
                kind
            }
            None => topic.legacy_kind(wire.status),
        };

        let payload =
            Payload::from_fields(topic, wire.fields).map_err(|e| MalformedEvent::Payload {
                kind,
                reason: e.to_string(),
            })?;

        Ok(Self {
            event_id: wire.event_id.unwrap_or_default(),
            correlation_id,
            kind,
            payload,
            source: wire.source,
            reason: wire.reason,
            emitted_at: wire.emitted_at.unwrap_or_else(Utc::now),
        })
    }
}

impl Serialize for EventEnvelope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
