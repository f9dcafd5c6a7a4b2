//! The per-participant description of a saga step.

use async_trait::async_trait;
use ledger::StepRecord;
use protocol::{EventEnvelope, EventKind, Payload, Topic};

use crate::error::Result;

/// How a participant reacts to an inbound event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Starts the local business action.
    Trigger,
    /// An earlier step failed; the local step will never be triggered.
    UpstreamFailure,
    /// A later step failed; the local effect must be reversed.
    DownstreamFailure,
    /// Recorded but changes nothing.
    Observe,
    /// Not subscribed to.
    Irrelevant,
}

/// Result of running the local business action once.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded {
        /// Handle needed to reverse the action later.
        resource_ref: String,
        /// Payload of the success event.
        payload: Payload,
    },
    /// May succeed if attempted again.
    RetryableFailure(String),
    PermanentFailure(String),
}

impl StepOutcome {
    /// Maps a service error onto an outcome by its retryability.
    pub fn from_error(err: crate::SagaError) -> Self {
        if err.is_retryable() {
            StepOutcome::RetryableFailure(err.to_string())
        } else {
            StepOutcome::PermanentFailure(err.to_string())
        }
    }
}

/// One participant's step: what it listens to, what it does, and how to
/// undo it.
///
/// The outbound success, failure and compensated kinds are those of
/// [`StepDefinition::topic`].
#[async_trait]
pub trait StepDefinition: Send + Sync {
    /// Service name, used as the envelope source and in logs and metrics.
    fn name(&self) -> &'static str;

    /// The topic this participant publishes on.
    fn topic(&self) -> Topic;

    /// Topics this participant wants delivered.
    fn subscriptions(&self) -> &'static [Topic];

    fn reaction(&self, kind: EventKind) -> Reaction;

    /// Whether an upstream failure is announced with the local failure kind.
    fn emits_on_upstream_failure(&self) -> bool {
        false
    }

    /// Kind emitted when this participant starts a saga, if it can.
    fn initiating_kind(&self) -> Option<EventKind> {
        None
    }

    /// Payload used on outbound events when the record has none.
    fn default_payload(&self) -> Payload;

    /// Runs the local business action for `trigger`.
    async fn execute(&self, record: &StepRecord, trigger: &EventEnvelope, attempt: u32)
    -> StepOutcome;

    /// Reverses the local effect recorded in `record`. Must be idempotent.
    async fn compensate(&self, record: &StepRecord) -> Result<()>;

    fn success_kind(&self) -> EventKind {
        self.topic().success_kind()
    }

    fn failure_kind(&self) -> EventKind {
        self.topic().failure_kind()
    }

    fn compensated_kind(&self) -> Option<EventKind> {
        self.topic().compensated_kind()
    }

    /// Payload for failure and compensation events.
    fn outbound_payload(&self, record: &StepRecord) -> Payload {
        record
            .payload()
            .cloned()
            .unwrap_or_else(|| self.default_payload())
    }
}
