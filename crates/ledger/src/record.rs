//! Local step record and its state machine.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use protocol::{EventKind, Payload};
use serde::{Deserialize, Serialize};

use crate::{CorrelationId, LedgerError, Result};

/// The state of one participant's step for one saga instance.
///
/// State transitions:
/// ```text
/// Idle ──► AwaitingUpstream ──► Processing ──┬──► Succeeded ──► Compensating ──► Compensated
///                 │                          └──► Failed
///                 └──────────────────────────────► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StepState {
    /// No record exists for the correlation id.
    #[default]
    Idle,

    /// A record exists but the trigger for this step has not been handled.
    AwaitingUpstream,

    /// The local business action is running.
    Processing,

    /// The local action completed and the success event was published.
    Succeeded,

    /// The local action failed, timed out, or will never be triggered.
    Failed,

    /// A downstream failure arrived and the local effect is being reversed.
    Compensating,

    /// The local effect was reversed (terminal state).
    Compensated,
}

impl StepState {
    /// Returns true if the trigger event may still start this step.
    pub fn can_process(&self) -> bool {
        matches!(self, StepState::Idle | StepState::AwaitingUpstream)
    }

    /// Returns true if the local step has not been resolved yet.
    pub fn is_unresolved(&self) -> bool {
        matches!(
            self,
            StepState::Idle | StepState::AwaitingUpstream | StepState::Processing
        )
    }

    /// Returns true if a timeout horizon applies to this state.
    pub fn can_time_out(&self) -> bool {
        matches!(self, StepState::AwaitingUpstream | StepState::Processing)
    }

    /// Returns true if this step can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepState::Failed | StepState::Compensated)
    }

    /// Returns true if moving to `next` is a legal forward transition.
    pub fn can_transition_to(&self, next: StepState) -> bool {
        use StepState::*;
        matches!(
            (self, next),
            (Idle, AwaitingUpstream)
                | (AwaitingUpstream, Processing)
                | (AwaitingUpstream, Failed)
                | (Processing, Succeeded)
                | (Processing, Failed)
                | (Succeeded, Compensating)
                | (Compensating, Compensated)
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Idle => "Idle",
            StepState::AwaitingUpstream => "AwaitingUpstream",
            StepState::Processing => "Processing",
            StepState::Succeeded => "Succeeded",
            StepState::Failed => "Failed",
            StepState::Compensating => "Compensating",
            StepState::Compensated => "Compensated",
        }
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a step ended up `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCause {
    /// The local business action rejected the request.
    Business,
    /// The record stayed unresolved past the configured horizon.
    Timeout,
    /// An upstream step failed, so this step will never be triggered.
    Upstream,
}

/// Failure details kept on the record for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub cause: FailureCause,
    pub reason: String,
}

/// A participant's local view of one saga instance.
///
/// The set of processed kinds is the idempotency ledger for this correlation
/// id; it lives on the record so a state change and its ledger entry are
/// always committed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    correlation_id: CorrelationId,
    state: StepState,
    last_seen_kind: Option<EventKind>,
    attempt_count: u32,
    local_resource_ref: Option<String>,
    processed: BTreeSet<EventKind>,
    pending_compensation: Option<EventKind>,
    payload: Option<Payload>,
    failure: Option<Failure>,
    created_at: DateTime<Utc>,
    state_since: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StepRecord {
    /// Creates a record for a correlation id seen for the first time.
    pub fn new(correlation_id: CorrelationId) -> Self {
        let now = Utc::now();
        Self {
            correlation_id,
            state: StepState::AwaitingUpstream,
            last_seen_kind: None,
            attempt_count: 0,
            local_resource_ref: None,
            processed: BTreeSet::new(),
            pending_compensation: None,
            payload: None,
            failure: None,
            created_at: now,
            state_since: now,
            updated_at: now,
        }
    }

    /// Moves the record to `next`, rejecting anything the state machine forbids.
    pub fn transition(&mut self, next: StepState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition {
                correlation_id: self.correlation_id.clone(),
                from: self.state,
                to: next,
            });
        }
        let now = Utc::now();
        self.state = next;
        self.state_since = now;
        self.updated_at = now;
        Ok(())
    }

    /// Records `kind` in the ledger and as the last seen kind.
    pub fn mark_processed(&mut self, kind: EventKind) {
        self.processed.insert(kind);
        self.observe(kind);
    }

    /// Notes that `kind` was delivered without recording it in the ledger.
    pub fn observe(&mut self, kind: EventKind) {
        self.last_seen_kind = Some(kind);
        self.updated_at = Utc::now();
    }

    /// Counts one more execution attempt of the local action.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt_count += 1;
        self.updated_at = Utc::now();
        self.attempt_count
    }

    pub fn set_resource_ref(&mut self, resource_ref: impl Into<String>) {
        self.local_resource_ref = Some(resource_ref.into());
    }

    pub fn set_payload(&mut self, payload: Payload) {
        self.payload = Some(payload);
    }

    pub fn set_failure(&mut self, cause: FailureCause, reason: impl Into<String>) {
        self.failure = Some(Failure {
            cause,
            reason: reason.into(),
        });
    }

    /// Remembers a downstream failure that arrived before the step resolved.
    pub fn defer_compensation(&mut self, cause: EventKind) {
        if self.pending_compensation.is_none() {
            self.pending_compensation = Some(cause);
        }
        self.observe(cause);
    }

    /// Takes the deferred compensation cause, if any.
    pub fn take_pending_compensation(&mut self) -> Option<EventKind> {
        self.pending_compensation.take()
    }

    /// Returns true if the (correlation id, kind) pair was already processed.
    pub fn has_processed(&self, kind: EventKind) -> bool {
        self.processed.contains(&kind)
    }

    /// Returns the sibling of `kind` that was honored first, if any.
    pub fn superseded_by(&self, kind: EventKind) -> Option<EventKind> {
        kind.siblings()
            .iter()
            .copied()
            .find(|sibling| self.processed.contains(sibling))
    }

    /// Returns true if the record sat in a timeout-able state past `horizon`.
    pub fn is_stale(&self, now: DateTime<Utc>, horizon: Duration) -> bool {
        if !self.state.can_time_out() {
            return false;
        }
        let horizon = chrono::Duration::from_std(horizon).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(self.state_since) >= horizon
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    pub fn last_seen_kind(&self) -> Option<EventKind> {
        self.last_seen_kind
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn local_resource_ref(&self) -> Option<&str> {
        self.local_resource_ref.as_deref()
    }

    /// Kinds recorded in the ledger, in kind order.
    pub fn processed(&self) -> impl Iterator<Item = EventKind> + '_ {
        self.processed.iter().copied()
    }

    pub fn pending_compensation(&self) -> Option<EventKind> {
        self.pending_compensation
    }

    /// The last payload this participant emitted (or was initiated with).
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the record entered its current state.
    pub fn state_since(&self) -> DateTime<Utc> {
        self.state_since
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
