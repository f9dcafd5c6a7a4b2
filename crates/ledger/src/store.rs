use async_trait::async_trait;
use protocol::EventKind;
use tokio::sync::OwnedMutexGuard;

use crate::{CorrelationId, StepRecord, StepState};

/// Exclusive handle on one correlation id's record.
///
/// Holding an entry serializes every handler for that correlation id; changes
/// made through it are visible to the next holder as soon as it is dropped.
/// Entries for different correlation ids never block each other.
pub struct StepEntry {
    correlation_id: CorrelationId,
    slot: OwnedMutexGuard<Option<StepRecord>>,
}

impl StepEntry {
    pub fn new(correlation_id: CorrelationId, slot: OwnedMutexGuard<Option<StepRecord>>) -> Self {
        Self {
            correlation_id,
            slot,
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Current state; `Idle` when no record exists.
    pub fn state(&self) -> StepState {
        self.slot
            .as_ref()
            .map(StepRecord::state)
            .unwrap_or(StepState::Idle)
    }

    pub fn record(&self) -> Option<&StepRecord> {
        self.slot.as_ref()
    }

    pub fn record_mut(&mut self) -> Option<&mut StepRecord> {
        self.slot.as_mut()
    }

    /// Returns the record, creating it in `AwaitingUpstream` if absent.
    pub fn get_or_create(&mut self) -> &mut StepRecord {
        let id = self.correlation_id.clone();
        self.slot.get_or_insert_with(|| StepRecord::new(id))
    }

    pub fn has_processed(&self, kind: EventKind) -> bool {
        self.slot.as_ref().is_some_and(|r| r.has_processed(kind))
    }

    pub fn superseded_by(&self, kind: EventKind) -> Option<EventKind> {
        self.slot.as_ref().and_then(|r| r.superseded_by(kind))
    }

    /// Copies the record so an uncommitted transition can be undone.
    pub fn snapshot(&self) -> Option<StepRecord> {
        self.slot.clone()
    }

    /// Puts back a snapshot taken with [`StepEntry::snapshot`].
    pub fn restore(&mut self, snapshot: Option<StepRecord>) {
        *self.slot = snapshot;
    }
}

/// Arena of step records keyed by correlation id.
///
/// Implementations must be thread-safe and hand out at most one
/// [`StepEntry`] per correlation id at a time.
#[async_trait]
pub trait StepStore: Send + Sync {
    /// Locks the record slot for `correlation_id`, waiting for other holders.
    async fn entry(&self, correlation_id: &CorrelationId) -> StepEntry;

    /// Returns a copy of the record, if one exists.
    async fn get(&self, correlation_id: &CorrelationId) -> Option<StepRecord>;

    /// Lists the ids of records currently in one of `states`.
    ///
    /// Records held by an in-flight handler are skipped: they are being
    /// worked on and will be seen by the next scan.
    async fn ids_in_states(&self, states: &[StepState]) -> Vec<CorrelationId>;

    /// Returns the number of records. Must not wait for in-flight handlers.
    async fn len(&self) -> usize;

    /// Returns true if no record exists.
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Idempotency ledger operations on top of any step store.
#[async_trait]
pub trait IdempotencyLedger: StepStore {
    /// True if this exact (correlation id, kind) pair already had an effect.
    async fn has_processed(&self, correlation_id: &CorrelationId, kind: EventKind) -> bool {
        self.entry(correlation_id).await.has_processed(kind)
    }

    /// Records the pair, creating the record if needed.
    async fn record_processed(&self, correlation_id: &CorrelationId, kind: EventKind) {
        let mut entry = self.entry(correlation_id).await;
        entry.get_or_create().mark_processed(kind);
    }
}

// Blanket implementation for all StepStore implementations
impl<T: StepStore + ?Sized> IdempotencyLedger for T {}
