use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::{CorrelationId, StepEntry, StepRecord, StepState, store::StepStore};

type Slot = Arc<Mutex<Option<StepRecord>>>;

/// In-memory step store.
///
/// The outer map is only locked long enough to find or insert a slot; each
/// slot has its own mutex, so handlers for different correlation ids run
/// fully in parallel. Records are never evicted.
#[derive(Clone, Default)]
pub struct InMemoryStepStore {
    slots: Arc<RwLock<HashMap<CorrelationId, Slot>>>,
}

impl InMemoryStepStore {
    /// Creates a new empty in-memory step store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, correlation_id: &CorrelationId) -> Slot {
        if let Some(slot) = self.slots.read().await.get(correlation_id) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(correlation_id.clone())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl StepStore for InMemoryStepStore {
    async fn entry(&self, correlation_id: &CorrelationId) -> StepEntry {
        let slot = self.slot(correlation_id).await;
        StepEntry::new(correlation_id.clone(), slot.lock_owned().await)
    }

    async fn get(&self, correlation_id: &CorrelationId) -> Option<StepRecord> {
        let slot = self.slots.read().await.get(correlation_id).cloned()?;
        let record = slot.lock().await.clone();
        record
    }

    async fn ids_in_states(&self, states: &[StepState]) -> Vec<CorrelationId> {
        let slots: Vec<(CorrelationId, Slot)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        slots
            .into_iter()
            .filter(|(_, slot)| {
                slot.try_lock()
                    .ok()
                    .and_then(|guard| guard.as_ref().map(StepRecord::state))
                    .is_some_and(|state| states.contains(&state))
            })
            .map(|(id, _)| id)
            .collect()
    }

    /// Never waits on a record that is being handled: a busy slot counts
    /// as occupied.
    async fn len(&self) -> usize {
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| slot.try_lock().map_or(true, |guard| guard.is_some()))
            .count()
    }
}
