use ledger::StepState;
use protocol::EventKind;
use serde::Serialize;

/// Why an event was acknowledged without changing anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IgnoreReason {
    /// This (correlation id, kind) pair was already processed.
    Duplicate,
    /// The other outcome of the same step was honored first.
    Superseded { by: EventKind },
    /// The local step is already past the point this event could change.
    AlreadyResolved { state: StepState },
    /// A downstream failure arrived but the local step never succeeded.
    NothingToUndo,
    /// The participant does not react to this kind.
    NotSubscribed,
}

/// What handling one event did to the local step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Disposition {
    /// The step moved forward; `emitted` lists the published kinds.
    Advanced {
        state: StepState,
        emitted: Vec<EventKind>,
    },
    /// The local effect was reversed.
    Compensated { emitted: Option<EventKind> },
    /// A downstream failure is parked until the step resolves.
    Deferred,
    /// Recorded in the ledger only.
    Observed,
    Ignored(IgnoreReason),
}

impl Disposition {
    /// Kinds published while producing this disposition.
    pub fn emitted(&self) -> Vec<EventKind> {
        match self {
            Disposition::Advanced { emitted, .. } => emitted.clone(),
            Disposition::Compensated { emitted } => emitted.iter().copied().collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Disposition::Ignored(_))
    }
}
