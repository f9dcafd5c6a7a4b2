pub mod error;
pub mod memory;
pub mod record;
pub mod store;

pub use common::CorrelationId;
pub use error::{LedgerError, Result};
pub use memory::InMemoryStepStore;
pub use record::{Failure, FailureCause, StepRecord, StepState};
pub use store::{IdempotencyLedger, StepEntry, StepStore};
