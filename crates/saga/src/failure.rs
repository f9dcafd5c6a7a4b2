//! Injectable failure strategies for the in-memory business services.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use protocol::CorrelationId;
use rand::Rng;

/// What a service should do with one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    Proceed,
    /// Fail in a way that may succeed if tried again.
    Retryable,
    /// Fail for good.
    Reject,
}

/// Decides, per request, whether a service call should fail.
pub trait FailureStrategy: Send + Sync + fmt::Debug {
    fn decide(&self, correlation_id: &CorrelationId) -> FailureDecision;
}

/// Every request succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverFail;

impl FailureStrategy for NeverFail {
    fn decide(&self, _: &CorrelationId) -> FailureDecision {
        FailureDecision::Proceed
    }
}

/// Every request is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReject;

impl FailureStrategy for AlwaysReject {
    fn decide(&self, _: &CorrelationId) -> FailureDecision {
        FailureDecision::Reject
    }
}

/// Rejects each request independently with probability `rate`.
#[derive(Debug, Clone, Copy)]
pub struct RandomFailure {
    rate: f64,
}

impl RandomFailure {
    pub fn new(rate: f64) -> Self {
        Self {
            rate: if rate.is_finite() { rate.clamp(0.0, 1.0) } else { 0.0 },
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl FailureStrategy for RandomFailure {
    fn decide(&self, _: &CorrelationId) -> FailureDecision {
        if rand::thread_rng().gen_bool(self.rate) {
            FailureDecision::Reject
        } else {
            FailureDecision::Proceed
        }
    }
}

/// Plays back a fixed list of decisions, then proceeds forever.
#[derive(Debug, Default)]
pub struct ScriptedFailures {
    script: Mutex<VecDeque<FailureDecision>>,
}

impl ScriptedFailures {
    pub fn new(script: impl IntoIterator<Item = FailureDecision>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
        }
    }

    /// Decisions not yet played back.
    pub fn remaining(&self) -> usize {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl FailureStrategy for ScriptedFailures {
    fn decide(&self, _: &CorrelationId) -> FailureDecision {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(FailureDecision::Proceed)
    }
}

/// Adapts a closure into a strategy.
pub struct FnStrategy<F>(pub F);

impl<F> fmt::Debug for FnStrategy<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnStrategy")
    }
}

impl<F> FailureStrategy for FnStrategy<F>
where
    F: Fn(&CorrelationId) -> FailureDecision + Send + Sync,
{
    fn decide(&self, correlation_id: &CorrelationId) -> FailureDecision {
        (self.0)(correlation_id)
    }
}
