//! Choreographed saga participants for the order → payment → shipping flow.
//!
//! There is no orchestrator. Each service runs one [`Participant`] that
//! reacts to the events of the other two:
//!
//! 1. order publishes `OrderCreated`
//! 2. payment charges and publishes `PaymentSucceeded` or `PaymentFailed`
//! 3. shipping ships and publishes `ShippingSucceeded` or `ShippingFailed`
//! 4. order closes with `OrderCompleted` or `OrderCancelled`
//!
//! A failure travels backwards one hop at a time: payment refunds on
//! `ShippingFailed` or `OrderCancelled`, and shipping cancels on
//! `PaymentCompensated`.

pub mod coordinator;
pub mod disposition;
pub mod error;
pub mod failure;
pub mod participant;
pub mod services;
pub mod step;
pub mod steps;
pub mod sweeper;

pub use coordinator::CompensationCoordinator;
pub use disposition::{Disposition, IgnoreReason};
pub use error::{Result, SagaError};
pub use failure::{
    AlwaysReject, FailureDecision, FailureStrategy, FnStrategy, NeverFail, RandomFailure,
    ScriptedFailures,
};
pub use participant::{Participant, ParticipantSettings};
pub use services::{
    InMemoryOrderService, InMemoryPaymentService, InMemoryShippingService, OrderConfirmation,
    OrderService, PaymentResult, PaymentService, ShipmentResult, ShippingService,
};
pub use step::{Reaction, StepDefinition, StepOutcome};
pub use steps::{OrderStep, PaymentStep, ShippingStep};
pub use sweeper::{SweepReport, Sweeper};
