//! HTTP surface for the saga participants.
//!
//! Each service binary runs one [`Participant`] behind the same router
//! layout: one inbound endpoint per subscribed topic, the broker's
//! subscription discovery document, `POST /orders` on the initiator, and
//! health and Prometheus endpoints. Logging goes through `tracing`.

pub mod config;
pub mod error;
pub mod role;
pub mod routes;
pub mod server;

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use ledger::InMemoryStepStore;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    FailureStrategy, InMemoryOrderService, InMemoryPaymentService, InMemoryShippingService,
    OrderStep, Participant, ParticipantSettings, PaymentStep, RandomFailure, ShippingStep,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use transport::{DeadLetterQueue, Publisher};

pub use config::Config;
pub use error::ApiError;
pub use role::Role;

/// Shared application state accessible from all handlers.
pub struct AppState<P> {
    pub participant: Arc<Participant<InMemoryStepStore, P>>,
    pub dead_letters: DeadLetterQueue,
    pub metrics: PrometheusHandle,
}

impl<P: Publisher> AppState<P> {
    pub fn new(participant: Arc<Participant<InMemoryStepStore, P>>, metrics: PrometheusHandle) -> Self {
        Self {
            participant,
            dead_letters: DeadLetterQueue::default(),
            metrics,
        }
    }
}

/// Builds the participant for `role` with failure injection from `config`.
pub fn build_participant<P: Publisher>(
    role: Role,
    config: &Config,
    publisher: P,
) -> Participant<InMemoryStepStore, P> {
    build_participant_with(
        role,
        RandomFailure::new(config.failure_rate),
        config.participant_settings(),
        publisher,
    )
}

/// Builds the participant for `role` around in-memory business services
/// that consult `failures`.
pub fn build_participant_with<P: Publisher>(
    role: Role,
    failures: impl FailureStrategy + 'static,
    settings: ParticipantSettings,
    publisher: P,
) -> Participant<InMemoryStepStore, P> {
    let store = InMemoryStepStore::new();
    match role {
        Role::Order => Participant::new(
            OrderStep::new(InMemoryOrderService::with_strategy(failures)),
            store,
            publisher,
            settings,
        ),
        Role::Payment => Participant::new(
            PaymentStep::new(InMemoryPaymentService::with_strategy(failures)),
            store,
            publisher,
            settings,
        ),
        Role::Shipping => Participant::new(
            ShippingStep::new(InMemoryShippingService::with_strategy(failures)),
            store,
            publisher,
            settings,
        ),
    }
}

/// Creates the Axum application router with all routes and shared state.
///
/// Inbound event routes are derived from the participant's subscriptions,
/// so the router always matches what `/turbine/config` advertises.
pub fn create_app<P: Publisher + 'static>(state: Arc<AppState<P>>) -> Router {
    let participant = state.participant.clone();

    let mut router = Router::new()
        .route("/health", get(routes::health::check::<P>))
        .route("/metrics", get(routes::metrics::get::<P>))
        .route("/turbine/config", get(routes::discovery::config::<P>))
        .route("/sagas/{id}", get(routes::sagas::get::<P>))
        .route("/dead_letters", get(routes::sagas::dead_letters::<P>));

    if participant.step().initiating_kind().is_some() {
        router = router.route("/orders", post(routes::orders::create::<P>));
    }

    for topic in participant.subscription_config().topics() {
        router = router.route(
            topic.endpoint(),
            post(move |state: State<Arc<AppState<P>>>, body: Bytes| {
                routes::events::receive(state, topic, body)
            }),
        );
    }

    router
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
