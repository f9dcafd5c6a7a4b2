//! Process wiring shared by the three service binaries.

use std::process::ExitCode;
use std::sync::Arc;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use saga::Sweeper;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use transport::{HttpPublisher, PublishError, RetryingPublisher};

use crate::{AppState, Config, Role, build_participant, create_app};

/// Errors that stop a service from starting or serving.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to install Prometheus recorder: {0}")]
    Metrics(#[from] BuildError),

    #[error("failed to set up broker client: {0}")]
    Publisher(#[from] PublishError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when both are set.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Runs one participant service until a shutdown signal arrives.
pub async fn run(config: Config) -> Result<(), ServerError> {
    // 1. Install Prometheus metrics recorder
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;

    // 2. Broker client with bounded retry
    let publisher = RetryingPublisher::new(
        HttpPublisher::new(config.broker_url.clone(), config.publish_timeout())?,
        config.publish_policy(),
    );

    // 3. Participant, timeout sweeper and application state
    let participant = Arc::new(build_participant(config.role, &config, publisher));
    let (stop_sweeper, sweeper_shutdown) = watch::channel(false);
    let sweeper = Sweeper::new(participant.clone(), config.sweep_interval()).spawn(sweeper_shutdown);
    let app = create_app(Arc::new(AppState::new(participant, metrics_handle)));

    // 4. Start server
    let addr = config.addr();
    tracing::info!(
        %addr,
        service = config.role.service_name(),
        broker = %config.broker_url,
        failure_rate = config.failure_rate,
        "starting saga participant"
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Serve);

    // 5. Stop the sweeper whether or not serving failed
    let _ = stop_sweeper.send(true);
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "sweeper task ended abnormally");
    }

    served?;
    tracing::info!("server shut down gracefully");
    Ok(())
}

/// Entry point used by each service binary.
pub async fn main(role: Role) -> ExitCode {
    let config = Config::from_env(role);
    init_tracing(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, service = role.service_name(), "service failed");
            ExitCode::FAILURE
        }
    }
}
