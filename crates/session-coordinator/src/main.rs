//! Session Coordinator
//!
//! WebSocket coordination server for multi-party media sessions.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Spawn the coordinator actor
//! 4. Spawn storage bootstrap (retries until reconciled); readiness flips
//!    when it completes
//! 5. Serve `/ws`, `/health`, `/ready` and `/metrics` on one listener
//! 6. Wait for shutdown signal, close sessions, stop the actor

#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use session_coordinator::actors::{ActorMetrics, CoordinatorHandle};
use session_coordinator::app_router;
use session_coordinator::auth::CredentialVerifier;
use session_coordinator::bootstrap::BootstrapCoordinator;
use session_coordinator::config::Config;
use session_coordinator::media::UnavailableMediaRouter;
use session_coordinator::observability::{init_metrics_recorder, HealthState};
use session_coordinator::store::redis::RedisConnector;
use session_coordinator::ws::AppState;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long shutdown waits for sessions to unregister.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_coordinator=debug,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting Session Coordinator");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        auth_timeout_ms = config.auth_timeout.as_millis(),
        bootstrap_retry_ms = config.bootstrap_retry_delay.as_millis(),
        outbound_buffer = config.outbound_buffer,
        "Configuration loaded successfully"
    );

    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let shutdown_token = CancellationToken::new();
    // Outlives the sessions so their cleanup can still reach it.
    let coordinator_token = CancellationToken::new();

    let coordinator = CoordinatorHandle::new(ActorMetrics::new(), coordinator_token.clone());
    info!("Coordinator actor started");

    let (bootstrap, storage) = BootstrapCoordinator::new(
        Arc::new(RedisConnector::new(config.redis_url.clone())),
        config.root_user.clone(),
        config.bcrypt_cost,
        config.bootstrap_retry_delay,
    );
    tokio::spawn(bootstrap.run(shutdown_token.child_token()));

    let health_state = HealthState::new(
        coordinator.clone(),
        storage.clone(),
        shutdown_token.clone(),
    );

    let state = AppState {
        coordinator: coordinator.clone(),
        verifier: Arc::new(CredentialVerifier::new(
            config.auth_secret.clone(),
            config.auth_timeout,
        )),
        storage,
        media: Arc::new(UnavailableMediaRouter),
        outbound_buffer: config.outbound_buffer,
        shutdown: shutdown_token.clone(),
    };

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let app = app_router(state, health_state).merge(metrics_router);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %config.bind_address, "Failed to bind listener");
            format!("Failed to bind to {}: {e}", config.bind_address)
        })?;
    info!(addr = %config.bind_address, "Listening");

    let server_token = shutdown_token.clone();
    let server = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_token.cancelled().await;
        });
        if let Err(e) = server.await {
            error!(error = %e, "Server failed");
        }
    });

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    // Flips /ready to 503 as well.
    shutdown_token.cancel();

    drain_sessions(&coordinator).await;
    coordinator_token.cancel();

    if let Err(e) = server.await {
        warn!(error = %e, "Server task ended abnormally");
    }

    info!("Session Coordinator shutdown complete");
    Ok(())
}

/// Wait until every session has unregistered, up to [`DRAIN_TIMEOUT`].
async fn drain_sessions(coordinator: &CoordinatorHandle) {
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        loop {
            match coordinator.get_status().await {
                Ok(status) if status.connections > 0 => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                _ => break,
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            timeout_ms = DRAIN_TIMEOUT.as_millis(),
            "Sessions still registered at shutdown"
        );
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
