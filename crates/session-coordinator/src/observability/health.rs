//! `/health` and `/ready`.
//!
//! Both are computed on each request from state the service already owns:
//! liveness from the coordinator actor, readiness from the storage handle
//! and the shutdown token.
//!
//! Sockets are accepted while storage is disconnected, but disconnect
//! writes are skipped then, so `/ready` answers 503 until bootstrap
//! connects and again once shutdown starts draining sessions.

use crate::actors::CoordinatorHandle;
use crate::bootstrap::StorageHandle;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// State read by the `/health` and `/ready` handlers.
#[derive(Clone)]
pub struct HealthState {
    coordinator: CoordinatorHandle,
    storage: StorageHandle,
    shutdown: CancellationToken,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Liveness {
    pub status: &'static str,
    pub mailbox_depth: usize,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Readiness {
    pub status: &'static str,
    pub storage: &'static str,
    pub draining: bool,
}

impl HealthState {
    #[must_use]
    pub fn new(
        coordinator: CoordinatorHandle,
        storage: StorageHandle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            storage,
            shutdown,
        }
    }

    /// Live while the coordinator actor accepts requests.
    #[must_use]
    pub fn liveness(&self) -> Liveness {
        let status = if self.coordinator.is_cancelled() {
            "stopped"
        } else {
            "ok"
        };
        Liveness {
            status,
            mailbox_depth: self.coordinator.mailbox().current_depth(),
        }
    }

    #[must_use]
    pub fn readiness(&self) -> Readiness {
        let connected = self.storage.is_connected();
        let draining = self.shutdown.is_cancelled();
        Readiness {
            status: if connected && !draining {
                "ready"
            } else {
                "not_ready"
            },
            storage: if connected { "connected" } else { "disconnected" },
            draining,
        }
    }
}

pub fn health_router(health_state: HealthState) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<HealthState>) -> (StatusCode, Json<Liveness>) {
    let body = state.liveness();
    let code = if body.status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

async fn readiness_handler(State(state): State<HealthState>) -> (StatusCode, Json<Readiness>) {
    let body = state.readiness();
    let code = if body.status == "ready" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}
