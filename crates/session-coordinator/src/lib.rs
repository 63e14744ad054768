//! Session Coordinator Service Library
//!
//! Real-time coordination core for multi-party media sessions:
//!
//! - Authenticates WebSocket connections with an HS256 credential inside a
//!   fixed window
//! - Indexes live connections by identity and by room
//! - Broadcasts presence after every registration change
//! - Notifies room members of joins and departures
//! - Reconciles durable state left behind by a previous run before marking
//!   storage connected, retrying forever on failure
//!
//! # Architecture
//!
//! ```text
//! CoordinatorActor (singleton, owns SocketRegistry)
//! ├── presence snapshots and room notifications, fanned out by try_send
//! └── per connection:
//!     ├── session task (Unauthenticated -> Authenticated -> Closed)
//!     │   └── EventRouter bound from the static EVENT_TABLE
//!     └── writer task draining the outbound mailbox into the socket
//! BootstrapCoordinator (retry loop, publishes StorageState via watch)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Coordinator actor, connection mailboxes, mailbox metrics
//! - [`auth`] - Credential verification with the authentication window
//! - [`bootstrap`] - Storage connection and startup reconciliation
//! - [`config`] - Service configuration from environment
//! - [`dispatch`] - Static event table and per-connection router
//! - [`errors`] - Error types with client error codes
//! - [`media`] - Media routing collaborator
//! - [`persistence`] - Best-effort durable writes on disconnect
//! - [`presence`], [`registry`], [`rooms`] - In-memory indices
//! - [`protocol`] - JSON wire frames
//! - [`store`] - Durable store trait and Redis implementation
//! - [`ws`] - WebSocket endpoint and session lifecycle

pub mod actors;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod media;
pub mod observability;
pub mod persistence;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod rooms;
pub mod store;
pub mod ws;

use axum::Router;
use observability::{health_router, HealthState};
use tower_http::trace::TraceLayer;
use ws::{ws_router, AppState};

/// The service's HTTP surface: `/ws`, `/health` and `/ready`.
///
/// `/metrics` is merged in by the binary, which owns the recorder.
pub fn app_router(state: AppState, health_state: HealthState) -> Router {
    ws_router(state)
        .merge(health_router(health_state))
        .layer(TraceLayer::new_for_http())
}
