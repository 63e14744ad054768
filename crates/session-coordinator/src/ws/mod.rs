//! WebSocket entrypoint.
//!
//! `GET /ws` upgrades the connection and hands the socket to a
//! [`session`] task. All shared dependencies travel in [`AppState`]; there
//! are no process-wide statics.

pub mod session;

use crate::actors::CoordinatorHandle;
use crate::auth::CredentialVerifier;
use crate::bootstrap::StorageHandle;
use crate::media::MediaRouter;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Dependencies shared by every connection.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: CoordinatorHandle,
    pub verifier: Arc<CredentialVerifier>,
    pub storage: StorageHandle,
    pub media: Arc<dyn MediaRouter>,
    /// Capacity of each connection's outbound mailbox.
    pub outbound_buffer: usize,
    /// Fires on server shutdown; each session runs under a child token.
    pub shutdown: CancellationToken,
}

/// Router serving the WebSocket endpoint.
pub fn ws_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| session::run_session(socket, state))
}
