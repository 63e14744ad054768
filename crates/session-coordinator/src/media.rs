//! Media routing collaborator.
//!
//! The media engine lives outside this service. The coordinator forwards
//! media signaling requests together with the room the caller occupies and
//! relays the opaque result back to the caller.

use crate::errors::CoordinatorError;
use async_trait::async_trait;
use common::types::{ConnectionId, RoomId, UserId};
use serde_json::Value;

/// Media signaling operations forwarded to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaOperation {
    RouterRtpCapabilities,
    CreateTransport,
    ConnectTransport,
    Produce,
    Consume,
}

impl MediaOperation {
    /// Event tag used on the wire for both request and reply.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            MediaOperation::RouterRtpCapabilities => "getRouterRtpCapabilities",
            MediaOperation::CreateTransport => "createTransport",
            MediaOperation::ConnectTransport => "connectTransport",
            MediaOperation::Produce => "produce",
            MediaOperation::Consume => "consume",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaRequest {
    pub operation: MediaOperation,
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub room: RoomId,
    /// Opaque request body from the client.
    pub payload: Value,
}

#[async_trait]
pub trait MediaRouter: Send + Sync {
    /// Handle one request; the returned value is relayed to the caller.
    async fn handle(&self, request: MediaRequest) -> Result<Value, CoordinatorError>;

    /// Release engine resources held for a closed connection.
    async fn connection_closed(&self, _connection_id: ConnectionId) {}
}

/// Router used when no media engine is attached. Every request fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableMediaRouter;

#[async_trait]
impl MediaRouter for UnavailableMediaRouter {
    async fn handle(&self, request: MediaRequest) -> Result<Value, CoordinatorError> {
        Err(CoordinatorError::Media(format!(
            "no media engine attached for {}",
            request.operation.tag()
        )))
    }
}

/// Mock media router for testing.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use tokio::sync::Mutex;

    /// Records every request and answers with a fixed reply.
    pub struct RecordingMediaRouter {
        reply: Result<Value, String>,
        requests: Mutex<Vec<MediaRequest>>,
        closed: Mutex<Vec<ConnectionId>>,
    }

    impl RecordingMediaRouter {
        /// Answer every request with `reply`.
        #[must_use]
        pub fn replying(reply: Value) -> Self {
            Self {
                reply: Ok(reply),
                requests: Mutex::new(Vec::new()),
                closed: Mutex::new(Vec::new()),
            }
        }

        /// Fail every request with `message`.
        #[must_use]
        pub fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                requests: Mutex::new(Vec::new()),
                closed: Mutex::new(Vec::new()),
            }
        }

        pub async fn requests(&self) -> Vec<MediaRequest> {
            self.requests.lock().await.clone()
        }

        pub async fn closed_connections(&self) -> Vec<ConnectionId> {
            self.closed.lock().await.clone()
        }
    }

    #[async_trait]
    impl MediaRouter for RecordingMediaRouter {
        async fn handle(&self, request: MediaRequest) -> Result<Value, CoordinatorError> {
            self.requests.lock().await.push(request);
            self.reply.clone().map_err(CoordinatorError::Media)
        }

        async fn connection_closed(&self, connection_id: ConnectionId) {
            self.closed.lock().await.push(connection_id);
        }
    }
}
