//! JSON wire frames exchanged over the socket.
//!
//! Every frame is `{"event": <tag>, "data": <payload>}` in both directions.

use crate::presence::OnlineUser;
use common::secret::SecretString;
use common::types::{ConnectionId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tag of the handshake frame a client sends first.
pub const AUTHENTICATE_EVENT: &str = "authenticate";

/// Close code sent when no credential arrives in time.
pub const CLOSE_AUTH_TIMEOUT: u16 = 4001;
/// Close code sent when the credential is rejected.
pub const CLOSE_AUTH_REJECTED: u16 = 4002;
/// Close code sent when the coordinator cannot register the connection.
pub const CLOSE_REGISTRATION_FAILED: u16 = 4003;

/// Inbound frame as received from a client.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Payload of the `authenticate` handshake frame.
#[derive(Debug, Deserialize)]
pub struct AuthenticateData {
    pub token: SecretString,
}

/// Events emitted by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Authenticated {
        connection_id: ConnectionId,
    },
    Unauthorized {
        message: String,
    },
    OnlineUsers(Vec<OnlineUser>),
    Consumers {
        content: Vec<ConnectionId>,
        timestamp: i64,
    },
    Leave {
        socket_id: ConnectionId,
    },
    Direct {
        from: UserId,
        content: Value,
    },
    /// Reply to a media request; the tag echoes the request.
    Media {
        tag: &'static str,
        ok: bool,
        data: Value,
    },
    Error {
        code: i32,
        message: String,
    },
}

#[derive(Serialize)]
struct Frame<'a> {
    event: &'a str,
    data: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticatedData {
    connection_id: ConnectionId,
}

#[derive(Serialize)]
struct ConsumersData<'a> {
    content: &'a [ConnectionId],
    timestamp: i64,
}

#[derive(Serialize)]
struct LeaveData {
    #[serde(rename = "socketID")]
    socket_id: ConnectionId,
}

impl ServerEvent {
    /// Event tag on the wire.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            ServerEvent::Authenticated { .. } => "authenticated",
            ServerEvent::Unauthorized { .. } => "unauthorized",
            ServerEvent::OnlineUsers(_) => "onlineUsers",
            ServerEvent::Consumers { .. } => "consumers",
            ServerEvent::Leave { .. } => "leave",
            ServerEvent::Direct { .. } => "direct",
            ServerEvent::Media { tag, .. } => *tag,
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Serialize into a text frame.
    ///
    /// # Errors
    ///
    /// Propagates `serde_json` failures (not expected for these shapes).
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        let data = match self {
            ServerEvent::Authenticated { connection_id } => {
                serde_json::to_value(AuthenticatedData {
                    connection_id: *connection_id,
                })?
            }
            ServerEvent::Unauthorized { message } => serde_json::json!({ "message": message }),
            ServerEvent::Error { code, message } => {
                serde_json::json!({ "code": code, "message": message })
            }
            ServerEvent::OnlineUsers(users) => serde_json::to_value(users)?,
            ServerEvent::Consumers { content, timestamp } => {
                serde_json::to_value(ConsumersData {
                    content,
                    timestamp: *timestamp,
                })?
            }
            ServerEvent::Leave { socket_id } => serde_json::to_value(LeaveData {
                socket_id: *socket_id,
            })?,
            ServerEvent::Direct { from, content } => {
                serde_json::json!({ "from": from, "content": content })
            }
            ServerEvent::Media { ok, data, .. } => serde_json::json!({ "ok": ok, "data": data }),
        };

        serde_json::to_string(&Frame {
            event: self.tag(),
            data,
        })
    }
}
