//! Presence projection of the socket registry.
//!
//! One entry per live authenticated connection. The coordinator recomputes
//! the snapshot after every committed registration change and fans it out
//! to all connections as the `onlineUsers` event.

use crate::registry::SocketRegistry;
use common::types::{ConnectionId, UserId};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
}

/// Presence of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub status: PresenceStatus,
}

/// Wire shape of a presence entry: `{ "id": <user>, "status": "online" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnlineUser {
    pub id: UserId,
    pub status: PresenceStatus,
}

impl From<&PresenceEntry> for OnlineUser {
    fn from(entry: &PresenceEntry) -> Self {
        Self {
            id: entry.user_id.clone(),
            status: entry.status,
        }
    }
}

/// Point-in-time presence, in registration order.
#[must_use]
pub fn snapshot(registry: &SocketRegistry) -> Vec<PresenceEntry> {
    registry
        .live_connections()
        .into_iter()
        .map(|live| PresenceEntry {
            connection_id: live.connection_id,
            user_id: live.identity.user_id,
            status: PresenceStatus::Online,
        })
        .collect()
}

/// Payload for the `onlineUsers` event.
#[must_use]
pub fn online_users(entries: &[PresenceEntry]) -> Vec<OnlineUser> {
    entries.iter().map(OnlineUser::from).collect()
}
