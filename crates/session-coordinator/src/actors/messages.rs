//! Message types for the coordinator actor.
//!
//! Request/response pairs use a `respond_to` oneshot; the handle methods in
//! [`super::coordinator`] wrap them.

use crate::errors::CoordinatorError;
use crate::presence::PresenceEntry;
use crate::registry::{Identity, Unregistered};

use super::connection::ConnectionOutbound;

use common::types::{ConnectionId, RoomId, UserId};
use serde_json::Value;
use tokio::sync::oneshot;

/// Messages handled by the `CoordinatorActor`.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Add an authenticated connection and announce presence.
    Register {
        connection_id: ConnectionId,
        identity: Identity,
        outbound: ConnectionOutbound,
        respond_to: oneshot::Sender<Result<(), CoordinatorError>>,
    },

    /// Leave the occupied room, drop the connection, announce presence.
    Unregister {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Option<Unregistered>>,
    },

    /// Move a connection into a room. Replies with the member list.
    Join {
        connection_id: ConnectionId,
        room: RoomId,
        respond_to: oneshot::Sender<Result<Vec<ConnectionId>, CoordinatorError>>,
    },

    /// Take a connection out of a room. Replies whether it was a member.
    Leave {
        connection_id: ConnectionId,
        room: RoomId,
        respond_to: oneshot::Sender<bool>,
    },

    LookupByIdentity {
        user_id: UserId,
        respond_to: oneshot::Sender<Vec<ConnectionId>>,
    },

    LookupIdentity {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Option<Identity>>,
    },

    RoomOf {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Option<RoomId>>,
    },

    /// Deliver a `direct` event to every connection of `to`.
    /// Replies with the number of connections reached.
    SendToUser {
        from: UserId,
        to: UserId,
        content: Value,
        respond_to: oneshot::Sender<Result<usize, CoordinatorError>>,
    },

    PresenceSnapshot {
        respond_to: oneshot::Sender<Vec<PresenceEntry>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<CoordinatorStatus>,
    },
}

/// Point-in-time counters from the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStatus {
    pub connections: usize,
    pub users_online: usize,
    pub active_rooms: usize,
    pub broadcasts_sent: u64,
    /// Whether the registry's mappings agreed with each other.
    pub consistent: bool,
}
