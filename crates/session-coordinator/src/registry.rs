//! Socket registry: the authoritative index of live connections.
//!
//! Owns four mappings and keeps them consistent:
//!
//! - connection -> identity (1:1)
//! - identity -> connections (1:N)
//! - connection -> room, room -> consumers (via [`RoomTable`])
//!
//! The registry is plain data. Atomicity with respect to concurrent callers
//! comes from its owner: only the coordinator actor holds it, and every
//! mutation completes inside one message turn.

use crate::errors::CoordinatorError;
use crate::rooms::{RoomDeparture, RoomJoin, RoomTable};
use chrono::{DateTime, Utc};
use common::types::{ConnectionId, RoomId, UserId};
use std::collections::{HashMap, HashSet};

/// Authenticated user attached to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub email: String,
}

#[derive(Debug, Clone)]
struct ConnectionEntry {
    identity: Identity,
    registered_at: DateTime<Utc>,
    /// Registration order, used for stable presence ordering.
    seq: u64,
}

/// What `unregister` removed.
#[derive(Debug, Clone)]
pub struct Unregistered {
    pub identity: Identity,
    pub registered_at: DateTime<Utc>,
    /// Room the connection was removed from, with the members left behind.
    pub departure: Option<RoomDeparture>,
}

/// A live connection in registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveConnection {
    pub connection_id: ConnectionId,
    pub identity: Identity,
}

#[derive(Debug, Default)]
pub struct SocketRegistry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    by_identity: HashMap<UserId, HashSet<ConnectionId>>,
    rooms: RoomTable,
    next_seq: u64,
}

impl SocketRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newly authenticated connection.
    ///
    /// # Errors
    ///
    /// `DuplicateRegistration` if the connection id is already present; the
    /// registry is left unchanged.
    pub fn register(
        &mut self,
        connection_id: ConnectionId,
        identity: Identity,
    ) -> Result<(), CoordinatorError> {
        if self.connections.contains_key(&connection_id) {
            return Err(CoordinatorError::DuplicateRegistration(
                connection_id.to_string(),
            ));
        }

        self.by_identity
            .entry(identity.user_id.clone())
            .or_default()
            .insert(connection_id);
        self.connections.insert(
            connection_id,
            ConnectionEntry {
                identity,
                registered_at: Utc::now(),
                seq: self.next_seq,
            },
        );
        self.next_seq += 1;
        Ok(())
    }

    /// Remove a connection from every mapping, room membership included.
    ///
    /// Idempotent: returns `None` when the connection is not registered.
    pub fn unregister(&mut self, connection_id: ConnectionId) -> Option<Unregistered> {
        let entry = self.connections.remove(&connection_id)?;
        let departure = self.rooms.remove_connection(connection_id);

        if let Some(set) = self.by_identity.get_mut(&entry.identity.user_id) {
            set.remove(&connection_id);
            if set.is_empty() {
                self.by_identity.remove(&entry.identity.user_id);
            }
        }

        Some(Unregistered {
            identity: entry.identity,
            registered_at: entry.registered_at,
            departure,
        })
    }

    /// Connections owned by `user_id`, sorted. Empty when offline.
    #[must_use]
    pub fn lookup_by_identity(&self, user_id: &UserId) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .by_identity
            .get(user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn lookup_identity(&self, connection_id: &ConnectionId) -> Option<&Identity> {
        self.connections.get(connection_id).map(|e| &e.identity)
    }

    #[must_use]
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Distinct users with at least one live connection.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.by_identity.len()
    }

    /// Live connections ordered by registration.
    #[must_use]
    pub fn live_connections(&self) -> Vec<LiveConnection> {
        let mut entries: Vec<(&ConnectionId, &ConnectionEntry)> =
            self.connections.iter().collect();
        entries.sort_unstable_by_key(|(_, entry)| entry.seq);
        entries
            .into_iter()
            .map(|(id, entry)| LiveConnection {
                connection_id: *id,
                identity: entry.identity.clone(),
            })
            .collect()
    }

    /// Put a registered connection into `room`.
    ///
    /// # Errors
    ///
    /// `NotRegistered` if the connection is not live, so rooms never hold
    /// dangling members.
    pub fn join(
        &mut self,
        connection_id: ConnectionId,
        room: RoomId,
    ) -> Result<RoomJoin, CoordinatorError> {
        if !self.contains(&connection_id) {
            return Err(CoordinatorError::NotRegistered(connection_id.to_string()));
        }
        Ok(self.rooms.join(connection_id, room))
    }

    /// Take a connection out of `room`. No-op when it is not a member.
    pub fn leave(&mut self, connection_id: ConnectionId, room: &RoomId) -> Option<RoomDeparture> {
        self.rooms.leave(connection_id, room)
    }

    #[must_use]
    pub fn room_of(&self, connection_id: &ConnectionId) -> Option<&RoomId> {
        self.rooms.room_of(connection_id)
    }

    #[must_use]
    pub fn room_members(&self, room: &RoomId) -> Vec<ConnectionId> {
        self.rooms.members(room)
    }

    #[must_use]
    pub fn active_room_count(&self) -> usize {
        self.rooms.active_room_count()
    }

    /// Cross-checks every mapping against the others.
    ///
    /// Holds after every public mutation; the coordinator asserts it in
    /// debug builds.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let identity_forward = self.connections.iter().all(|(id, entry)| {
            self.by_identity
                .get(&entry.identity.user_id)
                .is_some_and(|set| set.contains(id))
        });
        let identity_reverse = self.by_identity.iter().all(|(user, set)| {
            !set.is_empty()
                && set.iter().all(|id| {
                    self.connections
                        .get(id)
                        .is_some_and(|e| &e.identity.user_id == user)
                })
        });
        let rooms_live = self
            .rooms
            .occupied_connections()
            .all(|id| self.connections.contains_key(id));

        identity_forward && identity_reverse && rooms_live && self.rooms.is_consistent()
    }
}
