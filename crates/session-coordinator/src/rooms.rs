//! Room membership table.
//!
//! Tracks connection -> room and room -> consumer set. A connection occupies
//! at most one room. Rooms are created on first join and kept when they
//! empty out. Callers are responsible for delivering the notifications
//! described by the returned [`RoomDeparture`] and [`RoomJoin`] values.

use common::types::{ConnectionId, RoomId};
use std::collections::{HashMap, HashSet};

/// A connection left a room; the remaining members must be told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomDeparture {
    pub room: RoomId,
    pub departed: ConnectionId,
    /// Consumers still in the room, sorted.
    pub remaining: Vec<ConnectionId>,
}

/// A connection joined a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomJoin {
    pub room: RoomId,
    /// Consumers of the joined room after the join (joiner included), sorted.
    pub members: Vec<ConnectionId>,
    /// Departure from the previously occupied room, if it differed.
    pub previous: Option<RoomDeparture>,
}

#[derive(Debug, Default)]
pub struct RoomTable {
    room_of: HashMap<ConnectionId, RoomId>,
    consumers: HashMap<RoomId, HashSet<ConnectionId>>,
}

impl RoomTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection` to `room`, first leaving any other room it occupies.
    ///
    /// Joining the room the connection already occupies changes nothing but
    /// still reports the member list so the caller can resend it.
    pub fn join(&mut self, connection: ConnectionId, room: RoomId) -> RoomJoin {
        let previous = match self.room_of.get(&connection) {
            Some(current) if *current == room => None,
            Some(_) => self.remove_connection(connection),
            None => None,
        };

        self.consumers
            .entry(room.clone())
            .or_default()
            .insert(connection);
        self.room_of.insert(connection, room.clone());

        RoomJoin {
            members: self.members(&room),
            room,
            previous,
        }
    }

    /// Remove `connection` from `room`. No-op when it is not a member of
    /// that room.
    pub fn leave(&mut self, connection: ConnectionId, room: &RoomId) -> Option<RoomDeparture> {
        if self.room_of.get(&connection) != Some(room) {
            return None;
        }
        self.remove_connection(connection)
    }

    /// Remove `connection` from whichever room it occupies.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> Option<RoomDeparture> {
        let room = self.room_of.remove(&connection)?;
        if let Some(set) = self.consumers.get_mut(&room) {
            set.remove(&connection);
        }
        Some(RoomDeparture {
            remaining: self.members(&room),
            departed: connection,
            room,
        })
    }

    /// Sorted consumers of `room`; empty for unknown rooms.
    #[must_use]
    pub fn members(&self, room: &RoomId) -> Vec<ConnectionId> {
        let mut members: Vec<ConnectionId> = self
            .consumers
            .get(room)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        members.sort_unstable();
        members
    }

    #[must_use]
    pub fn room_of(&self, connection: &ConnectionId) -> Option<&RoomId> {
        self.room_of.get(connection)
    }

    /// Number of rooms with at least one consumer.
    #[must_use]
    pub fn active_room_count(&self) -> usize {
        self.consumers.values().filter(|set| !set.is_empty()).count()
    }

    /// Every (connection, room) pair recorded in either direction agrees with
    /// the other direction.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let forward_ok = self.room_of.iter().all(|(conn, room)| {
            self.consumers
                .get(room)
                .is_some_and(|set| set.contains(conn))
        });
        let reverse_ok = self.consumers.iter().all(|(room, set)| {
            set.iter()
                .all(|conn| self.room_of.get(conn) == Some(room))
        });
        forward_ok && reverse_ok
    }

    pub(crate) fn occupied_connections(&self) -> impl Iterator<Item = &ConnectionId> {
        self.room_of.keys()
    }
}
