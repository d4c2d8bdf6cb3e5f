//! Connection registry: every live connection, its identity, outbound queue
//! and the rooms it has joined.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chat_common::id::{prefix, PrefixedId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::GatewayError;

use super::events::OutboundEvent;
use super::rooms::{RoomDirectory, RoomId};

/// Transport-assigned identifier of one live connection (`conn_` ULID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(<Self as PrefixedId>::generate())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PrefixedId for ConnectionId {
    const PREFIX: &'static str = prefix::CONNECTION;
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dispatches a connection may have queued but not yet written. Past this the
/// member is treated as stalled and further messages to it fail.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Sending half of a connection's outbound queue. The socket writer task owns
/// the receiver; once it is gone every send fails.
pub type OutboundSender = mpsc::Sender<Arc<OutboundEvent>>;

/// A newly accepted connection, handed to the registry on admission.
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: Option<String>,
    pub outbound: OutboundSender,
}

impl Connection {
    pub fn new(id: ConnectionId, user_id: Option<String>, outbound: OutboundSender) -> Self {
        Self {
            id,
            user_id,
            outbound,
        }
    }
}

struct ConnectionEntry {
    user_id: Option<String>,
    rooms: HashSet<RoomId>,
    outbound: OutboundSender,
}

/// Shared registry of live connections.
///
/// `DashMap` gives per-connection exclusion. Room membership is only changed
/// through [`join_room`](Self::join_room), [`leave_room`](Self::leave_room)
/// and [`unregister`](Self::unregister), which update the connection's room set
/// and the [`RoomDirectory`] together.
///
/// Lock order: registry entry, then directory. Nothing takes them the other
/// way round.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    rooms: Arc<RoomDirectory>,
}

impl ConnectionRegistry {
    pub fn new(rooms: Arc<RoomDirectory>) -> Self {
        Self {
            connections: DashMap::new(),
            rooms,
        }
    }

    pub fn rooms(&self) -> &RoomDirectory {
        &self.rooms
    }

    /// Register a newly admitted connection.
    pub fn register(&self, connection: Connection) -> Result<(), GatewayError> {
        match self.connections.entry(connection.id.clone()) {
            Entry::Occupied(_) => Err(GatewayError::DuplicateConnection(connection.id)),
            Entry::Vacant(slot) => {
                slot.insert(ConnectionEntry {
                    user_id: connection.user_id,
                    rooms: HashSet::new(),
                    outbound: connection.outbound,
                });
                Ok(())
            }
        }
    }

    /// Remove a connection and take it out of every room it had joined.
    ///
    /// Returns the rooms it left; unknown IDs are a no-op. The entry stays
    /// locked until the directory no longer lists it, so no reader sees the
    /// connection gone from one view but not the other.
    pub fn unregister(&self, connection_id: &ConnectionId) -> HashSet<RoomId> {
        let Entry::Occupied(slot) = self.connections.entry(connection_id.clone()) else {
            return HashSet::new();
        };
        for room_id in &slot.get().rooms {
            self.rooms.leave(room_id, connection_id);
        }
        slot.remove().rooms
    }

    /// Join a room. Returns `false` if the connection was already a member.
    pub fn join_room(
        &self,
        connection_id: &ConnectionId,
        room_id: &RoomId,
    ) -> Result<bool, GatewayError> {
        let mut entry = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| GatewayError::UnknownConnection(connection_id.clone()))?;
        let inserted = entry.rooms.insert(room_id.clone());
        self.rooms.join(room_id, connection_id);
        Ok(inserted)
    }

    /// Leave a room. Returns `false` if the connection was not a member.
    pub fn leave_room(
        &self,
        connection_id: &ConnectionId,
        room_id: &RoomId,
    ) -> Result<bool, GatewayError> {
        let mut entry = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| GatewayError::UnknownConnection(connection_id.clone()))?;
        let removed = entry.rooms.remove(room_id);
        self.rooms.leave(room_id, connection_id);
        Ok(removed)
    }

    /// Rooms the connection has joined; empty if it is unknown.
    pub fn rooms_of(&self, connection_id: &ConnectionId) -> HashSet<RoomId> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.rooms.clone())
            .unwrap_or_default()
    }

    /// Authenticated user behind a connection, if it was admitted with one.
    pub fn user_of(&self, connection_id: &ConnectionId) -> Result<Option<String>, GatewayError> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.user_id.clone())
            .ok_or_else(|| GatewayError::UnknownConnection(connection_id.clone()))
    }

    /// Clone of the connection's outbound sender, if it is still registered.
    pub fn sender_of(&self, connection_id: &ConnectionId) -> Option<OutboundSender> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.outbound.clone())
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
