//! Room directory: conversation ID → connections currently subscribed.

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::GatewayError;

use super::registry::ConnectionId;

/// Longest accepted room identifier, in bytes.
pub const MAX_ROOM_ID_LEN: usize = 128;

/// A validated conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Validate a client-supplied room identifier.
    ///
    /// Surrounding whitespace is ignored; the rest must be non-empty, at most
    /// [`MAX_ROOM_ID_LEN`] bytes and free of control characters.
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(GatewayError::MalformedRoom("room id is empty"));
        }
        if trimmed.len() > MAX_ROOM_ID_LEN {
            return Err(GatewayError::MalformedRoom("room id is too long"));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(GatewayError::MalformedRoom("room id contains control characters"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shared map of rooms to their member connections.
///
/// One `RwLock` guards the whole map: membership reads run concurrently,
/// mutations are exclusive. Mutations are crate-private because the
/// [`ConnectionRegistry`](super::registry::ConnectionRegistry) must update its
/// own per-connection room set in the same step.
pub struct RoomDirectory {
    rooms: RwLock<HashMap<RoomId, HashSet<ConnectionId>>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection to a room, creating the room on first join.
    /// Returns `false` if it was already a member.
    pub(crate) fn join(&self, room_id: &RoomId, connection_id: &ConnectionId) -> bool {
        self.rooms
            .write()
            .entry(room_id.clone())
            .or_default()
            .insert(connection_id.clone())
    }

    /// Remove a connection from a room, dropping the room once it is empty.
    /// Returns `false` if it was not a member.
    pub(crate) fn leave(&self, room_id: &RoomId, connection_id: &ConnectionId) -> bool {
        let mut rooms = self.rooms.write();
        let Some(members) = rooms.get_mut(room_id) else {
            return false;
        };
        let removed = members.remove(connection_id);
        if members.is_empty() {
            rooms.remove(room_id);
        }
        removed
    }

    /// Snapshot of the room's members. Later joins and leaves do not affect
    /// the returned list.
    pub fn members_of(&self, room_id: &RoomId) -> Vec<ConnectionId> {
        self.rooms
            .read()
            .get(room_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, room_id: &RoomId, connection_id: &ConnectionId) -> bool {
        self.rooms
            .read()
            .get(room_id)
            .is_some_and(|members| members.contains(connection_id))
    }

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new()
    }
}
