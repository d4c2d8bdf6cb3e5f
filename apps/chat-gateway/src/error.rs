use thiserror::Error;

use crate::gateway::registry::ConnectionId;
use crate::gateway::rooms::RoomId;

/// Failures raised by the connection registry, room directory and router.
///
/// None of these ever tear down shared gateway state; they are handled at
/// the boundary where they occur and at most close the offending socket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The transport handed out a connection ID that is already registered.
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    /// An inbound message event failed validation and was dropped.
    #[error("malformed message: {0}")]
    MalformedMessage(&'static str),

    /// A join or leave named an unusable room identifier.
    #[error("malformed room identifier: {0}")]
    MalformedRoom(&'static str),

    /// The connection is not (or no longer) registered.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

/// A single member that could not be reached during fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("delivery to {connection_id} in {room_id} failed: {reason}")]
pub struct DeliveryFailure {
    pub connection_id: ConnectionId,
    pub room_id: RoomId,
    pub reason: &'static str,
}

/// Errors from the key-value store backing WebSocket tickets.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("corrupt value stored under {key}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode value for {key}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
