//! Gateway opcodes, event types, and wire-format messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_JOIN_ROOM: u8 = 4;
pub const OP_LEAVE_ROOM: u8 = 5;
pub const OP_HEARTBEAT_ACK: u8 = 6;
pub const OP_SEND_MESSAGE: u8 = 8;

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    pub d: Value,
}

impl GatewayMessage {
    /// Build a DISPATCH message (op=0).
    pub fn dispatch(event_name: &str, seq: u64, data: Value) -> Self {
        Self {
            op: OP_DISPATCH,
            t: Some(event_name.to_string()),
            s: Some(seq),
            d: data,
        }
    }

    /// Build a HEARTBEAT_ACK message (op=6).
    pub fn heartbeat_ack(seq: u64) -> Self {
        Self {
            op: OP_HEARTBEAT_ACK,
            t: None,
            s: None,
            d: serde_json::json!({ "ack": seq }),
        }
    }
}

/// An event queued for one connection's socket writer.
///
/// The router builds one per routed message and shares it between all members
/// through an `Arc`; the writer assigns the per-connection sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    pub event_name: &'static str,
    pub data: Value,
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A message received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub op: u8,
    #[serde(default)]
    pub t: Option<String>,
    #[serde(default)]
    pub d: Value,
}

#[derive(Debug, Deserialize)]
pub struct IdentifyPayload {
    pub ticket: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub seq: u64,
}

/// JOIN_ROOM / LEAVE_ROOM payload. The room ID is validated by the gateway,
/// not here, so an empty or missing ID still decodes.
#[derive(Debug, Deserialize)]
pub struct RoomPayload {
    #[serde(default)]
    pub room_id: String,
}

/// SEND_MESSAGE payload, exactly as the client sent it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendMessagePayload {
    #[serde(default)]
    pub room_id: String,
    /// Optional; filled from the connection's identity when omitted.
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

// ---------------------------------------------------------------------------
// Decoded client events
// ---------------------------------------------------------------------------

/// Room-level commands handled by the chat gateway.
#[derive(Debug)]
pub enum RoomCommand {
    Join(RoomPayload),
    Leave(RoomPayload),
    Send(SendMessagePayload),
}

/// A client message decoded by opcode.
#[derive(Debug)]
pub enum ClientEvent {
    Identify(IdentifyPayload),
    Heartbeat(HeartbeatPayload),
    Room(RoomCommand),
}

/// Why a client message could not be turned into a [`ClientEvent`].
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The opcode is not one a client may send. The connection is closed.
    UnknownOpcode(u8),
    /// The opcode is known but `d` has the wrong shape. The event is dropped.
    InvalidPayload(u8),
}

impl ClientEvent {
    pub fn decode(message: ClientMessage) -> Result<Self, DecodeError> {
        let op = message.op;
        let invalid = |_| DecodeError::InvalidPayload(op);
        match op {
            OP_IDENTIFY => serde_json::from_value(message.d)
                .map(ClientEvent::Identify)
                .map_err(invalid),
            // A heartbeat with a bad body is still a heartbeat.
            OP_HEARTBEAT => Ok(ClientEvent::Heartbeat(
                serde_json::from_value(message.d).unwrap_or_default(),
            )),
            OP_JOIN_ROOM => serde_json::from_value(message.d)
                .map(|p| ClientEvent::Room(RoomCommand::Join(p)))
                .map_err(invalid),
            OP_LEAVE_ROOM => serde_json::from_value(message.d)
                .map(|p| ClientEvent::Room(RoomCommand::Leave(p)))
                .map_err(invalid),
            OP_SEND_MESSAGE => serde_json::from_value(message.d)
                .map(|p| ClientEvent::Room(RoomCommand::Send(p)))
                .map_err(invalid),
            other => Err(DecodeError::UnknownOpcode(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch event types
// ---------------------------------------------------------------------------

/// Event names dispatched to clients.
pub struct EventName;

impl EventName {
    pub const READY: &'static str = "READY";
    pub const RECEIVE_MESSAGE: &'static str = "RECEIVE_MESSAGE";
}
