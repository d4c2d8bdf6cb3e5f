//! Real-time chat delivery: connections, rooms, fan-out, and the WebSocket
//! transport that drives them.

pub mod events;
pub mod fanout;
pub mod handler;
pub mod registry;
pub mod rooms;
pub mod server;
pub mod session;
