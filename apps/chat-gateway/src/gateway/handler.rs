//! Chat gateway: connection lifecycle hooks and room command dispatch.

use std::sync::Arc;

use chat_common::SnowflakeGenerator;

use crate::error::GatewayError;

use super::events::{RoomCommand, SendMessagePayload};
use super::fanout::{DeliveryReport, MessageEvent, MessageRouter};
use super::registry::{Connection, ConnectionId, ConnectionRegistry};
use super::rooms::{RoomDirectory, RoomId};

/// Owns the registry and router and exposes the hooks the transport calls.
///
/// Every hook handles its own errors: bad input is logged and dropped, and
/// nothing here can leave the registry and directory out of step.
pub struct ChatGateway {
    registry: Arc<ConnectionRegistry>,
    router: MessageRouter,
}

impl ChatGateway {
    pub fn new(registry: Arc<ConnectionRegistry>, router: MessageRouter) -> Self {
        Self { registry, router }
    }

    /// Build a gateway with an empty directory and a message ID generator for
    /// `worker_id`.
    pub fn with_worker_id(worker_id: u16) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(RoomDirectory::new())));
        let router = MessageRouter::new(registry.clone(), SnowflakeGenerator::new(worker_id));
        Self::new(registry, router)
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Admit an authenticated connection.
    pub fn on_connect(&self, connection: Connection) -> Result<ConnectionId, GatewayError> {
        let connection_id = connection.id.clone();
        let user_id = connection.user_id.clone();
        if let Err(err) = self.registry.register(connection) {
            tracing::error!(%err, connection_id = %connection_id, "rejecting connection");
            return Err(err);
        }
        tracing::info!(
            connection_id = %connection_id,
            user_id = user_id.as_deref().unwrap_or("-"),
            "connection registered"
        );
        Ok(connection_id)
    }

    /// Join a room. Malformed room IDs and unknown connections are logged and
    /// ignored.
    pub fn on_join(&self, connection_id: &ConnectionId, room_id: &str) {
        let result = RoomId::parse(room_id)
            .and_then(|room| self.registry.join_room(connection_id, &room).map(|_| room));
        match result {
            Ok(room) => tracing::debug!(connection_id = %connection_id, room_id = %room, "joined room"),
            Err(err) => tracing::debug!(%err, connection_id = %connection_id, "join ignored"),
        }
    }

    /// Leave a room. Same error policy as [`on_join`](Self::on_join).
    pub fn on_leave(&self, connection_id: &ConnectionId, room_id: &str) {
        let result = RoomId::parse(room_id)
            .and_then(|room| self.registry.leave_room(connection_id, &room).map(|_| room));
        match result {
            Ok(room) => tracing::debug!(connection_id = %connection_id, room_id = %room, "left room"),
            Err(err) => tracing::debug!(%err, connection_id = %connection_id, "leave ignored"),
        }
    }

    /// Route a message from `connection_id`.
    ///
    /// The sender is the connection's authenticated user. A client-supplied
    /// `sender_id` is only accepted when it matches, or when the connection
    /// was admitted without an identity.
    pub fn on_message(
        &self,
        connection_id: &ConnectionId,
        message: SendMessagePayload,
    ) -> Result<DeliveryReport, GatewayError> {
        let result = self
            .resolve_sender(connection_id, message.sender_id)
            .and_then(|sender_id| {
                self.router.route(MessageEvent {
                    room_id: message.room_id,
                    sender_id,
                    payload: message.payload,
                })
            });

        match &result {
            Ok(report) => tracing::debug!(
                connection_id = %connection_id,
                room_id = %report.room_id,
                delivered = report.delivered,
                failed = report.failures.len(),
                "message routed"
            ),
            Err(err) => tracing::debug!(%err, connection_id = %connection_id, "message dropped"),
        }
        result
    }

    /// Tear down a connection. Safe to call more than once.
    pub fn on_disconnect(&self, connection_id: &ConnectionId) {
        if !self.registry.contains(connection_id) {
            return;
        }
        let rooms = self.registry.unregister(connection_id);
        tracing::info!(
            connection_id = %connection_id,
            rooms = rooms.len(),
            "connection unregistered"
        );
    }

    /// Dispatch a decoded room command to its hook.
    pub fn handle_command(&self, connection_id: &ConnectionId, command: RoomCommand) {
        match command {
            RoomCommand::Join(p) => self.on_join(connection_id, &p.room_id),
            RoomCommand::Leave(p) => self.on_leave(connection_id, &p.room_id),
            RoomCommand::Send(p) => {
                // Fire-and-forget: the outcome is already logged.
                let _ = self.on_message(connection_id, p);
            }
        }
    }

    fn resolve_sender(
        &self,
        connection_id: &ConnectionId,
        claimed: Option<String>,
    ) -> Result<String, GatewayError> {
        match (self.registry.user_of(connection_id)?, claimed) {
            (Some(user_id), None) => Ok(user_id),
            (Some(user_id), Some(claimed)) if claimed == user_id => Ok(user_id),
            (Some(_), Some(_)) => Err(GatewayError::MalformedMessage(
                "sender id does not match connection",
            )),
            (None, Some(claimed)) => Ok(claimed),
            (None, None) => Err(GatewayError::MalformedMessage("sender id is empty")),
        }
    }
}
