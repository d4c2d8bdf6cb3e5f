//! Message router: validates a message event and fans it out to every member
//! of the target room.
//!
//! Fan-out works on a snapshot of the room and pushes onto each member's
//! bounded outbound queue without waiting, so no lock is held while sockets
//! are written and a stalled client never blocks the others. A member whose
//! queue is full misses the message and shows up in the report. The sender's own connection is
//! part of the room and receives its message too; clients de-duplicate.

use std::sync::Arc;

use chat_common::snowflake::snowflake_timestamp_ms;
use chat_common::SnowflakeGenerator;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{DeliveryFailure, GatewayError};

use super::events::{EventName, OutboundEvent};
use super::registry::{ConnectionId, ConnectionRegistry};
use super::rooms::RoomId;

/// An inbound message event, prior to validation.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub room_id: String,
    pub sender_id: String,
    pub payload: Option<Value>,
}

/// The RECEIVE_MESSAGE body delivered to room members.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Snowflake ID, serialized as a string so JS clients keep full precision.
    #[serde(with = "snowflake_str")]
    pub id: i64,
    pub room_id: RoomId,
    pub sender_id: String,
    pub payload: Value,
    pub sent_at: DateTime<Utc>,
}

/// What happened to one routed message.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub message_id: i64,
    pub room_id: RoomId,
    /// One attempt per member in the room snapshot.
    pub attempted: usize,
    pub delivered: usize,
    pub failures: Vec<DeliveryFailure>,
}

pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    ids: SnowflakeGenerator,
}

impl MessageRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, ids: SnowflakeGenerator) -> Self {
        Self { registry, ids }
    }

    /// Validate `event` and deliver it to every current member of its room.
    ///
    /// Malformed events are rejected before anything is emitted. Members whose
    /// connection has closed or whose queue is full are recorded in the
    /// report's `failures` and do not stop delivery to the rest.
    pub fn route(&self, event: MessageEvent) -> Result<DeliveryReport, GatewayError> {
        let room_id = RoomId::parse(&event.room_id).map_err(|err| match err {
            GatewayError::MalformedRoom(reason) => GatewayError::MalformedMessage(reason),
            other => other,
        })?;
        if event.sender_id.trim().is_empty() {
            return Err(GatewayError::MalformedMessage("sender id is empty"));
        }
        let payload = match event.payload {
            Some(Value::Null) | None => {
                return Err(GatewayError::MalformedMessage("payload is missing"))
            }
            Some(payload) => payload,
        };

        let id = self.ids.generate();
        let message = ChatMessage {
            id,
            room_id: room_id.clone(),
            sender_id: event.sender_id,
            payload,
            sent_at: sent_at(id),
        };
        let data = serde_json::to_value(&message)
            .map_err(|_| GatewayError::MalformedMessage("payload is not serializable"))?;
        let outbound = Arc::new(OutboundEvent {
            event_name: EventName::RECEIVE_MESSAGE,
            data,
        });

        let members = self.registry.rooms().members_of(&room_id);
        Ok(self.fan_out(id, room_id, members, outbound))
    }

    /// Push `outbound` to each connection in `members`, a snapshot taken by
    /// the caller. Members may have gone away since.
    fn fan_out(
        &self,
        message_id: i64,
        room_id: RoomId,
        members: Vec<ConnectionId>,
        outbound: Arc<OutboundEvent>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport {
            message_id,
            room_id,
            attempted: members.len(),
            delivered: 0,
            failures: Vec::new(),
        };

        for connection_id in members {
            let sent = match self.registry.sender_of(&connection_id) {
                Some(sender) => sender.try_send(outbound.clone()).map_err(|err| match err {
                    TrySendError::Full(_) => "outbound queue full",
                    TrySendError::Closed(_) => "connection closed",
                }),
                None => Err("connection unregistered"),
            };
            match sent {
                Ok(()) => report.delivered += 1,
                Err(reason) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        room_id = %report.room_id,
                        reason,
                        "message delivery failed"
                    );
                    report.failures.push(DeliveryFailure {
                        connection_id,
                        room_id: report.room_id.clone(),
                        reason,
                    });
                }
            }
        }

        report
    }
}

/// Arrival time as encoded in the message ID.
fn sent_at(id: i64) -> DateTime<Utc> {
    i64::try_from(snowflake_timestamp_ms(id))
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

mod snowflake_str {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(id: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::registry::{Connection, ConnectionId, OUTBOUND_CAPACITY};
    use crate::gateway::rooms::RoomDirectory;
    use serde_json::json;
    use tokio::sync::mpsc;

    type Inbox = mpsc::Receiver<Arc<OutboundEvent>>;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        router: MessageRouter,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(ConnectionRegistry::new(Arc::new(RoomDirectory::new())));
            let router = MessageRouter::new(registry.clone(), SnowflakeGenerator::new(0));
            Self { registry, router }
        }

        fn join(&self, id: &str, room: &str) -> (ConnectionId, Inbox) {
            let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
            let id = ConnectionId::from(id);
            self.registry
                .register(Connection::new(id.clone(), Some(id.to_string()), tx))
                .unwrap();
            self.registry
                .join_room(&id, &RoomId::parse(room).unwrap())
                .unwrap();
            (id, rx)
        }
    }

    fn message(room: &str, sender: &str, payload: Value) -> MessageEvent {
        MessageEvent {
            room_id: room.to_string(),
            sender_id: sender.to_string(),
            payload: Some(payload),
        }
    }

    #[test]
    fn sender_receives_its_own_message() {
        let fx = Fixture::new();
        let (_a, mut inbox_a) = fx.join("A", "room-42");
        let (_b, mut inbox_b) = fx.join("B", "room-42");

        let report = fx.router.route(message("room-42", "A", json!("hi"))).unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 2);

        for inbox in [&mut inbox_a, &mut inbox_b] {
            let event = inbox.try_recv().unwrap();
            assert_eq!(event.event_name, EventName::RECEIVE_MESSAGE);
            assert_eq!(event.data["payload"], "hi");
            assert_eq!(event.data["sender_id"], "A");
            assert_eq!(event.data["room_id"], "room-42");
            assert_eq!(event.data["id"], report.message_id.to_string());
        }
    }

    #[test]
    fn one_attempt_per_member() {
        let fx = Fixture::new();
        let inboxes: Vec<_> = (0..5).map(|i| fx.join(&format!("c{i}"), "r")).collect();
        let (_outsider, mut outsider_inbox) = fx.join("x", "elsewhere");

        let report = fx.router.route(message("r", "c0", json!({"text": "yo"}))).unwrap();

        assert_eq!(report.attempted, 5);
        assert_eq!(report.delivered, 5);
        assert!(report.failures.is_empty());
        for (_, mut inbox) in inboxes {
            assert!(inbox.try_recv().is_ok());
            assert!(inbox.try_recv().is_err());
        }
        assert!(outsider_inbox.try_recv().is_err());
    }

    #[test]
    fn closed_member_does_not_stop_fan_out() {
        let fx = Fixture::new();
        let (_a, mut inbox_a) = fx.join("a", "r");
        let (b, inbox_b) = fx.join("b", "r");
        let (_c, mut inbox_c) = fx.join("c", "r");
        drop(inbox_b);

        let report = fx.router.route(message("r", "a", json!("x"))).unwrap();

        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].connection_id, b);
        assert_eq!(report.failures[0].reason, "connection closed");
        assert!(inbox_a.try_recv().is_ok());
        assert!(inbox_c.try_recv().is_ok());
    }

    #[test]
    fn stalled_member_fails_once_its_queue_is_full() {
        let fx = Fixture::new();
        let (_reader, mut inbox_reader) = fx.join("reader", "r");
        let (stalled, _inbox_stalled) = fx.join("stalled", "r");

        let mut full = Vec::new();
        for n in 0..OUTBOUND_CAPACITY + 10 {
            let report = fx.router.route(message("r", "reader", json!(n))).unwrap();
            assert_eq!(report.attempted, 2);
            assert!(inbox_reader.try_recv().is_ok());
            full.extend(report.failures);
        }

        assert_eq!(full.len(), 10);
        assert!(full
            .iter()
            .all(|f| f.connection_id == stalled && f.reason == "outbound queue full"));
        assert!(fx.registry.contains(&stalled));
    }

    #[test]
    fn member_unregistered_after_snapshot_is_reported() {
        let fx = Fixture::new();
        let (_a, mut inbox_a) = fx.join("a", "r");
        let (b, _inbox_b) = fx.join("b", "r");
        let room_id = RoomId::parse("r").unwrap();

        let members = fx.registry.rooms().members_of(&room_id);
        fx.registry.unregister(&b);
        let outbound = Arc::new(OutboundEvent {
            event_name: EventName::RECEIVE_MESSAGE,
            data: json!({ "payload": "late" }),
        });
        let report = fx.router.fan_out(1, room_id, members, outbound);

        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].connection_id, b);
        assert_eq!(report.failures[0].reason, "connection unregistered");
        assert_eq!(inbox_a.try_recv().unwrap().data["payload"], "late");
    }

    #[test]
    fn sent_at_matches_message_id() {
        let fx = Fixture::new();
        let (_a, mut inbox) = fx.join("a", "r");

        let report = fx.router.route(message("r", "a", json!("t"))).unwrap();
        let event = inbox.try_recv().unwrap();
        let sent_at: DateTime<Utc> = event.data["sent_at"].as_str().unwrap().parse().unwrap();

        assert_eq!(
            sent_at.timestamp_millis() as u64,
            snowflake_timestamp_ms(report.message_id)
        );
    }

    #[test]
    fn malformed_events_emit_nothing() {
        let fx = Fixture::new();
        let (_a, mut inbox) = fx.join("a", "r");

        let empty_room = fx.router.route(message("", "a", json!("x"))).unwrap_err();
        assert_eq!(empty_room, GatewayError::MalformedMessage("room id is empty"));

        let no_payload = fx
            .router
            .route(MessageEvent {
                room_id: "r".into(),
                sender_id: "a".into(),
                payload: None,
            })
            .unwrap_err();
        assert_eq!(no_payload, GatewayError::MalformedMessage("payload is missing"));

        let null_payload = fx.router.route(message("r", "a", Value::Null)).unwrap_err();
        assert!(matches!(null_payload, GatewayError::MalformedMessage(_)));

        let no_sender = fx.router.route(message("r", " ", json!("x"))).unwrap_err();
        assert!(matches!(no_sender, GatewayError::MalformedMessage(_)));

        assert!(inbox.try_recv().is_err());
    }

    #[test]
    fn same_sender_order_is_preserved() {
        let fx = Fixture::new();
        let (_a, mut inbox_a) = fx.join("a", "r");
        let (_b, mut inbox_b) = fx.join("b", "r");

        for n in 0..20 {
            fx.router.route(message("r", "a", json!(n))).unwrap();
        }

        for inbox in [&mut inbox_a, &mut inbox_b] {
            let received: Vec<i64> = std::iter::from_fn(|| inbox.try_recv().ok())
                .map(|e| e.data["payload"].as_i64().unwrap())
                .collect();
            assert_eq!(received, (0..20).collect::<Vec<_>>());
        }
    }

    #[test]
    fn empty_room_routes_to_nobody() {
        let fx = Fixture::new();
        let report = fx.router.route(message("quiet", "a", json!("x"))).unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(report.delivered, 0);
    }
}
