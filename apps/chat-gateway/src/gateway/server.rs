//! WebSocket upgrade handler and per-connection event loop.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time;

use crate::AppState;

use super::events::{
    ClientEvent, ClientMessage, DecodeError, EventName, GatewayMessage, IdentifyPayload,
    OutboundEvent,
};
use super::registry::{Connection, ConnectionId, OUTBOUND_CAPACITY};
use super::session::GatewaySession;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;
type OutboundReceiver = mpsc::Receiver<std::sync::Arc<OutboundEvent>>;

/// Close codes (4000-range for application-level).
const CLOSE_UNKNOWN_ERROR: u16 = 4000;
const CLOSE_UNKNOWN_OPCODE: u16 = 4001;
const CLOSE_NOT_AUTHENTICATED: u16 = 4003;
const CLOSE_AUTH_FAILED: u16 = 4004;
const CLOSE_ALREADY_AUTHENTICATED: u16 = 4005;
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let mut session = GatewaySession::new(ConnectionId::generate());
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Step 1: Wait for IDENTIFY within timeout.
    let identify_timeout = Duration::from_secs(state.config.identify_timeout_secs);
    let payload = match time::timeout(identify_timeout, wait_for_identify(&mut ws_rx)).await {
        Ok(Ok(payload)) => payload,
        Ok(Err((code, reason))) => {
            tracing::debug!(connection_id = %session.connection_id, %reason, "handshake failed");
            let _ = send_close(&mut ws_tx, code, reason).await;
            return;
        }
        Err(_timeout) => {
            let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Handshake timeout").await;
            return;
        }
    };

    // Step 2: Authenticate before the connection is admitted.
    let identity = match state.authenticator.authenticate(&payload.ticket).await {
        Ok(identity) => identity,
        Err(reason) => {
            tracing::debug!(connection_id = %session.connection_id, %reason, "identify rejected");
            let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, reason).await;
            return;
        }
    };

    // Step 3: Register with the gateway.
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let connection = Connection::new(
        session.connection_id.clone(),
        Some(identity.user_id.clone()),
        outbound_tx,
    );
    if state.gateway.on_connect(connection).is_err() {
        let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Connection rejected").await;
        return;
    }
    session.mark_connected(identity.user_id);

    // Step 4: READY, then the main loop.
    let ready = GatewayMessage::dispatch(
        EventName::READY,
        session.next_seq(),
        serde_json::json!({
            "connection_id": session.connection_id,
            "user_id": session.user_id,
            "heartbeat_interval": state.config.heartbeat_interval_ms,
        }),
    );
    let write_limit = heartbeat_deadline(state.config.heartbeat_interval_ms);
    if send_within(&mut ws_tx, &ready, write_limit).await {
        run_session(&state, &mut session, ws_tx, ws_rx, outbound_rx).await;
    }

    if session.mark_disconnected() {
        state.gateway.on_disconnect(&session.connection_id);
    }

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = session.user_id.as_deref().unwrap_or("-"),
        "gateway session ended"
    );
}

/// Read frames until the client sends IDENTIFY. Any other opcode, invalid
/// JSON, or a closed socket fails the handshake with a close code and reason.
async fn wait_for_identify(
    ws_rx: &mut WsStream,
) -> Result<IdentifyPayload, (u16, &'static str)> {
    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) => return Err((CLOSE_UNKNOWN_ERROR, "Client closed")),
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(?e, "ws read error during identify");
                return Err((CLOSE_UNKNOWN_ERROR, "Read error"));
            }
        };

        let client_msg: ClientMessage = serde_json::from_str(&text)
            .map_err(|_| (CLOSE_UNKNOWN_ERROR, "Invalid JSON"))?;

        return match ClientEvent::decode(client_msg) {
            Ok(ClientEvent::Identify(payload)) => Ok(payload),
            Err(DecodeError::InvalidPayload(_)) => {
                Err((CLOSE_AUTH_FAILED, "Invalid identify payload"))
            }
            Ok(_) | Err(DecodeError::UnknownOpcode(_)) => {
                Err((CLOSE_NOT_AUTHENTICATED, "Expected IDENTIFY"))
            }
        };
    }
    Err((CLOSE_UNKNOWN_ERROR, "Connection closed before identify"))
}

/// Main session event loop: read client events, forward queued dispatches,
/// enforce heartbeat. Writes share the heartbeat deadline, so a client that
/// stops reading is dropped as surely as one that stops heartbeating.
async fn run_session(
    state: &AppState,
    session: &mut GatewaySession,
    mut ws_tx: WsSink,
    mut ws_rx: WsStream,
    mut outbound_rx: OutboundReceiver,
) {
    let deadline = heartbeat_deadline(state.config.heartbeat_interval_ms);
    let mut heartbeat_timer = time::interval(deadline);
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_heartbeat = true;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %session.connection_id, "ws read error");
                        break;
                    }
                    Some(Ok(_)) => continue,
                };

                let client_msg: ClientMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(_) => {
                        let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid JSON").await;
                        break;
                    }
                };

                match ClientEvent::decode(client_msg) {
                    Ok(ClientEvent::Heartbeat(payload)) => {
                        got_heartbeat = true;
                        let ack = GatewayMessage::heartbeat_ack(payload.seq);
                        if !send_within(&mut ws_tx, &ack, deadline).await {
                            break;
                        }
                    }
                    Ok(ClientEvent::Room(command)) => {
                        state.gateway.handle_command(&session.connection_id, command);
                    }
                    Ok(ClientEvent::Identify(_)) => {
                        let _ = send_close(&mut ws_tx, CLOSE_ALREADY_AUTHENTICATED, "Already identified").await;
                        break;
                    }
                    Err(DecodeError::InvalidPayload(op)) => {
                        tracing::debug!(connection_id = %session.connection_id, op, "dropping malformed event");
                    }
                    Err(DecodeError::UnknownOpcode(_)) => {
                        let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_OPCODE, "Unknown opcode").await;
                        break;
                    }
                }
            }

            // Fan-out from the router.
            queued = outbound_rx.recv() => {
                let Some(event) = queued else {
                    // Unregistered elsewhere; nothing more will arrive.
                    break;
                };
                let msg = GatewayMessage::dispatch(event.event_name, session.next_seq(), event.data.clone());
                if !send_within(&mut ws_tx, &msg, deadline).await {
                    tracing::debug!(connection_id = %session.connection_id, "dispatch write failed or stalled");
                    break;
                }
            }

            _ = heartbeat_timer.tick() => {
                if !got_heartbeat {
                    tracing::debug!(
                        connection_id = %session.connection_id,
                        "heartbeat timeout, closing connection"
                    );
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    break;
                }
                got_heartbeat = false;
            }
        }
    }
}

/// Client must heartbeat within 1.5× the advertised interval.
fn heartbeat_deadline(interval_ms: u64) -> Duration {
    Duration::from_millis(interval_ms.saturating_mul(3) / 2)
}

/// Write `msg`, giving up if the socket does not accept it within `limit`.
async fn send_within(ws_tx: &mut WsSink, msg: &GatewayMessage, limit: Duration) -> bool {
    matches!(time::timeout(limit, send_message(ws_tx, msg)).await, Ok(Ok(())))
}

async fn send_message(ws_tx: &mut WsSink, msg: &GatewayMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    ws_tx.send(Message::Text(json.into())).await
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
