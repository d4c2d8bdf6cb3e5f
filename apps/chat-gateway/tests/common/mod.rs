#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};

use chat_gateway::auth::tokens;
use chat_gateway::config::Config;
use chat_gateway::gateway::registry::ConnectionId;
use chat_gateway::gateway::rooms::RoomId;
use chat_gateway::AppState;

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build an `AppState` with test-friendly timings.
pub fn test_state() -> AppState {
    AppState::new(Config {
        heartbeat_interval_ms: 5_000,
        identify_timeout_secs: 2,
        ..Config::default()
    })
}

/// Start an actual TCP server for WebSocket testing.
/// The server runs in the background.
pub async fn start_ws_server(state: AppState) -> SocketAddr {
    let app = chat_gateway::routes::app(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// Open a raw socket without identifying.
pub async fn connect(addr: SocketAddr) -> Ws {
    let url = format!("ws://{addr}/gateway");
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    ws
}

pub async fn send_json(ws: &mut Ws, value: serde_json::Value) {
    ws.send(tungstenite::Message::Text(value.to_string().into()))
        .await
        .expect("send");
}

/// Read the next frame, failing the test after five seconds.
pub async fn next_frame(ws: &mut Ws) -> tungstenite::Message {
    time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timeout waiting for frame")
        .expect("stream ended")
        .expect("ws read error")
}

pub async fn next_json(ws: &mut Ws) -> serde_json::Value {
    let text = next_frame(ws).await.into_text().expect("not text");
    serde_json::from_str(&text).expect("parse frame")
}

/// Assert the next frame is a close frame with `code`.
pub async fn expect_close(ws: &mut Ws, code: u16) {
    match next_frame(ws).await {
        tungstenite::Message::Close(Some(frame)) => {
            assert_eq!(
                frame.code,
                tungstenite::protocol::frame::coding::CloseCode::from(code)
            );
        }
        other => panic!("Expected Close frame, got: {other:?}"),
    }
}

/// Issue a ticket for `user_id`, connect, IDENTIFY and read READY.
/// Returns the socket and the connection ID from READY.
pub async fn connect_and_identify(addr: SocketAddr, state: &AppState, user_id: &str) -> (Ws, ConnectionId) {
    let ticket = tokens::issue_ws_ticket(state.kv.as_ref(), user_id)
        .await
        .expect("issue ticket");
    let mut ws = connect(addr).await;

    send_json(&mut ws, serde_json::json!({ "op": 2, "d": { "ticket": ticket } })).await;

    let ready = next_json(&mut ws).await;
    assert_eq!(ready["op"], 0, "READY should be op=0 (DISPATCH)");
    assert_eq!(ready["t"], "READY");
    assert_eq!(ready["s"], 1);
    assert_eq!(ready["d"]["user_id"], user_id);

    let connection_id = ready["d"]["connection_id"]
        .as_str()
        .expect("connection_id present")
        .to_string();
    (ws, ConnectionId::from(connection_id))
}

pub async fn join(ws: &mut Ws, room_id: &str) {
    send_json(ws, serde_json::json!({ "op": 4, "d": { "room_id": room_id } })).await;
}

/// Joins carry no acknowledgement, so wait until the registry reflects them.
pub async fn wait_for_members(state: &AppState, room_id: &str, expected: &[&ConnectionId]) {
    let room = RoomId::parse(room_id).unwrap();
    let deadline = time::Instant::now() + Duration::from_secs(5);
    loop {
        let members = state.gateway.registry().rooms().members_of(&room);
        if members.len() == expected.len() && expected.iter().all(|id| members.contains(id)) {
            return;
        }
        assert!(
            time::Instant::now() < deadline,
            "room {room_id} never reached expected membership: {members:?}"
        );
        time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the gateway has forgotten a connection.
pub async fn wait_for_unregistered(state: &AppState, connection_id: &ConnectionId) {
    let deadline = time::Instant::now() + Duration::from_secs(5);
    while state.gateway.registry().contains(connection_id) {
        assert!(
            time::Instant::now() < deadline,
            "{connection_id} still registered"
        );
        time::sleep(Duration::from_millis(10)).await;
    }
}

/// Assert no frame arrives within `window`.
pub async fn expect_silence(ws: &mut Ws, window: Duration) {
    if let Ok(frame) = time::timeout(window, ws.next()).await {
        panic!("expected no frame, got: {frame:?}");
    }
}
