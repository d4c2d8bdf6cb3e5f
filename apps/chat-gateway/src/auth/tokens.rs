//! Single-use WebSocket tickets.
//!
//! The auth layer (outside this service) verifies credentials and calls
//! [`issue_ws_ticket`]; the gateway redeems the ticket on IDENTIFY.

use serde::{Deserialize, Serialize};

use crate::db::kv::KeyValueStore;
use crate::error::StoreError;

/// Generate an opaque random token with the given prefix.
pub fn generate_opaque_token(prefix: &str, bytes: usize) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use rand::Rng;
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(&mut buf[..]);
    format!("{}_{}", prefix, URL_SAFE_NO_PAD.encode(&buf))
}

/// WS ticket TTL in seconds.
pub const WS_TICKET_TTL_SECS: u64 = 30;

/// Data stored alongside a WS ticket.
#[derive(Debug, Serialize, Deserialize)]
pub struct WsTicketData {
    pub user_id: String,
}

fn ticket_key(ticket: &str) -> String {
    format!("chat:wst:{ticket}")
}

pub fn generate_ws_ticket() -> String {
    generate_opaque_token(chat_common::id::prefix::TICKET, 32)
}

pub async fn store_ws_ticket(
    kv: &dyn KeyValueStore,
    ticket: &str,
    data: &WsTicketData,
) -> Result<(), StoreError> {
    let key = ticket_key(ticket);
    let value = serde_json::to_string(data).map_err(|source| StoreError::Encode {
        key: key.clone(),
        source,
    })?;
    kv.set_ex(&key, &value, WS_TICKET_TTL_SECS).await
}

/// Generate and store a fresh ticket for `user_id`, returning the ticket.
pub async fn issue_ws_ticket(kv: &dyn KeyValueStore, user_id: &str) -> Result<String, StoreError> {
    let ticket = generate_ws_ticket();
    store_ws_ticket(
        kv,
        &ticket,
        &WsTicketData {
            user_id: user_id.to_string(),
        },
    )
    .await?;
    Ok(ticket)
}

/// Redeem a ticket. Returns `None` if it never existed, expired, or was
/// already used.
pub async fn consume_ws_ticket(
    kv: &dyn KeyValueStore,
    ticket: &str,
) -> Result<Option<WsTicketData>, StoreError> {
    let key = ticket_key(ticket);
    match kv.take(&key).await? {
        Some(v) => {
            let data: WsTicketData =
                serde_json::from_str(&v).map_err(|source| StoreError::Corrupt { key, source })?;
            Ok(Some(data))
        }
        None => Ok(None),
    }
}
