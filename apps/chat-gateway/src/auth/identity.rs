//! Admission check run before a socket becomes a registered connection.

use std::sync::Arc;

use async_trait::async_trait;

use crate::db::kv::KeyValueStore;

use super::tokens;

/// A verified identity attached to a connection at admission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
}

/// Verifies the credential a client presents in IDENTIFY.
///
/// Rejections carry a short reason that is echoed in the close frame.
#[async_trait]
pub trait ConnectionAuthenticator: Send + Sync {
    async fn authenticate(&self, credential: &str) -> Result<Identity, &'static str>;
}

/// Admits connections that present a valid, unused WebSocket ticket.
pub struct TicketAuthenticator {
    kv: Arc<dyn KeyValueStore>,
}

impl TicketAuthenticator {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl ConnectionAuthenticator for TicketAuthenticator {
    async fn authenticate(&self, credential: &str) -> Result<Identity, &'static str> {
        let data = tokens::consume_ws_ticket(self.kv.as_ref(), credential)
            .await
            .map_err(|err| {
                tracing::error!(%err, "ticket lookup failed");
                "Ticket lookup failed"
            })?
            .ok_or("Invalid or expired ticket")?;

        Ok(Identity {
            user_id: data.user_id,
        })
    }
}
