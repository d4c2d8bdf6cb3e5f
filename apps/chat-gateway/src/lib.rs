pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod routes;

use std::sync::Arc;

use auth::identity::{ConnectionAuthenticator, TicketAuthenticator};
use config::Config;
use db::kv::{KeyValueStore, MemoryStore};
use gateway::handler::ChatGateway;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub kv: Arc<dyn KeyValueStore>,
    pub config: Arc<Config>,
    pub gateway: Arc<ChatGateway>,
    pub authenticator: Arc<dyn ConnectionAuthenticator>,
}

impl AppState {
    /// Single-node state: in-memory ticket store and a fresh gateway.
    pub fn new(config: Config) -> Self {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let authenticator = Arc::new(TicketAuthenticator::new(kv.clone()));
        let gateway = Arc::new(ChatGateway::with_worker_id(config.worker_id));
        Self {
            kv,
            config: Arc::new(config),
            gateway,
            authenticator,
        }
    }
}
