use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StoreError;

/// Abstraction over a key-value store used for short-lived gateway tickets.
///
/// The auth layer writes tickets here; the gateway consumes them on IDENTIFY.
/// An in-memory map backs the single-node deployment and the tests.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Read and delete a key in one step.
    ///
    /// The default is get-then-del; stores with an atomic primitive should
    /// override it so a single-use value cannot be read twice.
    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.del(key).await?;
        }
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

struct StoredValue {
    value: String,
    expires_at: Instant,
}

pub struct MemoryStore {
    data: Mutex<HashMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut data = self.data.lock();
        // Opportunistic sweep so abandoned tickets don't pile up.
        let now = Instant::now();
        data.retain(|_, v| v.expires_at > now);
        data.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: now + Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let data = self.data.lock();
        Ok(data
            .get(key)
            .filter(|v| v.expires_at > Instant::now())
            .map(|v| v.value.clone()))
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.data.lock().remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut data = self.data.lock();
        Ok(data
            .remove(key)
            .filter(|v| v.expires_at > Instant::now())
            .map(|v| v.value))
    }
}
