use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failed: {0}")]
    Backend(String),
    #[error("stored value for {key} is malformed: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Persistent settings storage. Values are JSON so booleans, numbers and id
/// maps round-trip without a schema per key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

pub async fn get_string(store: &dyn KeyValueStore, key: &str) -> Result<Option<String>, StoreError> {
    Ok(store
        .get(key)
        .await?
        .and_then(|value| value.as_str().map(str::to_string))
        .filter(|value| !value.is_empty()))
}

pub async fn get_bool(
    store: &dyn KeyValueStore,
    key: &str,
    default: bool,
) -> Result<bool, StoreError> {
    Ok(store
        .get(key)
        .await?
        .and_then(|value| value.as_bool())
        .unwrap_or(default))
}

pub async fn get_i64(store: &dyn KeyValueStore, key: &str) -> Result<Option<i64>, StoreError> {
    Ok(store.get(key).await?.and_then(|value| value.as_i64()))
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.lock().await.remove(key);
        Ok(())
    }
}
