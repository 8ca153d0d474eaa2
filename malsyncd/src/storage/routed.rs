use std::sync::Arc;

use async_trait::async_trait;
use malsync_core::tokens::{KEY_ACCESS_TOKEN, KEY_CLIENT_SECRET, KEY_REFRESH_TOKEN};
use malsync_core::{KeyValueStore, StoreError};
use serde_json::Value;

/// Keys that never touch the settings database.
pub const SECRET_KEYS: [&str; 3] = [KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN, KEY_CLIENT_SECRET];

pub struct RoutedStore {
    settings: Arc<dyn KeyValueStore>,
    secrets: Arc<dyn KeyValueStore>,
}

impl RoutedStore {
    pub fn new(settings: Arc<dyn KeyValueStore>, secrets: Arc<dyn KeyValueStore>) -> Self {
        Self { settings, secrets }
    }

    fn route(&self, key: &str) -> &dyn KeyValueStore {
        if SECRET_KEYS.contains(&key) {
            self.secrets.as_ref()
        } else {
            self.settings.as_ref()
        }
    }
}

#[async_trait]
impl KeyValueStore for RoutedStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.route(key).get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.route(key).set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.route(key).remove(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use malsync_core::MemoryStore;
    use malsync_core::tokens::KEY_CLIENT_ID;
    use serde_json::json;

    #[tokio::test]
    async fn secret_keys_go_to_the_secret_store() {
        let settings = Arc::new(MemoryStore::new());
        let secrets = Arc::new(MemoryStore::new());
        let routed = RoutedStore::new(settings.clone(), secrets.clone());

        routed.set(KEY_ACCESS_TOKEN, json!("tok")).await.unwrap();
        routed.set(KEY_CLIENT_ID, json!("cid")).await.unwrap();

        assert_eq!(secrets.get(KEY_ACCESS_TOKEN).await.unwrap(), Some(json!("tok")));
        assert!(settings.get(KEY_ACCESS_TOKEN).await.unwrap().is_none());
        assert_eq!(settings.get(KEY_CLIENT_ID).await.unwrap(), Some(json!("cid")));
        assert_eq!(routed.get(KEY_ACCESS_TOKEN).await.unwrap(), Some(json!("tok")));

        routed.remove(KEY_ACCESS_TOKEN).await.unwrap();
        assert!(secrets.get(KEY_ACCESS_TOKEN).await.unwrap().is_none());
    }
}
