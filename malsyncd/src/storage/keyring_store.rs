use async_trait::async_trait;
use keyring::Entry;
use malsync_core::{KeyValueStore, StoreError};
use serde_json::Value;

pub const SERVICE_NAME: &str = "net.malsync.daemon";

/// Keeps values in the desktop secret service, one entry per key.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    async fn blocking<T, F>(&self, key: &str, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> Result<T, keyring::Error> + Send + 'static,
    {
        let entry = Entry::new(&self.service, key).map_err(keyring_error)?;
        tokio::task::spawn_blocking(move || op(entry))
            .await
            .map_err(|err| StoreError::Backend(format!("keyring task failed: {err}")))?
            .map_err(keyring_error)
    }
}

fn keyring_error(err: keyring::Error) -> StoreError {
    StoreError::Backend(format!("keyring error: {err}"))
}

#[async_trait]
impl KeyValueStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let secret = self
            .blocking(key, |entry| match entry.get_password() {
                Ok(secret) => Ok(Some(secret)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(err) => Err(err),
            })
            .await?;
        secret
            .map(|raw| decode_secret(key, &raw))
            .transpose()
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let raw = value.to_string();
        self.blocking(key, move |entry| entry.set_password(&raw))
            .await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.blocking(key, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err),
        })
        .await
    }
}

fn decode_secret(key: &str, raw: &str) -> Result<Value, StoreError> {
    serde_json::from_str(raw).map_err(|source| StoreError::Malformed {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn secrets_are_json_encoded() {
        let raw = json!("abc\"def").to_string();
        assert_eq!(decode_secret("k", &raw).unwrap(), json!("abc\"def"));
        assert!(decode_secret("k", "plain-token").is_err());
    }
}
