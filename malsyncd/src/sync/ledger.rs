use std::collections::{BTreeMap, HashMap};

use malsync_core::{KeyValueStore, StoreError};
use serde_json::Value;
use tracing::warn;

pub const KEY_ID_HISTORY: &str = "malsync.idHistory";

/// AniList media id to MAL id pairs observed by the last uncancelled
/// AniList to MAL run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryLedger {
    pairs: BTreeMap<u64, u64>,
}

impl HistoryLedger {
    pub async fn load(store: &dyn KeyValueStore) -> Result<Self, StoreError> {
        let Some(value) = store.get(KEY_ID_HISTORY).await? else {
            return Ok(Self::default());
        };
        let raw: HashMap<String, u64> =
            serde_json::from_value(value).map_err(|source| StoreError::Malformed {
                key: KEY_ID_HISTORY.to_string(),
                source,
            })?;

        let mut pairs = BTreeMap::new();
        for (media_id, mal_id) in raw {
            match media_id.parse::<u64>() {
                Ok(media_id) => {
                    pairs.insert(media_id, mal_id);
                }
                Err(_) => warn!(key = %media_id, "skipping malformed id history entry"),
            }
        }
        Ok(Self { pairs })
    }

    /// Replaces the stored ledger with this one.
    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<(), StoreError> {
        let object: serde_json::Map<String, Value> = self
            .pairs
            .iter()
            .map(|(media_id, mal_id)| (media_id.to_string(), Value::from(*mal_id)))
            .collect();
        store.set(KEY_ID_HISTORY, Value::Object(object)).await
    }

    pub fn record(&mut self, media_id: u64, mal_id: u64) {
        self.pairs.insert(media_id, mal_id);
    }

    /// True when `mal_id` was linked to some AniList entry.
    pub fn knows_mal_id(&self, mal_id: u64) -> bool {
        self.pairs.values().any(|known| *known == mal_id)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use malsync_core::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn missing_ledger_loads_empty() {
        let store = MemoryStore::new();
        assert!(HistoryLedger::load(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_replaces_previous_contents() {
        let store = MemoryStore::new();
        store
            .set(KEY_ID_HISTORY, json!({ "1": 100, "2": 200 }))
            .await
            .unwrap();

        let mut ledger = HistoryLedger::default();
        ledger.record(3, 300);
        ledger.save(&store).await.unwrap();

        assert_eq!(
            store.get(KEY_ID_HISTORY).await.unwrap(),
            Some(json!({ "3": 300 }))
        );
        let loaded = HistoryLedger::load(&store).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.knows_mal_id(300));
    }

    #[tokio::test]
    async fn lookups_go_by_mal_id_value() {
        let store = MemoryStore::new();
        store
            .set(KEY_ID_HISTORY, json!({ "7": 70, "bogus": 1 }))
            .await
            .unwrap();
        let ledger = HistoryLedger::load(&store).await.unwrap();

        assert!(ledger.knows_mal_id(70));
        assert!(!ledger.knows_mal_id(7));
        assert!(!ledger.knows_mal_id(1));
    }

    #[tokio::test]
    async fn malformed_ledger_is_an_error() {
        let store = MemoryStore::new();
        store.set(KEY_ID_HISTORY, json!([1, 2])).await.unwrap();
        assert!(matches!(
            HistoryLedger::load(&store).await,
            Err(StoreError::Malformed { .. })
        ));
    }
}
