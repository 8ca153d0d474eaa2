use malsync_core::storage::{get_bool, get_string};
use malsync_core::{KeyValueStore, StoreError};
use serde_json::json;
use tracing::warn;

use crate::sync::{DeletionPolicy, Direction, LiveSettings};

pub const KEY_LIVE_SYNC: &str = "malsync.liveSync";
pub const KEY_SYNC_ON_STARTUP: &str = "malsync.syncOnStartup";
pub const KEY_SYNC_EVERY_24H: &str = "malsync.syncEvery24h";
pub const KEY_SYNC_DELETIONS: &str = "malsync.syncDeletions";
pub const KEY_SYNC_REMOVALS_SAFE: &str = "malsync.syncRemovalsSafe";
pub const KEY_SYNC_MODE: &str = "malsync.syncMode";

/// User preferences kept next to the tokens in the settings store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPreferences {
    pub live_sync: bool,
    pub sync_on_startup: bool,
    pub sync_every_24h: bool,
    pub mirror_deletions: bool,
    pub safe_removals: bool,
    pub direction: Direction,
}

impl Default for SyncPreferences {
    fn default() -> Self {
        Self {
            live_sync: true,
            sync_on_startup: false,
            sync_every_24h: false,
            mirror_deletions: false,
            safe_removals: false,
            direction: Direction::AniListToMal,
        }
    }
}

impl SyncPreferences {
    pub async fn load(store: &dyn KeyValueStore) -> Result<Self, StoreError> {
        let defaults = Self::default();
        let direction = match get_string(store, KEY_SYNC_MODE).await? {
            Some(mode) => Direction::parse(&mode).unwrap_or_else(|| {
                warn!(%mode, "unknown sync mode, using default");
                defaults.direction
            }),
            None => defaults.direction,
        };
        Ok(Self {
            live_sync: get_bool(store, KEY_LIVE_SYNC, defaults.live_sync).await?,
            sync_on_startup: get_bool(store, KEY_SYNC_ON_STARTUP, defaults.sync_on_startup)
                .await?,
            sync_every_24h: get_bool(store, KEY_SYNC_EVERY_24H, defaults.sync_every_24h).await?,
            mirror_deletions: get_bool(store, KEY_SYNC_DELETIONS, defaults.mirror_deletions)
                .await?,
            safe_removals: get_bool(store, KEY_SYNC_REMOVALS_SAFE, defaults.safe_removals).await?,
            direction,
        })
    }

    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<(), StoreError> {
        store.set(KEY_LIVE_SYNC, json!(self.live_sync)).await?;
        store
            .set(KEY_SYNC_ON_STARTUP, json!(self.sync_on_startup))
            .await?;
        store
            .set(KEY_SYNC_EVERY_24H, json!(self.sync_every_24h))
            .await?;
        store
            .set(KEY_SYNC_DELETIONS, json!(self.mirror_deletions))
            .await?;
        store
            .set(KEY_SYNC_REMOVALS_SAFE, json!(self.safe_removals))
            .await?;
        store
            .set(KEY_SYNC_MODE, json!(self.direction.as_pref_str()))
            .await?;
        Ok(())
    }

    /// Mirror wins over safe when both are set.
    pub fn deletion_policy(&self) -> DeletionPolicy {
        DeletionPolicy::from_flags(self.mirror_deletions, self.safe_removals)
    }

    /// Live removals follow the mirror flag only.
    pub fn live_settings(&self) -> LiveSettings {
        LiveSettings {
            enabled: self.live_sync,
            deletions: self.mirror_deletions,
        }
    }
}
