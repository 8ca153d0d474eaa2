use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use malsync_core::{
    AniListEntry, AniListError, AniListMedia, MalError, MalListItem, MalListStatus, MalListUpdate,
    MalNode, MediaListStatus, TokenError,
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::progress::{ProgressSink, Severity};
use super::remote::{AniListCollection, MalList};

pub fn mal_item(id: u64, title: &str, status: &str, score: u8, episodes: u32) -> MalListItem {
    MalListItem {
        node: MalNode {
            id,
            title: title.to_string(),
        },
        list_status: Some(MalListStatus {
            status: Some(status.to_string()),
            score,
            num_episodes_watched: episodes,
            is_rewatching: false,
            num_times_rewatched: 0,
        }),
    }
}

pub fn ani_entry(
    media_id: u64,
    mal_id: Option<u64>,
    title: &str,
    status: MediaListStatus,
    score: f64,
    progress: u32,
) -> AniListEntry {
    AniListEntry {
        media_id,
        mal_id,
        title: title.to_string(),
        status: Some(status),
        score,
        progress,
        repeat: 0,
    }
}

fn rejected() -> MalError {
    MalError::Auth(TokenError::MissingRefreshToken)
}

#[derive(Default)]
pub struct FakeMal {
    pub list: Mutex<Vec<MalListItem>>,
    pub entries: Mutex<HashMap<u64, MalListStatus>>,
    pub upserts: Mutex<Vec<(u64, MalListUpdate)>>,
    pub deletes: Mutex<Vec<u64>>,
    pub fail_fetch: AtomicBool,
    pub fail_entry_fetch: AtomicBool,
    pub fail_upserts: Mutex<HashSet<u64>>,
    pub fail_deletes: Mutex<HashSet<u64>>,
    /// Cancelled right after the first successful upsert.
    pub cancel_after_upsert: Mutex<Option<CancellationToken>>,
    /// Holds `fetch_full_list` until notified.
    pub gate: Option<std::sync::Arc<Notify>>,
}

impl FakeMal {
    pub fn with_list(items: Vec<MalListItem>) -> Self {
        Self {
            list: Mutex::new(items),
            ..Default::default()
        }
    }

    pub fn upserted_ids(&self) -> Vec<u64> {
        self.upserts.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    pub fn deleted_ids(&self) -> Vec<u64> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl MalList for FakeMal {
    async fn fetch_full_list(&self) -> Result<Vec<MalListItem>, MalError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(rejected());
        }
        Ok(self.list.lock().unwrap().clone())
    }

    async fn fetch_entry(&self, mal_id: u64) -> Result<Option<MalListStatus>, MalError> {
        if self.fail_entry_fetch.load(Ordering::SeqCst) {
            return Err(rejected());
        }
        Ok(self.entries.lock().unwrap().get(&mal_id).cloned())
    }

    async fn upsert_entry(&self, mal_id: u64, update: &MalListUpdate) -> Result<(), MalError> {
        if self.fail_upserts.lock().unwrap().contains(&mal_id) {
            return Err(rejected());
        }
        self.upserts.lock().unwrap().push((mal_id, update.clone()));
        if let Some(token) = self.cancel_after_upsert.lock().unwrap().take() {
            token.cancel();
        }
        Ok(())
    }

    async fn delete_entry(&self, mal_id: u64) -> Result<(), MalError> {
        if self.fail_deletes.lock().unwrap().contains(&mal_id) {
            return Err(rejected());
        }
        self.deletes.lock().unwrap().push(mal_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAniList {
    pub collection: Mutex<Vec<AniListEntry>>,
    pub mal_lookup: Mutex<HashMap<u64, u64>>,
    pub failing_lookups: Mutex<HashSet<u64>>,
    pub media: Mutex<HashMap<u64, AniListMedia>>,
    pub saves: Mutex<Vec<(u64, Option<MediaListStatus>, f64, u32)>>,
    pub repeats: Mutex<Vec<(u64, u32)>>,
    pub fail_fetch: AtomicBool,
}

impl FakeAniList {
    pub fn with_collection(entries: Vec<AniListEntry>) -> Self {
        Self {
            collection: Mutex::new(entries),
            ..Default::default()
        }
    }

    pub fn set_media(&self, media_id: u64, mal_id: Option<u64>, entry: Option<AniListEntry>) {
        let title = entry
            .as_ref()
            .map(|e| e.title.clone())
            .unwrap_or_else(|| format!("Media {media_id}"));
        self.media.lock().unwrap().insert(
            media_id,
            AniListMedia {
                media_id,
                mal_id,
                title,
                entry,
            },
        );
    }
}

#[async_trait]
impl AniListCollection for FakeAniList {
    async fn fetch_collection(&self) -> Result<Vec<AniListEntry>, AniListError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(AniListError::GraphQl("collection unavailable".into()));
        }
        Ok(self.collection.lock().unwrap().clone())
    }

    async fn find_by_mal_id(&self, mal_id: u64) -> Result<Option<u64>, AniListError> {
        if self.failing_lookups.lock().unwrap().contains(&mal_id) {
            return Err(AniListError::GraphQl("lookup failed".into()));
        }
        Ok(self.mal_lookup.lock().unwrap().get(&mal_id).copied())
    }

    async fn media_state(&self, media_id: u64) -> Result<Option<AniListMedia>, AniListError> {
        Ok(self.media.lock().unwrap().get(&media_id).cloned())
    }

    async fn save_entry(
        &self,
        media_id: u64,
        status: Option<MediaListStatus>,
        score: f64,
        progress: u32,
    ) -> Result<(), AniListError> {
        self.saves
            .lock()
            .unwrap()
            .push((media_id, status, score, progress));
        Ok(())
    }

    async fn save_repeat(&self, media_id: u64, repeat: u32) -> Result<(), AniListError> {
        self.repeats.lock().unwrap().push((media_id, repeat));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub logs: Mutex<Vec<(String, Severity)>>,
    pub progress: Mutex<Vec<(u8, String)>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.logs.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn last_progress(&self) -> Option<(u8, String)> {
        self.progress.lock().unwrap().last().cloned()
    }
}

impl ProgressSink for RecordingSink {
    fn log(&self, message: &str, severity: Severity) {
        self.logs.lock().unwrap().push((message.to_string(), severity));
    }

    fn progress(&self, percent: u8, message: &str) {
        self.progress
            .lock()
            .unwrap()
            .push((percent, message.to_string()));
    }
}
