use async_trait::async_trait;
use malsync_core::{
    AniListClient, AniListEntry, AniListError, AniListMedia, MalClient, MalError, MalListItem,
    MalListStatus, MalListUpdate, MediaListStatus,
};

/// The MAL side of a sync as the engine sees it.
#[async_trait]
pub trait MalList: Send + Sync {
    async fn fetch_full_list(&self) -> Result<Vec<MalListItem>, MalError>;
    async fn fetch_entry(&self, mal_id: u64) -> Result<Option<MalListStatus>, MalError>;
    async fn upsert_entry(&self, mal_id: u64, update: &MalListUpdate) -> Result<(), MalError>;
    async fn delete_entry(&self, mal_id: u64) -> Result<(), MalError>;
}

/// The AniList side of a sync as the engine sees it.
#[async_trait]
pub trait AniListCollection: Send + Sync {
    async fn fetch_collection(&self) -> Result<Vec<AniListEntry>, AniListError>;
    async fn find_by_mal_id(&self, mal_id: u64) -> Result<Option<u64>, AniListError>;
    async fn media_state(&self, media_id: u64) -> Result<Option<AniListMedia>, AniListError>;
    async fn save_entry(
        &self,
        media_id: u64,
        status: Option<MediaListStatus>,
        score: f64,
        progress: u32,
    ) -> Result<(), AniListError>;
    async fn save_repeat(&self, media_id: u64, repeat: u32) -> Result<(), AniListError>;
}

#[async_trait]
impl MalList for MalClient {
    async fn fetch_full_list(&self) -> Result<Vec<MalListItem>, MalError> {
        MalClient::fetch_full_list(self).await
    }

    async fn fetch_entry(&self, mal_id: u64) -> Result<Option<MalListStatus>, MalError> {
        MalClient::fetch_entry(self, mal_id).await
    }

    async fn upsert_entry(&self, mal_id: u64, update: &MalListUpdate) -> Result<(), MalError> {
        MalClient::upsert_entry(self, mal_id, update).await
    }

    async fn delete_entry(&self, mal_id: u64) -> Result<(), MalError> {
        MalClient::delete_entry(self, mal_id).await
    }
}

#[async_trait]
impl AniListCollection for AniListClient {
    async fn fetch_collection(&self) -> Result<Vec<AniListEntry>, AniListError> {
        AniListClient::fetch_collection(self).await
    }

    async fn find_by_mal_id(&self, mal_id: u64) -> Result<Option<u64>, AniListError> {
        AniListClient::find_by_mal_id(self, mal_id).await
    }

    async fn media_state(&self, media_id: u64) -> Result<Option<AniListMedia>, AniListError> {
        AniListClient::media_state(self, media_id).await
    }

    async fn save_entry(
        &self,
        media_id: u64,
        status: Option<MediaListStatus>,
        score: f64,
        progress: u32,
    ) -> Result<(), AniListError> {
        AniListClient::save_entry(self, media_id, status, score, progress).await
    }

    async fn save_repeat(&self, media_id: u64, repeat: u32) -> Result<(), AniListError> {
        AniListClient::save_repeat(self, media_id, repeat).await
    }
}
