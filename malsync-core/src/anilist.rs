use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::OnceCell;
use url::Url;

const DEFAULT_ENDPOINT: &str = "https://graphql.anilist.co";

const VIEWER_QUERY: &str = "query { Viewer { id } }";

const COLLECTION_QUERY: &str = "query ($userId: Int) {
  MediaListCollection(userId: $userId, type: ANIME) {
    lists { entries { status score progress repeat media { id idMal title { userPreferred } } } }
  }
}";

const MEDIA_BY_MAL_ID_QUERY: &str =
    "query ($id: Int) { Media(idMal: $id, type: ANIME) { id } }";

const MEDIA_STATE_QUERY: &str = "query ($id: Int) {
  Media(id: $id, type: ANIME) {
    id idMal title { userPreferred }
    mediaListEntry { status score progress repeat }
  }
}";

const SAVE_ENTRY_MUTATION: &str = "mutation ($mediaId: Int, $status: MediaListStatus, $score: Float, $progress: Int) {
  SaveMediaListEntry(mediaId: $mediaId, status: $status, score: $score, progress: $progress) { id }
}";

const SAVE_REPEAT_MUTATION: &str = "mutation ($mediaId: Int, $repeat: Int) {
  SaveMediaListEntry(mediaId: $mediaId, repeat: $repeat) { id }
}";

#[derive(Debug, Error)]
pub enum AniListError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("graphql error: {0}")]
    GraphQl(String),
    #[error("requested media was not found")]
    NotFound,
    #[error("graphql response carried no data")]
    MissingData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaListStatus {
    Current,
    Planning,
    Completed,
    Dropped,
    Paused,
    Repeating,
    #[serde(other)]
    Unknown,
}

/// One list entry of the viewer's anime collection, flattened out of the
/// per-status lists.
#[derive(Debug, Clone, PartialEq)]
pub struct AniListEntry {
    pub media_id: u64,
    pub mal_id: Option<u64>,
    pub title: String,
    pub status: Option<MediaListStatus>,
    pub score: f64,
    pub progress: u32,
    pub repeat: u32,
}

/// A title with the viewer's list entry for it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct AniListMedia {
    pub media_id: u64,
    pub mal_id: Option<u64>,
    pub title: String,
    pub entry: Option<AniListEntry>,
}

pub struct AniListClient {
    http: Client,
    endpoint: Url,
    token: String,
    viewer_id: OnceCell<u64>,
}

impl AniListClient {
    pub fn new(token: impl Into<String>) -> Result<Self, AniListError> {
        Self::with_endpoint(DEFAULT_ENDPOINT, token)
    }

    pub fn with_endpoint(endpoint: &str, token: impl Into<String>) -> Result<Self, AniListError> {
        Ok(Self {
            http: Client::new(),
            endpoint: Url::parse(endpoint)?,
            token: token.into(),
            viewer_id: OnceCell::new(),
        })
    }

    pub async fn viewer_id(&self) -> Result<u64, AniListError> {
        self.viewer_id
            .get_or_try_init(|| async {
                let data: ViewerData = self.query(VIEWER_QUERY, json!({})).await?;
                Ok::<u64, AniListError>(data.viewer.id)
            })
            .await
            .copied()
    }

    pub async fn fetch_collection(&self) -> Result<Vec<AniListEntry>, AniListError> {
        let user_id = self.viewer_id().await?;
        let data: CollectionData = self
            .query(COLLECTION_QUERY, json!({ "userId": user_id }))
            .await?;
        let lists = data.collection.map(|c| c.lists).unwrap_or_default();
        Ok(lists
            .into_iter()
            .flat_map(|list| list.entries)
            .map(WireEntry::into_entry)
            .collect())
    }

    /// Translates a MAL id to an AniList media id. Unknown ids yield `None`.
    pub async fn find_by_mal_id(&self, mal_id: u64) -> Result<Option<u64>, AniListError> {
        match self
            .query::<MediaIdData>(MEDIA_BY_MAL_ID_QUERY, json!({ "id": mal_id }))
            .await
        {
            Ok(data) => Ok(data.media.map(|m| m.id)),
            Err(AniListError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn media_state(&self, media_id: u64) -> Result<Option<AniListMedia>, AniListError> {
        let data: MediaStateData = match self
            .query(MEDIA_STATE_QUERY, json!({ "id": media_id }))
            .await
        {
            Ok(data) => data,
            Err(AniListError::NotFound) => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(data.media.map(|media| {
            let title = media.title_or_id();
            let entry = media.list_entry.map(|list| AniListEntry {
                media_id: media.id,
                mal_id: media.id_mal,
                title: title.clone(),
                status: list.status,
                score: list.score.unwrap_or_default(),
                progress: list.progress.unwrap_or_default(),
                repeat: list.repeat.unwrap_or_default(),
            });
            AniListMedia {
                media_id: media.id,
                mal_id: media.id_mal,
                title,
                entry,
            }
        }))
    }

    pub async fn save_entry(
        &self,
        media_id: u64,
        status: Option<MediaListStatus>,
        score: f64,
        progress: u32,
    ) -> Result<(), AniListError> {
        let mut variables = json!({
            "mediaId": media_id,
            "score": score,
            "progress": progress,
        });
        if let Some(status) = status {
            variables["status"] = serde_json::to_value(status).map_err(|err| {
                AniListError::GraphQl(format!("status cannot be encoded: {err}"))
            })?;
        }
        let _: Value = self.query(SAVE_ENTRY_MUTATION, variables).await?;
        Ok(())
    }

    pub async fn save_repeat(&self, media_id: u64, repeat: u32) -> Result<(), AniListError> {
        let _: Value = self
            .query(
                SAVE_REPEAT_MUTATION,
                json!({ "mediaId": media_id, "repeat": repeat }),
            )
            .await?;
        Ok(())
    }

    async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<T, AniListError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/json")
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        let Ok(envelope) = serde_json::from_str::<GraphQlResponse<T>>(&body) else {
            return Err(AniListError::Api { status, body });
        };

        if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
            if errors.iter().any(|e| e.status == Some(404)) {
                return Err(AniListError::NotFound);
            }
            let message = errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(AniListError::GraphQl(message));
        }
        if !status.is_success() {
            return Err(AniListError::Api { status, body });
        }
        envelope.data.ok_or(AniListError::MissingData)
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
    #[serde(default)]
    status: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct ViewerData {
    #[serde(rename = "Viewer")]
    viewer: WireViewer,
}

#[derive(Debug, Deserialize)]
struct WireViewer {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct CollectionData {
    #[serde(rename = "MediaListCollection")]
    collection: Option<WireCollection>,
}

#[derive(Debug, Deserialize)]
struct WireCollection {
    #[serde(default)]
    lists: Vec<WireList>,
}

#[derive(Debug, Deserialize)]
struct WireList {
    #[serde(default)]
    entries: Vec<WireEntry>,
}

#[derive(Debug, Deserialize)]
struct WireEntry {
    status: Option<MediaListStatus>,
    score: Option<f64>,
    progress: Option<u32>,
    repeat: Option<u32>,
    media: WireMedia,
}

impl WireEntry {
    fn into_entry(self) -> AniListEntry {
        AniListEntry {
            title: self.media.title_or_id(),
            media_id: self.media.id,
            mal_id: self.media.id_mal,
            status: self.status,
            score: self.score.unwrap_or_default(),
            progress: self.progress.unwrap_or_default(),
            repeat: self.repeat.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireMedia {
    id: u64,
    #[serde(rename = "idMal")]
    id_mal: Option<u64>,
    title: Option<WireTitle>,
    #[serde(rename = "mediaListEntry", default)]
    list_entry: Option<WireListEntry>,
}

impl WireMedia {
    fn title_or_id(&self) -> String {
        self.title
            .as_ref()
            .and_then(|t| t.user_preferred.clone())
            .unwrap_or_else(|| format!("AniList #{}", self.id))
    }
}

#[derive(Debug, Deserialize)]
struct WireTitle {
    #[serde(rename = "userPreferred")]
    user_preferred: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireListEntry {
    status: Option<MediaListStatus>,
    score: Option<f64>,
    progress: Option<u32>,
    repeat: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MediaIdData {
    #[serde(rename = "Media")]
    media: Option<WireMediaId>,
}

#[derive(Debug, Deserialize)]
struct WireMediaId {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct MediaStateData {
    #[serde(rename = "Media")]
    media: Option<WireMedia>,
}
