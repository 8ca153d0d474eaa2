use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::tokens::{TokenError, TokenManager};

const DEFAULT_BASE_URL: &str = "https://api.myanimelist.net";
const DEFAULT_PAGE_SIZE: usize = 500;
const LIST_STATUS_FIELDS: &str =
    "status,score,num_episodes_watched,is_rewatching,num_times_rewatched";

#[derive(Debug, Error)]
pub enum MalError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("authorization failed: {0}")]
    Auth(#[from] TokenError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// Delays the client inserts between calls. The defaults respect MAL's rate
/// limits; tests shrink them to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalPacing {
    pub page_delay: Duration,
    pub fetch_retry_delay: Duration,
    pub upsert_attempts: u32,
    pub upsert_retry_delay: Duration,
}

impl Default for MalPacing {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_millis(300),
            fetch_retry_delay: Duration::from_millis(1000),
            upsert_attempts: 3,
            upsert_retry_delay: Duration::from_millis(2000),
        }
    }
}

impl MalPacing {
    pub fn immediate() -> Self {
        Self {
            page_delay: Duration::ZERO,
            fetch_retry_delay: Duration::ZERO,
            upsert_attempts: 3,
            upsert_retry_delay: Duration::ZERO,
        }
    }
}

#[derive(Clone)]
pub struct MalClient {
    http: Client,
    base_url: Url,
    tokens: Arc<TokenManager>,
    page_size: usize,
    pacing: MalPacing,
}

impl MalClient {
    pub fn new(tokens: Arc<TokenManager>) -> Result<Self, MalError> {
        Self::with_base_url(DEFAULT_BASE_URL, tokens)
    }

    pub fn with_base_url(base_url: &str, tokens: Arc<TokenManager>) -> Result<Self, MalError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            tokens,
            page_size: DEFAULT_PAGE_SIZE,
            pacing: MalPacing::default(),
        })
    }

    pub fn with_pacing(mut self, pacing: MalPacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Walks the whole list page by page. A transient failure retries the
    /// same page once before giving up.
    pub async fn fetch_full_list(&self) -> Result<Vec<MalListItem>, MalError> {
        let mut offset = 0usize;
        let mut items = Vec::new();
        loop {
            let page = match self.fetch_page(offset).await {
                Ok(page) => page,
                Err(err) if err.is_transient() => {
                    warn!(offset, "list page fetch failed, retrying once: {err}");
                    tokio::time::sleep(self.pacing.fetch_retry_delay).await;
                    self.fetch_page(offset).await?
                }
                Err(err) => return Err(err),
            };

            let count = page.len();
            debug!(offset, count, "fetched list page");
            if count == 0 {
                break;
            }
            items.extend(page);
            if count < self.page_size {
                break;
            }
            offset += self.page_size;
            tokio::time::sleep(self.pacing.page_delay).await;
        }
        Ok(items)
    }

    /// Reads the user's list status for one title. `None` when the title is
    /// not on the list.
    pub async fn fetch_entry(&self, mal_id: u64) -> Result<Option<MalListStatus>, MalError> {
        let mut url = self.endpoint(&format!("/v2/anime/{mal_id}"))?;
        url.query_pairs_mut()
            .append_pair("fields", &format!("my_list_status{{{LIST_STATUS_FIELDS}}}"));
        let response = self
            .http
            .get(url)
            .header("Authorization", self.tokens.authorization_header().await?)
            .send()
            .await?;
        let details: AnimeDetails = Self::handle_response(response).await?;
        Ok(details.my_list_status)
    }

    /// PUTs the present fields of `update`. Any failure, including a non-2xx
    /// status, is retried until the attempt budget is spent; the last error
    /// is returned.
    pub async fn upsert_entry(&self, mal_id: u64, update: &MalListUpdate) -> Result<(), MalError> {
        let attempts = self.pacing.upsert_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.put_list_status(mal_id, update).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt >= attempts => return Err(err),
                Err(err) => {
                    warn!(mal_id, attempt, "list update failed: {err}");
                    tokio::time::sleep(self.pacing.upsert_retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Removes a title from the list. A 404 means it is already gone.
    pub async fn delete_entry(&self, mal_id: u64) -> Result<(), MalError> {
        let url = self.endpoint(&format!("/v2/anime/{mal_id}/my_list_status"))?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.tokens.authorization_header().await?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::handle_empty(response).await
    }

    async fn fetch_page(&self, offset: usize) -> Result<Vec<MalListItem>, MalError> {
        let mut url = self.endpoint("/v2/users/@me/animelist")?;
        url.query_pairs_mut()
            .append_pair("limit", &self.page_size.to_string())
            .append_pair("offset", &offset.to_string())
            .append_pair("fields", &format!("list_status{{{LIST_STATUS_FIELDS}}}"))
            .append_pair("nsfw", "true");
        let response = self
            .http
            .get(url)
            .header("Authorization", self.tokens.authorization_header().await?)
            .send()
            .await?;
        let page: AnimeListPage = Self::handle_response(response).await?;
        Ok(page.data)
    }

    async fn put_list_status(&self, mal_id: u64, update: &MalListUpdate) -> Result<(), MalError> {
        let url = self.endpoint(&format!("/v2/anime/{mal_id}/my_list_status"))?;
        let response = self
            .http
            .put(url)
            .header("Authorization", self.tokens.authorization_header().await?)
            .form(update)
            .send()
            .await?;
        Self::handle_empty(response).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, MalError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, MalError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(MalError::Api { status, body })
        }
    }

    async fn handle_empty(response: reqwest::Response) -> Result<(), MalError> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(MalError::Api { status, body })
        }
    }
}

impl MalError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            MalError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }

    /// Transport failures and retryable statuses.
    pub fn is_transient(&self) -> bool {
        matches!(self, MalError::Request(_)) || self.is_retryable()
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MalListItem {
    pub node: MalNode,
    #[serde(default)]
    pub list_status: Option<MalListStatus>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MalNode {
    pub id: u64,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct MalListStatus {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub score: u8,
    #[serde(default)]
    pub num_episodes_watched: u32,
    #[serde(default)]
    pub is_rewatching: bool,
    #[serde(default)]
    pub num_times_rewatched: u32,
}

/// Form body for `PUT my_list_status`. Absent fields are left untouched on
/// the server.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MalListUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_watched_episodes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_times_rewatched: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_rewatching: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct AnimeListPage {
    #[serde(default)]
    data: Vec<MalListItem>,
}

#[derive(Debug, Deserialize)]
struct AnimeDetails {
    #[serde(default)]
    my_list_status: Option<MalListStatus>,
}
