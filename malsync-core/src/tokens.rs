use std::sync::Arc;

use rand::Rng;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;

use crate::oauth::{Credentials, OAuthClient, OAuthError, OAuthToken};
use crate::storage::{KeyValueStore, StoreError, get_i64, get_string};

pub const KEY_CLIENT_ID: &str = "malsync.clientId";
pub const KEY_CLIENT_SECRET: &str = "malsync.clientSecret";
pub const KEY_PKCE_VERIFIER: &str = "malsync.pkceVerifier";
pub const KEY_ACCESS_TOKEN: &str = "malsync.accessToken";
pub const KEY_REFRESH_TOKEN: &str = "malsync.refreshToken";
pub const KEY_EXPIRES_AT: &str = "malsync.expiresAt";

const VERIFIER_LEN: usize = 128;
const VERIFIER_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("client id or client secret is not configured")]
    MissingCredentials,
    #[error("PKCE verifier is missing; generate a new authorization link")]
    MissingVerifier,
    #[error("refresh token is missing")]
    MissingRefreshToken,
    #[error("oauth request failed: {0}")]
    OAuth(#[from] OAuthError),
    #[error("token storage failed: {0}")]
    Store(#[from] StoreError),
}

impl TokenError {
    /// Configuration problems are fixed by the user, never by retrying.
    pub fn is_config_error(&self) -> bool {
        matches!(self, TokenError::MissingCredentials | TokenError::MissingVerifier)
    }
}

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at_ms: Option<i64>,
}

impl TokenSet {
    fn valid_access_token(&self, now_ms: i64) -> Option<&str> {
        let access = self.access_token.as_deref()?;
        self.refresh_token.as_ref()?;
        let expires_at = self.expires_at_ms?;
        (now_ms < expires_at).then_some(access)
    }
}

pub struct TokenManager {
    store: Arc<dyn KeyValueStore>,
    oauth: OAuthClient,
    clock: Arc<dyn Clock>,
    state: Mutex<TokenSet>,
}

impl TokenManager {
    pub async fn load(
        store: Arc<dyn KeyValueStore>,
        oauth: OAuthClient,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TokenError> {
        let state = TokenSet {
            access_token: get_string(store.as_ref(), KEY_ACCESS_TOKEN).await?,
            refresh_token: get_string(store.as_ref(), KEY_REFRESH_TOKEN).await?,
            expires_at_ms: get_i64(store.as_ref(), KEY_EXPIRES_AT).await?,
        };
        Ok(Self {
            store,
            oauth,
            clock,
            state: Mutex::new(state),
        })
    }

    pub async fn token_set(&self) -> TokenSet {
        self.state.lock().await.clone()
    }

    /// Returns the access token only while all three token fields are held
    /// and the expiry lies in the future.
    pub async fn access_token(&self) -> Option<String> {
        let now = self.clock.now_ms();
        self.state
            .lock()
            .await
            .valid_access_token(now)
            .map(str::to_string)
    }

    pub async fn is_authenticated(&self) -> bool {
        self.access_token().await.is_some()
    }

    pub async fn store_credentials(&self, credentials: &Credentials) -> Result<(), TokenError> {
        self.store
            .set(KEY_CLIENT_ID, json!(credentials.client_id))
            .await?;
        self.store
            .set(KEY_CLIENT_SECRET, json!(credentials.client_secret))
            .await?;
        Ok(())
    }

    /// Generates and stores a fresh PKCE verifier and returns the URL the
    /// user opens to grant access.
    pub async fn prepare_authorization(&self) -> Result<Url, TokenError> {
        let credentials = self.credentials().await?;
        let verifier = generate_code_verifier();
        self.store.set(KEY_PKCE_VERIFIER, json!(verifier)).await?;
        Ok(self.oauth.authorize_url(&credentials.client_id, &verifier)?)
    }

    pub async fn exchange_code(&self, code: &str) -> Result<(), TokenError> {
        let credentials = self.credentials().await?;
        let verifier = get_string(self.store.as_ref(), KEY_PKCE_VERIFIER)
            .await?
            .ok_or(TokenError::MissingVerifier)?;

        info!("exchanging authorization code");
        let token = self
            .oauth
            .exchange_code(&credentials, code, &verifier)
            .await?;
        let mut state = self.state.lock().await;
        self.save_token(&mut state, token).await?;
        info!("authentication successful");
        Ok(())
    }

    pub async fn refresh(&self) -> Result<(), TokenError> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await
    }

    /// Bearer header value for API calls. An absent or expired token is
    /// refreshed once; a failed refresh propagates.
    pub async fn authorization_header(&self) -> Result<String, TokenError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now_ms();
        if state.valid_access_token(now).is_none() {
            self.refresh_locked(&mut state).await?;
        }
        let access = state
            .access_token
            .as_deref()
            .ok_or(TokenError::MissingRefreshToken)?;
        Ok(format!("Bearer {access}"))
    }

    pub async fn sign_out(&self) -> Result<(), TokenError> {
        let mut state = self.state.lock().await;
        for key in [KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN, KEY_EXPIRES_AT] {
            self.store.remove(key).await?;
        }
        *state = TokenSet::default();
        Ok(())
    }

    async fn refresh_locked(&self, state: &mut TokenSet) -> Result<(), TokenError> {
        let credentials = self.credentials().await?;
        let refresh_token = state
            .refresh_token
            .clone()
            .ok_or(TokenError::MissingRefreshToken)?;

        info!("refreshing access token");
        let token = match self.oauth.refresh_token(&credentials, &refresh_token).await {
            Ok(token) => token,
            Err(err) => {
                warn!("token refresh rejected: {err}");
                return Err(err.into());
            }
        };
        self.save_token(state, token).await
    }

    async fn save_token(&self, state: &mut TokenSet, token: OAuthToken) -> Result<(), TokenError> {
        let expires_at = self
            .clock
            .now_ms()
            .saturating_add((token.expires_in as i64).saturating_mul(1000));
        let refresh_token = token.refresh_token.or_else(|| state.refresh_token.clone());

        self.store
            .set(KEY_ACCESS_TOKEN, json!(token.access_token))
            .await?;
        if let Some(refresh) = &refresh_token {
            self.store.set(KEY_REFRESH_TOKEN, json!(refresh)).await?;
        }
        self.store.set(KEY_EXPIRES_AT, json!(expires_at)).await?;

        *state = TokenSet {
            access_token: Some(token.access_token),
            refresh_token,
            expires_at_ms: Some(expires_at),
        };
        Ok(())
    }

    async fn credentials(&self) -> Result<Credentials, TokenError> {
        let client_id = get_string(self.store.as_ref(), KEY_CLIENT_ID).await?;
        let client_secret = get_string(self.store.as_ref(), KEY_CLIENT_SECRET).await?;
        match (client_id, client_secret) {
            (Some(client_id), Some(client_secret)) => Ok(Credentials {
                client_id,
                client_secret,
            }),
            _ => Err(TokenError::MissingCredentials),
        }
    }
}

pub fn generate_code_verifier() -> String {
    let mut rng = rand::thread_rng();
    (0..VERIFIER_LEN)
        .map(|_| VERIFIER_CHARSET[rng.gen_range(0..VERIFIER_CHARSET.len())] as char)
        .collect()
}
