use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://myanimelist.net";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

/// Application credentials registered at myanimelist.net/apiconfig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Clone)]
pub struct OAuthClient {
    http: Client,
    base_url: Url,
}

impl OAuthClient {
    pub fn new() -> Result<Self, OAuthError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, OAuthError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
        })
    }

    /// MAL only accepts the `plain` PKCE method, so the challenge is the
    /// verifier itself.
    pub fn authorize_url(&self, client_id: &str, code_verifier: &str) -> Result<Url, OAuthError> {
        let mut url = self.base_url.join("/v1/oauth2/authorize")?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", client_id)
            .append_pair("code_challenge", code_verifier)
            .append_pair("code_challenge_method", "plain")
            .append_pair("redirect_uri", DEFAULT_REDIRECT_URI);
        Ok(url)
    }

    pub async fn exchange_code(
        &self,
        credentials: &Credentials,
        code: &str,
        code_verifier: &str,
    ) -> Result<OAuthToken, OAuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", DEFAULT_REDIRECT_URI),
        ];
        self.post_token_form(&form).await
    }

    pub async fn refresh_token(
        &self,
        credentials: &Credentials,
        refresh_token: &str,
    ) -> Result<OAuthToken, OAuthError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];
        self.post_token_form(&form).await
    }

    async fn post_token_form(&self, form: &[(&str, &str)]) -> Result<OAuthToken, OAuthError> {
        let url = self.base_url.join("/v1/oauth2/token")?;
        let response = self.http.post(url).form(form).send().await?;
        if response.status().is_success() {
            Ok(response.json::<OAuthToken>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(OAuthError::Api { status, body })
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Accepts either a bare authorization code or the full redirect URL the
/// browser landed on, and returns the code.
pub fn extract_authorization_code(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if !input.starts_with("http://") && !input.starts_with("https://") {
        return Some(input.to_string());
    }
    let url = Url::parse(input).ok()?;
    url.query_pairs()
        .find_map(|(key, value)| (key == "code" && !value.is_empty()).then(|| value.into_owned()))
}
