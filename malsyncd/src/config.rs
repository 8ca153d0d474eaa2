use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::storage::default_db_path;
use crate::sync::EngineTimings;

const DEFAULT_WRITE_PACING_MS: u64 = 500;
const DEFAULT_FINALIZE_DELAY_MS: u64 = 2000;
const DEFAULT_LIVE_DEBOUNCE_MS: u64 = 1000;
const DEFAULT_STARTUP_DELAY_SECS: u64 = 5;

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub mal_api_url: Option<String>,
    pub mal_oauth_url: Option<String>,
    pub anilist_url: Option<String>,
    pub anilist_token: Option<String>,
    pub use_keyring: bool,
    pub write_pacing: Duration,
    pub finalize_delay: Duration,
    pub live_debounce: Duration,
    pub startup_delay: Duration,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let db_path = match read_string_env("MALSYNC_DB_PATH") {
            Some(path) => expand_home(&path),
            None => default_db_path().context("cannot locate the settings database")?,
        };

        Ok(Self {
            db_path,
            mal_api_url: read_string_env("MALSYNC_MAL_API_URL"),
            mal_oauth_url: read_string_env("MALSYNC_MAL_OAUTH_URL"),
            anilist_url: read_string_env("MALSYNC_ANILIST_URL"),
            anilist_token: read_string_env("MALSYNC_ANILIST_TOKEN"),
            use_keyring: read_bool_env("MALSYNC_USE_KEYRING", true),
            write_pacing: Duration::from_millis(read_u64_env(
                "MALSYNC_WRITE_PACING_MS",
                DEFAULT_WRITE_PACING_MS,
            )),
            finalize_delay: Duration::from_millis(read_u64_env(
                "MALSYNC_FINALIZE_DELAY_MS",
                DEFAULT_FINALIZE_DELAY_MS,
            )),
            live_debounce: Duration::from_millis(read_u64_env(
                "MALSYNC_LIVE_DEBOUNCE_MS",
                DEFAULT_LIVE_DEBOUNCE_MS,
            )),
            startup_delay: Duration::from_secs(read_u64_env(
                "MALSYNC_STARTUP_DELAY_SECS",
                DEFAULT_STARTUP_DELAY_SECS,
            )),
        })
    }

    pub fn timings(&self) -> EngineTimings {
        EngineTimings {
            write_pacing: self.write_pacing,
            finalize_delay: self.finalize_delay,
            live_debounce: self.live_debounce,
        }
    }
}

fn read_string_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

// Zero is a valid delay here, unlike a page size or poll interval.
fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

fn expand_home(value: &str) -> PathBuf {
    match (value.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(value),
    }
}
