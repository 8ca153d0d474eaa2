use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use malsync_core::{
    AniListClient, KeyValueStore, MalClient, OAuthClient, SystemClock, TokenManager,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DaemonConfig;
use crate::prefs::SyncPreferences;
use crate::storage::{KeyringStore, RoutedStore, SqliteStore};
use crate::sync::{Direction, EntryChanged, SyncEngine, SyncReport, TracingSink};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const CHANGE_QUEUE: usize = 64;

/// Opens the settings database, routing secrets to the keyring when enabled.
pub async fn open_store(config: &DaemonConfig) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    let settings = SqliteStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open settings at {:?}", config.db_path))?;
    let settings: Arc<dyn KeyValueStore> = Arc::new(settings);
    if config.use_keyring {
        Ok(Arc::new(RoutedStore::new(
            settings,
            Arc::new(KeyringStore::default()),
        )))
    } else {
        Ok(settings)
    }
}

pub async fn load_tokens(
    config: &DaemonConfig,
    store: Arc<dyn KeyValueStore>,
) -> anyhow::Result<Arc<TokenManager>> {
    let oauth = match &config.mal_oauth_url {
        Some(url) => OAuthClient::with_base_url(url)?,
        None => OAuthClient::new()?,
    };
    let tokens = TokenManager::load(store, oauth, Arc::new(SystemClock))
        .await
        .context("failed to load saved tokens")?;
    Ok(Arc::new(tokens))
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    store: Arc<dyn KeyValueStore>,
    engine: Arc<SyncEngine>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let store = open_store(&config).await?;
        let tokens = load_tokens(&config, Arc::clone(&store)).await?;
        if tokens.token_set().await.refresh_token.is_none() {
            anyhow::bail!(
                "MyAnimeList is not connected; run `malsyncd configure` and `malsyncd connect` first"
            );
        }

        let anilist_token = config
            .anilist_token
            .clone()
            .context("MALSYNC_ANILIST_TOKEN is not set")?;
        let anilist = match &config.anilist_url {
            Some(url) => AniListClient::with_endpoint(url, anilist_token)?,
            None => AniListClient::new(anilist_token)?,
        };
        let mal = match &config.mal_api_url {
            Some(url) => MalClient::with_base_url(url, tokens)?,
            None => MalClient::new(tokens)?,
        };

        let engine = SyncEngine::new(
            Arc::new(mal),
            Arc::new(anilist),
            Arc::clone(&store),
            Arc::new(TracingSink),
        )
        .with_timings(config.timings());

        Ok(Self {
            config,
            store,
            engine: Arc::new(engine),
        })
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// One full run in the given direction, or the preferred one.
    pub async fn sync_once(
        &self,
        direction: Option<Direction>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<SyncReport> {
        let prefs = SyncPreferences::load(self.store.as_ref()).await?;
        let direction = direction.unwrap_or(prefs.direction);
        self.engine
            .run_full(direction, prefs.deletion_policy(), cancel)
            .await
            .context("a sync is already running")
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let prefs = SyncPreferences::load(self.store.as_ref()).await?;
        info!(
            direction = %prefs.direction,
            live_sync = prefs.live_sync,
            on_startup = prefs.sync_on_startup,
            every_24h = prefs.sync_every_24h,
            "malsyncd started"
        );

        let shutdown = CancellationToken::new();
        let mut tasks = JoinSet::new();

        if prefs.sync_on_startup {
            let engine = Arc::clone(&self.engine);
            let store = Arc::clone(&self.store);
            let cancel = shutdown.child_token();
            let delay = self.config.startup_delay;
            tasks.spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        run_scheduled(&engine, store.as_ref(), &cancel, "startup").await;
                    }
                }
            });
        }

        // A plain thread: a pending stdin read cannot be cancelled and must
        // not hold up runtime shutdown.
        let (changes_tx, mut changes) = mpsc::channel(CHANGE_QUEUE);
        let reader = std::thread::Builder::new()
            .name("stdin-notifications".into())
            .spawn(move || {
                forward_notifications(std::io::stdin().lock(), changes_tx);
                debug!("stdin closed, no more change notifications");
            });
        let mut changes_open = match reader {
            Ok(_) => true,
            Err(err) => {
                warn!("failed to start the notification reader: {err}");
                false
            }
        };

        let mut daily = tokio::time::interval_at(Instant::now() + DAY, DAY);
        daily.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                result = &mut ctrl_c => {
                    if let Err(err) = result {
                        warn!("failed to listen for ctrl-c: {err}");
                    }
                    info!("shutting down");
                    break;
                }
                _ = daily.tick() => {
                    let engine = Arc::clone(&self.engine);
                    let store = Arc::clone(&self.store);
                    let cancel = shutdown.child_token();
                    tasks.spawn(async move {
                        match SyncPreferences::load(store.as_ref()).await {
                            Ok(prefs) if prefs.sync_every_24h => {
                                run_scheduled(&engine, store.as_ref(), &cancel, "scheduled").await;
                            }
                            Ok(_) => debug!("daily sync disabled"),
                            Err(err) => warn!("failed to read preferences: {err}"),
                        }
                    });
                }
                event = changes.recv(), if changes_open => match event {
                    Some(EntryChanged { media_id }) => {
                        let engine = Arc::clone(&self.engine);
                        let store = Arc::clone(&self.store);
                        tasks.spawn(async move {
                            handle_live_event(&engine, store.as_ref(), media_id).await;
                        });
                    }
                    None => changes_open = false,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(err) = joined {
                        warn!("background task failed: {err}");
                    }
                }
            }
        }

        shutdown.cancel();
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!("background task failed: {err}");
            }
        }
        Ok(())
    }
}

async fn run_scheduled(
    engine: &SyncEngine,
    store: &dyn KeyValueStore,
    cancel: &CancellationToken,
    trigger: &str,
) {
    let prefs = match SyncPreferences::load(store).await {
        Ok(prefs) => prefs,
        Err(err) => {
            warn!(trigger, "failed to read preferences: {err}");
            return;
        }
    };
    match engine
        .run_full(prefs.direction, prefs.deletion_policy(), cancel)
        .await
    {
        Some(report) => debug!(trigger, state = ?report.state, "sync finished"),
        None => info!(trigger, "sync already running, skipped"),
    }
}

async fn handle_live_event(engine: &SyncEngine, store: &dyn KeyValueStore, media_id: u64) {
    let settings = match SyncPreferences::load(store).await {
        Ok(prefs) => prefs.live_settings(),
        Err(err) => {
            warn!(media_id, "failed to read preferences: {err}");
            return;
        }
    };
    let outcome = engine
        .handle_entry_changed(EntryChanged { media_id }, settings)
        .await;
    debug!(media_id, ?outcome, "change notification handled");
}

/// Turns notification lines into `EntryChanged` events until the reader hits
/// EOF or the receiver goes away. Blocking; call it off the runtime.
pub fn forward_notifications<R: BufRead>(reader: R, tx: mpsc::Sender<EntryChanged>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!("reading change notifications failed: {err}");
                return;
            }
        };
        match parse_media_id(&line) {
            Some(media_id) => {
                if tx.blocking_send(EntryChanged { media_id }).is_err() {
                    return;
                }
            }
            None if line.trim().is_empty() => {}
            None => warn!(line = %line.trim(), "ignoring unrecognized change notification"),
        }
    }
}

#[derive(Deserialize)]
struct ChangeNotification {
    #[serde(rename = "mediaId")]
    media_id: u64,
}

/// Accepts a bare AniList media id or a `{"mediaId": N}` object.
pub fn parse_media_id(line: &str) -> Option<u64> {
    let line = line.trim();
    if let Ok(id) = line.parse::<u64>() {
        return Some(id);
    }
    serde_json::from_str::<ChangeNotification>(line)
        .ok()
        .map(|event| event.media_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_ids_and_json_events() {
        assert_eq!(parse_media_id("42"), Some(42));
        assert_eq!(parse_media_id("  7\n"), Some(7));
        assert_eq!(parse_media_id(r#"{"mediaId": 99, "progress": 3}"#), Some(99));
        assert_eq!(parse_media_id("abc"), None);
        assert_eq!(parse_media_id("-1"), None);
        assert_eq!(parse_media_id(""), None);
    }

    #[test]
    fn forwards_recognized_lines_in_order() {
        let input: &[u8] = b"12\n\nnot an id\n{\"mediaId\": 7}\n";
        let (tx, mut rx) = mpsc::channel(8);

        forward_notifications(input, tx);

        let mut ids = Vec::new();
        while let Some(event) = rx.blocking_recv() {
            ids.push(event.media_id);
        }
        assert_eq!(ids, vec![12, 7]);
    }

    #[test]
    fn reader_stops_when_the_daemon_hangs_up() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let thread = std::thread::spawn(move || forward_notifications(&b"1\n2\n3\n"[..], tx));

        assert!(thread.join().is_ok());
    }
}
