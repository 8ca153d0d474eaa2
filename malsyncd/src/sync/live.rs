use malsync_core::{AniListMedia, MalListStatus};
use tracing::{debug, warn};

use super::diff::{diff, mal_update};
use super::engine::{SyncEngine, SyncError};
use super::normalize::CanonicalEntry;
use super::progress::{ChangeAction, ChangeRecord, Severity};

/// A single AniList entry changed outside of a full run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryChanged {
    pub media_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveSettings {
    pub enabled: bool,
    pub deletions: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveOutcome {
    Disabled,
    Busy,
    NotLinked,
    Unchanged { mal_id: u64 },
    Written { mal_id: u64, created: bool },
    Deleted { mal_id: u64 },
    DeletionSuppressed { mal_id: u64 },
    Failed { message: String },
}

impl SyncEngine {
    /// Mirrors one AniList entry onto MAL. Leaves the session dedup set and
    /// the id history alone.
    pub async fn handle_entry_changed(
        &self,
        event: EntryChanged,
        settings: LiveSettings,
    ) -> LiveOutcome {
        if !settings.enabled {
            return LiveOutcome::Disabled;
        }
        if self.is_running() {
            debug!(media_id = event.media_id, "full sync running, ignoring change");
            return LiveOutcome::Busy;
        }

        let media = match self.anilist.media_state(event.media_id).await {
            Ok(Some(media)) => media,
            Ok(None) => return LiveOutcome::NotLinked,
            Err(err) => return self.live_failure(&event.media_id.to_string(), err.into()),
        };
        let Some(mal_id) = media.mal_id else {
            return LiveOutcome::NotLinked;
        };
        debug!(mal_id, title = %media.title, "auto-syncing entry");

        tokio::time::sleep(self.timings.live_debounce).await;

        let media = match self.anilist.media_state(event.media_id).await {
            Ok(Some(media)) => media,
            Ok(None) => AniListMedia {
                entry: None,
                ..media
            },
            Err(err) => return self.live_failure(&media.title, err.into()),
        };
        let current = match self.mal.fetch_entry(mal_id).await {
            Ok(current) => current,
            Err(err) => {
                warn!(mal_id, "reading MAL entry failed, treating as absent: {err}");
                None
            }
        };

        let Some(entry) = media.entry.as_ref() else {
            return self.live_removal(mal_id, &media.title, current, settings).await;
        };

        let source = CanonicalEntry::from_anilist(entry);
        let target = current
            .as_ref()
            .map(|status| CanonicalEntry::from_mal(&media.title, status));
        if diff(&source, target.as_ref()).is_empty() {
            self.sink
                .log(&format!("Skipped: {} (in sync)", media.title), Severity::Info);
            return LiveOutcome::Unchanged { mal_id };
        }

        let update = mal_update(&source);
        match self.mal.upsert_entry(mal_id, &update).await {
            Ok(()) => {
                let created = current.is_none();
                let action = if created {
                    ChangeAction::Created
                } else {
                    ChangeAction::Updated
                };
                self.sink
                    .log(&format!("Updated: {}", media.title), Severity::Success);
                self.audit.push(ChangeRecord::new(
                    action,
                    media.title.as_str(),
                    &current,
                    &source,
                    &update,
                ));
                LiveOutcome::Written { mal_id, created }
            }
            Err(err) => self.live_failure(&media.title, err.into()),
        }
    }

    async fn live_removal(
        &self,
        mal_id: u64,
        title: &str,
        current: Option<MalListStatus>,
        settings: LiveSettings,
    ) -> LiveOutcome {
        if !settings.deletions {
            self.sink.log(
                &format!("Ignored delete for: {title} (deletions disabled)"),
                Severity::Info,
            );
            return LiveOutcome::DeletionSuppressed { mal_id };
        }
        match self.mal.delete_entry(mal_id).await {
            Ok(()) => {
                self.sink.log(&format!("Removed: {title}"), Severity::Warn);
                self.audit.push(ChangeRecord::new(
                    ChangeAction::Deleted,
                    title,
                    &current,
                    serde_json::Value::Null,
                    "DELETE",
                ));
                LiveOutcome::Deleted { mal_id }
            }
            Err(err) => self.live_failure(title, err.into()),
        }
    }

    fn live_failure(&self, title: &str, err: SyncError) -> LiveOutcome {
        let message = format!("Failed {title}: {err}");
        self.sink.log(&message, Severity::Error);
        LiveOutcome::Failed { message }
    }
}
