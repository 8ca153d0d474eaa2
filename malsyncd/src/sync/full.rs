use std::collections::{HashMap, HashSet};

use malsync_core::{AniListEntry, MalListItem};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::diff::{diff, mal_update};
use super::engine::{
    DeletionPolicy, SyncEngine, SyncError, SyncReport, TargetId, ensure_not_cancelled, percent,
};
use super::ledger::HistoryLedger;
use super::normalize::{CanonicalEntry, score_to_anilist};
use super::progress::{ChangeAction, ChangeRecord, Severity};

/// Both lists of one run, keyed for lookups. Rebuilt every run.
struct RunLists {
    /// MAL ids in fetch order, without repeats.
    mal_ids: Vec<u64>,
    mal_by_id: HashMap<u64, MalListItem>,
    anilist: Vec<AniListEntry>,
    anilist_by_id: HashMap<u64, usize>,
    /// MAL id to AniList media id, from entries that carry `idMal`.
    mal_to_anilist: HashMap<u64, u64>,
}

impl RunLists {
    fn build(mal_items: Vec<MalListItem>, anilist: Vec<AniListEntry>) -> Self {
        let mut seen = HashSet::new();
        let mut mal_ids = Vec::with_capacity(mal_items.len());
        let mut mal_by_id = HashMap::with_capacity(mal_items.len());
        for item in mal_items {
            if seen.insert(item.node.id) {
                mal_ids.push(item.node.id);
            }
            mal_by_id.insert(item.node.id, item);
        }

        let mut anilist_by_id = HashMap::with_capacity(anilist.len());
        let mut mal_to_anilist = HashMap::new();
        for (index, entry) in anilist.iter().enumerate() {
            anilist_by_id.insert(entry.media_id, index);
            if let Some(mal_id) = entry.mal_id {
                mal_to_anilist.insert(mal_id, entry.media_id);
            }
        }

        Self {
            mal_ids,
            mal_by_id,
            anilist,
            anilist_by_id,
            mal_to_anilist,
        }
    }

    fn anilist_entry(&self, media_id: u64) -> Option<&AniListEntry> {
        self.anilist_by_id
            .get(&media_id)
            .and_then(|index| self.anilist.get(*index))
    }
}

impl SyncEngine {
    async fn fetch_lists(&self, cancel: &CancellationToken) -> Result<RunLists, SyncError> {
        self.sink.progress(0, "Fetching MAL list...");
        let mal_items = self.mal.fetch_full_list().await?;
        self.sink.log(
            &format!("Fetched {} entries from MAL", mal_items.len()),
            Severity::Info,
        );
        ensure_not_cancelled(cancel)?;

        self.sink.progress(0, "Fetching AniList...");
        let anilist = self.anilist.fetch_collection().await?;
        self.sink.log(
            &format!("Fetched {} entries from AniList", anilist.len()),
            Severity::Info,
        );
        ensure_not_cancelled(cancel)?;

        Ok(RunLists::build(mal_items, anilist))
    }

    pub(super) async fn sync_to_mal(
        &self,
        policy: DeletionPolicy,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let lists = self.fetch_lists(cancel).await?;
        let history = HistoryLedger::load(self.store.as_ref()).await?;
        let mut observed = HistoryLedger::default();
        report.total = lists.anilist.len();

        for entry in &lists.anilist {
            if cancel.is_cancelled() {
                break;
            }
            report.processed += 1;

            let Some(mal_id) = entry.mal_id else {
                debug!(media_id = entry.media_id, "no MAL id, skipping");
                report.counts.skipped += 1;
                continue;
            };
            observed.record(entry.media_id, mal_id);

            let pct = percent(report.processed, report.total);
            self.sink
                .progress(pct, &format!("{pct}% - Syncing: {}", entry.title));

            if self.dedup.lock().await.contains(&TargetId::Mal(mal_id)) {
                report.counts.skipped += 1;
                continue;
            }

            let source = CanonicalEntry::from_anilist(entry);
            let current = lists
                .mal_by_id
                .get(&mal_id)
                .map(|item| item.list_status.clone().unwrap_or_default());
            let target = current
                .as_ref()
                .map(|status| CanonicalEntry::from_mal(&entry.title, status));
            let reasons = diff(&source, target.as_ref());
            if reasons.is_empty() {
                report.counts.skipped += 1;
                continue;
            }

            let update = mal_update(&source);
            debug!(mal_id, ?reasons, "writing MAL entry");
            match self.mal.upsert_entry(mal_id, &update).await {
                Ok(()) => {
                    self.dedup.lock().await.insert(TargetId::Mal(mal_id));
                    let action = if current.is_none() {
                        report.counts.created += 1;
                        ChangeAction::Created
                    } else {
                        report.counts.updated += 1;
                        ChangeAction::Updated
                    };
                    let verb = match action {
                        ChangeAction::Created => "Created",
                        _ => "Updated",
                    };
                    self.sink
                        .log(&format!("{verb}: {}", entry.title), Severity::Success);
                    self.audit.push(ChangeRecord::new(
                        action,
                        entry.title.as_str(),
                        &current,
                        &source,
                        &update,
                    ));
                    self.pace().await;
                }
                Err(err) => {
                    report.counts.failed += 1;
                    let err = SyncError::from(err);
                    self.sink
                        .log(&format!("Failed {}: {err}", entry.title), Severity::Error);
                }
            }
        }

        let loop_cancelled = cancel.is_cancelled();
        if !loop_cancelled && policy != DeletionPolicy::Disabled {
            self.propagate_deletions(policy, &lists, &history, cancel, report)
                .await;
        }
        if !loop_cancelled {
            observed.save(self.store.as_ref()).await?;
        }
        Ok(())
    }

    async fn propagate_deletions(
        &self,
        policy: DeletionPolicy,
        lists: &RunLists,
        history: &HistoryLedger,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) {
        self.sink.progress(100, "Checking deletions...");
        for &mal_id in &lists.mal_ids {
            if cancel.is_cancelled() {
                break;
            }
            if lists.mal_to_anilist.contains_key(&mal_id) {
                continue;
            }
            let mode = match policy {
                DeletionPolicy::Mirror => "mirror mode",
                DeletionPolicy::Safe if history.knows_mal_id(mal_id) => "safe mode",
                _ => continue,
            };

            match self.mal.delete_entry(mal_id).await {
                Ok(()) => {
                    report.counts.deleted += 1;
                    self.sink
                        .log(&format!("Deleted MAL ID: {mal_id} ({mode})"), Severity::Warn);
                    let before = lists
                        .mal_by_id
                        .get(&mal_id)
                        .and_then(|item| item.list_status.as_ref());
                    self.audit.push(ChangeRecord::new(
                        ChangeAction::Deleted,
                        format!("MAL ID {mal_id}"),
                        before,
                        serde_json::Value::Null,
                        "DELETE",
                    ));
                    self.pace().await;
                }
                Err(err) => {
                    report.counts.failed += 1;
                    self.sink.log(
                        &format!("Failed delete ID {mal_id}: {}", SyncError::from(err)),
                        Severity::Error,
                    );
                }
            }
        }
    }

    pub(super) async fn import_from_mal(
        &self,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let lists = self.fetch_lists(cancel).await?;
        report.total = lists.mal_ids.len();

        for &mal_id in &lists.mal_ids {
            if cancel.is_cancelled() {
                break;
            }
            report.processed += 1;
            let pct = percent(report.processed, report.total);
            self.sink
                .progress(pct, &format!("{pct}% - Checking MAL ID: {mal_id}"));

            let media_id = match lists.mal_to_anilist.get(&mal_id) {
                Some(media_id) => *media_id,
                None => match self.anilist.find_by_mal_id(mal_id).await {
                    Ok(Some(media_id)) => media_id,
                    Ok(None) => {
                        report.counts.skipped += 1;
                        self.sink.log(
                            &format!("Skipped MAL ID {mal_id}: no AniList match"),
                            Severity::Warn,
                        );
                        continue;
                    }
                    Err(err) => {
                        report.counts.skipped += 1;
                        self.sink.log(
                            &format!("Skipped MAL ID {mal_id}: lookup failed: {err}"),
                            Severity::Warn,
                        );
                        continue;
                    }
                },
            };

            if self.dedup.lock().await.contains(&TargetId::AniList(media_id)) {
                report.counts.skipped += 1;
                continue;
            }

            let Some(item) = lists.mal_by_id.get(&mal_id) else {
                continue;
            };
            let status = item.list_status.clone().unwrap_or_default();
            let source = CanonicalEntry::from_mal(&item.node.title, &status);
            let current = lists.anilist_entry(media_id);
            let target = current.map(CanonicalEntry::from_anilist);
            if diff(&source, target.as_ref()).is_empty() {
                report.counts.skipped += 1;
                continue;
            }

            match self.write_anilist(media_id, &source).await {
                Ok(()) => {
                    self.dedup.lock().await.insert(TargetId::AniList(media_id));
                    let verb = if current.is_none() {
                        report.counts.created += 1;
                        "Imported to AniList"
                    } else {
                        report.counts.updated += 1;
                        "Updated AniList"
                    };
                    self.sink.log(
                        &format!("{verb}: {} (ID {media_id})", item.node.title),
                        Severity::Success,
                    );
                    self.audit.push(ChangeRecord::new(
                        ChangeAction::ImportFromMal,
                        item.node.title.as_str(),
                        &target,
                        &status,
                        "UPDATE_ANILIST",
                    ));
                    self.pace().await;
                }
                Err(err) => {
                    report.counts.failed += 1;
                    self.sink.log(
                        &format!("Failed to import ID {media_id}: {err}"),
                        Severity::Error,
                    );
                }
            }
        }
        Ok(())
    }

    async fn write_anilist(&self, media_id: u64, source: &CanonicalEntry) -> Result<(), SyncError> {
        self.anilist
            .save_entry(
                media_id,
                source.status.map(|s| s.to_anilist()),
                score_to_anilist(source.score),
                source.progress,
            )
            .await?;
        if source.rewatch_count > 0 {
            self.anilist
                .save_repeat(media_id, source.rewatch_count)
                .await?;
        }
        Ok(())
    }
}

