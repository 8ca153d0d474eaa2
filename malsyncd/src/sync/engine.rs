use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use malsync_core::{AniListError, KeyValueStore, MalError, StoreError, TokenError};
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

use super::progress::{AuditTrail, ProgressSink, Severity};
use super::remote::{AniListCollection, MalList};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("authorization error: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("cancelled by user")]
    Cancelled,
}

impl From<TokenError> for SyncError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Store(err) => SyncError::Store(err),
            err if err.is_config_error() => SyncError::Config(err.to_string()),
            err => SyncError::Auth(err.to_string()),
        }
    }
}

impl From<MalError> for SyncError {
    fn from(err: MalError) -> Self {
        match err {
            MalError::Auth(err) => err.into(),
            err if err.classification() == Some(malsync_core::ApiErrorClass::Auth) => {
                SyncError::Auth(err.to_string())
            }
            err => SyncError::Network(err.to_string()),
        }
    }
}

impl From<AniListError> for SyncError {
    fn from(err: AniListError) -> Self {
        match &err {
            AniListError::Api { status, .. } if status.as_u16() == 401 || status.as_u16() == 403 => {
                SyncError::Auth(err.to_string())
            }
            _ => SyncError::Network(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// AniList is the source of truth; MAL receives writes and deletions.
    #[default]
    AniListToMal,
    /// One-way import of the MAL list into AniList.
    MalToAniList,
}

impl Direction {
    pub fn as_pref_str(self) -> &'static str {
        match self {
            Direction::AniListToMal => "ANI_TO_MAL",
            Direction::MalToAniList => "MAL_TO_ANI",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ANI_TO_MAL" => Some(Direction::AniListToMal),
            "MAL_TO_ANI" => Some(Direction::MalToAniList),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::AniListToMal => f.write_str("AniList -> MAL"),
            Direction::MalToAniList => f.write_str("MAL -> AniList"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletionPolicy {
    #[default]
    Disabled,
    /// Delete only MAL ids a previous run linked to an AniList entry.
    Safe,
    /// Delete every MAL id with no AniList counterpart.
    Mirror,
}

impl DeletionPolicy {
    pub fn from_flags(mirror: bool, safe: bool) -> Self {
        if mirror {
            DeletionPolicy::Mirror
        } else if safe {
            DeletionPolicy::Safe
        } else {
            DeletionPolicy::Disabled
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetId {
    Mal(u64),
    AniList(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineTimings {
    pub write_pacing: Duration,
    pub finalize_delay: Duration,
    pub live_debounce: Duration,
}

impl Default for EngineTimings {
    fn default() -> Self {
        Self {
            write_pacing: Duration::from_millis(500),
            finalize_delay: Duration::from_millis(2000),
            live_debounce: Duration::from_millis(1000),
        }
    }
}

impl EngineTimings {
    pub fn immediate() -> Self {
        Self {
            write_pacing: Duration::ZERO,
            finalize_delay: Duration::ZERO,
            live_debounce: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounts {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub direction: Direction,
    pub state: RunState,
    pub counts: SyncCounts,
    pub processed: usize,
    pub total: usize,
}

impl SyncReport {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            state: RunState::Running,
            counts: SyncCounts::default(),
            processed: 0,
            total: 0,
        }
    }

    pub fn summary(&self) -> String {
        let label = match (self.state, self.direction) {
            (RunState::Completed, Direction::AniListToMal) => "Done",
            (RunState::Completed, Direction::MalToAniList) => "Import complete",
            (RunState::Cancelled, _) => "Cancelled",
            _ => "Failed",
        };
        let c = &self.counts;
        format!(
            "{label}. C:{} U:{} D:{} S:{} F:{}",
            c.created, c.updated, c.deleted, c.skipped, c.failed
        )
    }
}

pub struct SyncEngine {
    pub(super) mal: Arc<dyn MalList>,
    pub(super) anilist: Arc<dyn AniListCollection>,
    pub(super) store: Arc<dyn KeyValueStore>,
    pub(super) sink: Arc<dyn ProgressSink>,
    pub(super) audit: Arc<AuditTrail>,
    pub(super) timings: EngineTimings,
    pub(super) dedup: Mutex<HashSet<TargetId>>,
    running: AtomicBool,
    state: watch::Sender<RunState>,
}

impl SyncEngine {
    pub fn new(
        mal: Arc<dyn MalList>,
        anilist: Arc<dyn AniListCollection>,
        store: Arc<dyn KeyValueStore>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            mal,
            anilist,
            store,
            sink,
            audit: Arc::new(AuditTrail::default()),
            timings: EngineTimings::default(),
            dedup: Mutex::new(HashSet::new()),
            running: AtomicBool::new(false),
            state: watch::Sender::new(RunState::Idle),
        }
    }

    pub fn with_timings(mut self, timings: EngineTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub async fn clear_session_dedup(&self) {
        self.dedup.lock().await.clear();
    }

    pub async fn session_dedup_len(&self) -> usize {
        self.dedup.lock().await.len()
    }

    /// Runs one full reconciliation. Returns `None` without side effects when
    /// another run is in progress.
    pub async fn run_full(
        &self,
        direction: Direction,
        policy: DeletionPolicy,
        cancel: &CancellationToken,
    ) -> Option<SyncReport> {
        if self.running.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.state.send_replace(RunState::Running);
        self.sink.progress(0, "Starting...");
        self.sink
            .log(&format!("Starting sync ({direction})..."), Severity::Info);

        let mut report = SyncReport::new(direction);
        let result = match direction {
            Direction::AniListToMal => self.sync_to_mal(policy, cancel, &mut report).await,
            Direction::MalToAniList => self.import_from_mal(cancel, &mut report).await,
        };

        report.state = match result {
            Ok(()) if cancel.is_cancelled() => RunState::Cancelled,
            Ok(()) => RunState::Completed,
            Err(SyncError::Cancelled) => RunState::Cancelled,
            Err(err) => {
                self.sink
                    .log(&format!("Sync failed: {err}"), Severity::Error);
                RunState::Failed
            }
        };
        let severity = match report.state {
            RunState::Completed => Severity::Success,
            RunState::Failed => Severity::Error,
            _ => Severity::Warn,
        };
        self.sink.log(&report.summary(), severity);
        self.state.send_replace(report.state);

        self.finalize().await;
        Some(report)
    }

    /// Releases the run slot at once; the reset to `Idle` follows the delay
    /// unless a newer run has taken the slot by then.
    async fn finalize(&self) {
        self.running.store(false, Ordering::SeqCst);
        tokio::time::sleep(self.timings.finalize_delay).await;
        if self.is_running() {
            return;
        }
        self.sink.progress(0, "");
        self.state.send_if_modified(|state| {
            if *state == RunState::Running {
                return false;
            }
            *state = RunState::Idle;
            true
        });
    }

    pub(super) async fn pace(&self) {
        tokio::time::sleep(self.timings.write_pacing).await;
    }
}

pub(super) fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), SyncError> {
    if cancel.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

pub(super) fn percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((processed as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
