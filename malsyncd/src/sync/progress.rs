use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{error, info, warn};

pub const DEFAULT_AUDIT_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warn,
    Error,
}

/// Receives user-facing log lines and progress updates from the engine.
pub trait ProgressSink: Send + Sync {
    fn log(&self, message: &str, severity: Severity);
    fn progress(&self, percent: u8, message: &str);
}

/// Forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn log(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info => info!("{message}"),
            Severity::Success => info!(outcome = "success", "{message}"),
            Severity::Warn => warn!("{message}"),
            Severity::Error => error!("{message}"),
        }
    }

    fn progress(&self, percent: u8, message: &str) {
        if !message.is_empty() {
            info!(percent, "{message}");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
    ImportFromMal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub at_unix: i64,
    pub action: ChangeAction,
    pub title: String,
    pub before: Value,
    pub after: Value,
    pub payload: Value,
}

impl ChangeRecord {
    pub fn new(
        action: ChangeAction,
        title: impl Into<String>,
        before: impl Serialize,
        after: impl Serialize,
        payload: impl Serialize,
    ) -> Self {
        Self {
            at_unix: OffsetDateTime::now_utc().unix_timestamp(),
            action,
            title: title.into(),
            before: serde_json::to_value(before).unwrap_or_default(),
            after: serde_json::to_value(after).unwrap_or_default(),
            payload: serde_json::to_value(payload).unwrap_or_default(),
        }
    }
}

/// Bounded change log, newest record first.
#[derive(Debug)]
pub struct AuditTrail {
    records: Mutex<VecDeque<ChangeRecord>>,
    capacity: usize,
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditTrail {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, record: ChangeRecord) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push_front(record);
        records.truncate(self.capacity);
    }

    pub fn snapshot(&self) -> Vec<ChangeRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot())
    }
}
