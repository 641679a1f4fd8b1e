use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Root of the label hierarchy every status label lives under.
pub const LABEL_ROOT: &str = "Jobs";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    /// Mailbox address; doubles as the account key.
    pub id: String,
    /// Directory holding `token.json`, `state.json` and the run lock.
    pub dir: PathBuf,
    /// Whether the legacy timestamp marker may seed this account's state.
    pub legacy: bool,
}

impl Account {
    pub fn token_path(&self) -> PathBuf {
        self.dir.join("token.json")
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join("state.json")
    }
}

/// Per-account sync progress, persisted as `state.json`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Highest delivery timestamp (epoch seconds) fully processed. 0 = never.
    pub last_internal_ts: i64,
    /// Message id -> delivery timestamp for messages processed inside the
    /// lookback window.
    pub seen_ids: BTreeMap<String, i64>,
    pub last_run_at: Option<i64>,
}

impl SyncState {
    pub fn from_watermark(last_internal_ts: i64) -> Self {
        Self {
            last_internal_ts,
            ..Self::default()
        }
    }

    pub fn has_watermark(&self) -> bool {
        self.last_internal_ts > 0
    }

    /// Drop dedupe entries older than the lookback cushion behind the
    /// watermark. Returns how many were removed.
    pub fn prune(&mut self, lookback_seconds: i64) -> usize {
        if !self.has_watermark() {
            return 0;
        }
        let cutoff = self.last_internal_ts - lookback_seconds;
        let before = self.seen_ids.len();
        self.seen_ids.retain(|_, ts| *ts >= cutoff);
        before - self.seen_ids.len()
    }
}

/// What the mailbox search yields: enough to run the admission rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageSummary {
    pub id: String,
    /// Provider delivery time in epoch seconds.
    pub internal_ts: i64,
}

#[derive(Clone, Debug, Default)]
pub struct MessageContent {
    pub subject: String,
    pub from: String,
    pub body: String,
}

/// Time range to query. `since` is a hint; the engine re-checks exact
/// timestamps itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchWindow {
    pub since: i64,
    pub backfill: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Applied,
    Holding,
    Assessment,
    Interview,
    Offer,
    Rejected,
    /// Job-related, but no specific status (also the catch-all for
    /// unrecognised service output).
    Other,
    NotJobRelated,
}

impl JobStatus {
    pub const LABELED: [JobStatus; 7] = [
        JobStatus::Applied,
        JobStatus::Holding,
        JobStatus::Assessment,
        JobStatus::Interview,
        JobStatus::Offer,
        JobStatus::Rejected,
        JobStatus::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "Applied",
            Self::Holding => "Holding",
            Self::Assessment => "Assessment",
            Self::Interview => "Interview",
            Self::Offer => "Offer",
            Self::Rejected => "Rejected",
            Self::Other => "Other",
            Self::NotJobRelated => "Not-Job-Related",
        }
    }

    pub fn is_job_related(&self) -> bool {
        !matches!(self, Self::NotJobRelated)
    }

    /// Hierarchical label name, e.g. `Jobs/Interview`. None for messages
    /// that get no label.
    pub fn label_name(&self) -> Option<String> {
        self.is_job_related()
            .then(|| format!("{}/{}", LABEL_ROOT, self.as_str()))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationResult {
    pub status: JobStatus,
    pub rationale: Option<String>,
}

impl ClassificationResult {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            rationale: None,
        }
    }
}

pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

pub fn format_ts(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}
