use std::fs;
use std::io;
use std::path::Path;

use tracing::{info, warn};

use crate::state::epoch_secs;
use crate::types::{format_ts, Account, SyncState};

/// Name of the single-timestamp file older versions kept next to the state.
pub const LEGACY_MARKER_FILE: &str = "last_executed_date.txt";

/// Seeds first-run state from the legacy timestamp marker.
///
/// The marker is read once at startup; nothing is written here. The seeded
/// state only reaches disk through the first successful commit.
#[derive(Debug, Clone, Default)]
pub struct LegacyBootstrapper {
    marker: Option<i64>,
}

impl LegacyBootstrapper {
    pub fn new(marker: Option<i64>) -> Self {
        Self { marker }
    }

    pub fn read(path: &Path) -> Self {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Legacy marker unreadable; ignoring");
                return Self::default();
            }
        };

        let marker = raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(|ts| epoch_secs(ts).ok())
            .filter(|ts| *ts > 0);
        match marker {
            Some(ts) => info!(path = %path.display(), marker = %format_ts(ts), "Found legacy watermark"),
            None => warn!(path = %path.display(), "Invalid legacy marker; ignoring"),
        }
        Self { marker }
    }

    pub fn marker(&self) -> Option<i64> {
        self.marker
    }

    /// State to start from when `account` has no state file of its own.
    pub fn bootstrap(&self, account: &Account) -> Option<SyncState> {
        if !account.legacy {
            return None;
        }
        let ts = self.marker?;
        info!(account = %account.id, watermark = %format_ts(ts), "Bootstrapping from legacy marker");
        Some(SyncState::from_watermark(ts))
    }
}
