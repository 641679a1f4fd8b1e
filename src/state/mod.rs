//! Durable per-account sync progress.
//!
//! `state.json` is only ever replaced wholesale: the new contents go to a
//! temp file in the same directory which is then renamed over the old one,
//! so a crash mid-commit leaves the previous state readable.

mod legacy;
mod lock;

pub use legacy::{LegacyBootstrapper, LEGACY_MARKER_FILE};
pub use lock::StateLock;

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::types::{Account, SyncState};

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_account(account: &Account) -> Self {
        Self::new(account.state_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Prior state, or None when there is none worth trusting. A corrupt
    /// file is logged and treated as missing so the run degrades to a
    /// first-run backfill instead of failing.
    pub fn load(&self) -> Option<SyncState> {
        match self.read() {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable state; starting fresh");
                None
            }
        }
    }

    fn read(&self) -> AppResult<Option<SyncState>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::StateCorruption(format!("reading state: {e}"))),
        };
        let raw: RawState = serde_json::from_slice(&data)
            .map_err(|e| AppError::StateCorruption(format!("decoding state: {e}")))?;
        raw.into_state().map(Some)
    }

    /// Atomically replace the persisted state.
    pub fn commit(&self, state: &SyncState) -> AppResult<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .map_err(|e| AppError::StateWrite(format!("creating {}: {e}", dir.display())))?;

        let serialized = serde_json::to_vec_pretty(state)
            .map_err(|e| AppError::StateWrite(format!("encoding state: {e}")))?;

        let mut tmp = NamedTempFile::new_in(&dir)
            .map_err(|e| AppError::StateWrite(format!("creating temp state file: {e}")))?;
        tmp.write_all(&serialized)
            .map_err(|e| AppError::StateWrite(format!("writing temp state file: {e}")))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| AppError::StateWrite(format!("syncing temp state file: {e}")))?;
        tmp.persist(&self.path)
            .map_err(|e| AppError::StateWrite(format!("replacing state file: {}", e.error)))?;

        debug!(
            path = %self.path.display(),
            watermark = state.last_internal_ts,
            seen = state.seen_ids.len(),
            "State committed"
        );
        Ok(())
    }
}

/// On-disk shape. Older state files were written with fractional seconds
/// and nulls, so numbers are read as floats and normalised here.
#[derive(Debug, Deserialize)]
struct RawState {
    #[serde(default)]
    last_internal_ts: Option<f64>,
    #[serde(default)]
    seen_ids: BTreeMap<String, f64>,
    #[serde(default)]
    last_run_at: Option<f64>,
}

impl RawState {
    fn into_state(self) -> AppResult<SyncState> {
        let last_internal_ts = match self.last_internal_ts {
            Some(ts) => epoch_secs(ts)?,
            None => 0,
        };
        let seen_ids = self
            .seen_ids
            .into_iter()
            .map(|(id, ts)| epoch_secs(ts).map(|ts| (id, ts)))
            .collect::<AppResult<BTreeMap<_, _>>>()?;
        let last_run_at = self.last_run_at.map(epoch_secs).transpose()?;
        Ok(SyncState {
            last_internal_ts,
            seen_ids,
            last_run_at,
        })
    }
}

pub(crate) fn epoch_secs(value: f64) -> AppResult<i64> {
    if !value.is_finite() || value < 0.0 {
        return Err(AppError::StateCorruption(format!("invalid timestamp {value}")));
    }
    Ok(value.floor() as i64)
}
