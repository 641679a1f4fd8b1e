use crate::config::SyncConfig;
use crate::types::{FetchWindow, SyncState};

const DAY_SECONDS: i64 = 24 * 60 * 60;

/// Where the next search should start.
///
/// With a watermark the window reopens `lookback_seconds` behind it so late
/// deliveries are caught again; dedupe keeps that margin from being
/// reprocessed. Without one it backfills `backfill_days` from `now`.
pub fn plan(prior: Option<&SyncState>, config: &SyncConfig, now: i64) -> FetchWindow {
    match prior.filter(|s| s.has_watermark()) {
        Some(state) => FetchWindow {
            since: (state.last_internal_ts - config.lookback_seconds.max(0)).max(0),
            backfill: false,
        },
        None => FetchWindow {
            since: (now - config.backfill_days.max(0) * DAY_SECONDS).max(0),
            backfill: true,
        },
    }
}
