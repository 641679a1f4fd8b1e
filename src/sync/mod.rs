//! Incremental sync for one account.
//!
//! A run loads prior state, searches the mailbox from the planned window,
//! admits every candidate whose id is not in the dedupe set, classifies and
//! labels it, and finally commits a new watermark and dedupe set built only
//! from messages that made it all the way through. Any error before the
//! loop leaves the stored state untouched. A fatal error inside the loop
//! still commits the messages finished so far before it is returned.

mod planner;
mod report;
mod runner;

pub use planner::plan;
pub use report::{AccountOutcome, AccountReport, RunReport, RunStats};
pub use runner::{AccountRunner, GmailConnector, MailboxConnector};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::classify::Classifier;
use crate::config::SyncConfig;
use crate::errors::AppResult;
use crate::gmail::Mailbox;
use crate::sanitize::truncate_body;
use crate::state::{LegacyBootstrapper, StateStore};
use crate::types::{
    format_ts, now_ts, Account, JobStatus, MessageContent, MessageSummary, SyncState,
};

/// What happened to one admitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handled {
    Labeled(JobStatus),
    NotJobRelated,
    /// No readable body; nothing to classify.
    Empty,
}

pub struct SyncEngine {
    mailbox: Arc<dyn Mailbox>,
    classifier: Arc<dyn Classifier>,
    config: SyncConfig,
    clock: fn() -> i64,
}

impl SyncEngine {
    pub fn new(mailbox: Arc<dyn Mailbox>, classifier: Arc<dyn Classifier>, config: SyncConfig) -> Self {
        Self {
            mailbox,
            classifier,
            config,
            clock: now_ts,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub async fn run(&self, account: &Account, legacy: &LegacyBootstrapper) -> AppResult<RunStats> {
        let started = Instant::now();
        let store = StateStore::for_account(account);
        let prior = store.load().or_else(|| legacy.bootstrap(account));
        let now = (self.clock)();

        let window = plan(prior.as_ref(), &self.config, now);
        if window.backfill {
            info!(
                account = %account.id,
                days = self.config.backfill_days,
                since = %format_ts(window.since),
                "No prior watermark; backfilling"
            );
        } else {
            info!(
                account = %account.id,
                since = %format_ts(window.since),
                "Fetching with lookback cushion"
            );
        }
        let prior = prior.unwrap_or_default();

        let candidates = self
            .mailbox
            .search(window.since, self.config.query_filter.as_deref())
            .await?;
        let mut stats = RunStats {
            candidates: candidates.len(),
            ..RunStats::default()
        };
        info!(account = %account.id, candidates = candidates.len(), "Fetched candidates");

        let mut batch_ids = HashSet::new();
        let mut succeeded: Vec<MessageSummary> = Vec::new();
        let mut earliest_failure: Option<i64> = None;
        let mut label_ids: HashMap<JobStatus, String> = HashMap::new();

        let mut remaining = candidates.into_iter();
        while let Some(msg) = remaining.next() {
            if msg.internal_ts < window.since {
                debug!(message = %msg.id, ts = msg.internal_ts, "Outside window; skipping");
                stats.skipped += 1;
                continue;
            }
            if !admit(&prior, &msg) || !batch_ids.insert(msg.id.clone()) {
                debug!(message = %msg.id, "Already processed; skipping");
                stats.skipped += 1;
                continue;
            }

            match self.handle(&msg, &mut label_ids).await {
                Ok(handled) => {
                    stats.processed += 1;
                    if let Handled::Labeled(_) = handled {
                        stats.labeled += 1;
                    }
                    succeeded.push(msg);
                }
                Err(e) if e.is_fatal_for_account() => {
                    // Keep what already went through; the failing message and
                    // everything not yet attempted stay above the watermark.
                    let unattempted = remaining
                        .filter(|m| m.internal_ts >= window.since && admit(&prior, m))
                        .map(|m| m.internal_ts)
                        .chain(std::iter::once(msg.internal_ts))
                        .chain(earliest_failure)
                        .min();
                    warn!(account = %account.id, message = %msg.id, error = %e, "Stopping run; committing finished messages");
                    let next = advance(
                        &prior,
                        &succeeded,
                        unattempted,
                        self.config.lookback_seconds,
                        now,
                    );
                    if let Err(commit_err) = store.commit(&next) {
                        warn!(account = %account.id, error = %commit_err, "Commit after fatal error failed");
                    }
                    return Err(e);
                }
                Err(e) => {
                    warn!(account = %account.id, message = %msg.id, error = %e, "Message failed; will retry next run");
                    stats.failed += 1;
                    earliest_failure = Some(earliest_failure.map_or(msg.internal_ts, |t| t.min(msg.internal_ts)));
                }
            }
        }

        let next = advance(
            &prior,
            &succeeded,
            earliest_failure,
            self.config.lookback_seconds,
            now,
        );
        store.commit(&next)?;
        stats.watermark = next.last_internal_ts;

        debug!(
            account = %account.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            seen = next.seen_ids.len(),
            "Run committed"
        );
        Ok(stats)
    }

    async fn handle(
        &self,
        msg: &MessageSummary,
        label_ids: &mut HashMap<JobStatus, String>,
    ) -> AppResult<Handled> {
        let content = self.mailbox.fetch_content(&msg.id).await?;
        if content.body.trim().is_empty() {
            debug!(message = %msg.id, "Empty body; marking processed");
            return Ok(Handled::Empty);
        }

        let input = MessageContent {
            body: truncate_body(&content.body, self.config.max_body_chars),
            ..content
        };
        let result = self.classifier.classify(&input).await?;
        info!(
            message = %msg.id,
            subject = %input.subject,
            status = %result.status,
            "Classified"
        );

        let Some(label_name) = result.status.label_name() else {
            return Ok(Handled::NotJobRelated);
        };
        let label_id = match label_ids.get(&result.status) {
            Some(id) => id.clone(),
            None => {
                let id = self.mailbox.ensure_label(&label_name).await?;
                label_ids.insert(result.status, id.clone());
                id
            }
        };
        self.mailbox.apply_label(&msg.id, &label_id).await?;
        Ok(Handled::Labeled(result.status))
    }
}

/// A candidate is new unless its id is in the dedupe set. That covers both
/// the redelivered-behind-the-watermark case and plain duplicates, while
/// still letting late arrivals with unseen ids through.
pub fn admit(state: &SyncState, msg: &MessageSummary) -> bool {
    !state.seen_ids.contains_key(&msg.id)
}

/// Build the state to commit after a run.
///
/// The watermark moves to the newest handled message but never past a
/// failed one (so the failure stays inside the next window) and never
/// backwards. Successful ids join the dedupe set, which is then pruned to
/// the lookback cushion.
pub fn advance(
    prior: &SyncState,
    succeeded: &[MessageSummary],
    earliest_failure: Option<i64>,
    lookback_seconds: i64,
    now: i64,
) -> SyncState {
    let mut next = prior.clone();
    for msg in succeeded {
        next.seen_ids.insert(msg.id.clone(), msg.internal_ts);
    }

    // Everything in the dedupe set has been handled, including entries an
    // earlier run left above a capped watermark.
    let newest = next.seen_ids.values().copied().max().unwrap_or(0);
    let mut watermark = prior.last_internal_ts.max(newest);
    if let Some(failed_ts) = earliest_failure {
        watermark = watermark.min(failed_ts - 1).max(prior.last_internal_ts);
    }
    next.last_internal_ts = watermark;
    next.last_run_at = Some(now);

    let pruned = next.prune(lookback_seconds);
    if pruned > 0 {
        debug!(pruned, cutoff = %format_ts(watermark - lookback_seconds), "Pruned dedupe entries");
    }
    next
}
