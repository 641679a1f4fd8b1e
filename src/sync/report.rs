use std::fmt;

use tracing::{info, warn};

use crate::types::format_ts;

/// Counters for one account run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Messages the mailbox search returned.
    pub candidates: usize,
    /// Classified and handled (labeled, not job-related, or empty).
    pub processed: usize,
    pub labeled: usize,
    /// Already seen or outside the window.
    pub skipped: usize,
    pub failed: usize,
    /// Watermark after the commit.
    pub watermark: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountOutcome {
    /// Every admitted message was handled and the state committed.
    Committed,
    /// State committed, but some messages failed and will be retried.
    Partial,
    /// Nothing committed; prior state is untouched.
    Aborted(String),
    /// Another run holds this account's lock.
    Busy,
}

impl fmt::Display for AccountOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Committed => f.write_str("success"),
            Self::Partial => f.write_str("partial"),
            Self::Aborted(reason) => write!(f, "aborted ({reason})"),
            Self::Busy => f.write_str("busy"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccountReport {
    pub account: String,
    pub outcome: AccountOutcome,
    pub stats: RunStats,
}

impl AccountReport {
    pub fn finished(account: &str, stats: RunStats) -> Self {
        let outcome = if stats.failed > 0 {
            AccountOutcome::Partial
        } else {
            AccountOutcome::Committed
        };
        Self {
            account: account.to_string(),
            outcome,
            stats,
        }
    }

    pub fn aborted(account: &str, reason: impl Into<String>) -> Self {
        Self {
            account: account.to_string(),
            outcome: AccountOutcome::Aborted(reason.into()),
            stats: RunStats::default(),
        }
    }

    pub fn busy(account: &str) -> Self {
        Self {
            account: account.to_string(),
            outcome: AccountOutcome::Busy,
            stats: RunStats::default(),
        }
    }

    pub fn log(&self) {
        let s = &self.stats;
        match &self.outcome {
            AccountOutcome::Committed | AccountOutcome::Partial => info!(
                account = %self.account,
                outcome = %self.outcome,
                candidates = s.candidates,
                processed = s.processed,
                labeled = s.labeled,
                skipped = s.skipped,
                failed = s.failed,
                watermark = %format_ts(s.watermark),
                "Account run finished"
            ),
            AccountOutcome::Aborted(_) | AccountOutcome::Busy => {
                warn!(account = %self.account, outcome = %self.outcome, "Account run did not commit")
            }
        }
    }
}

/// Outcome of one invocation across every selected account.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub accounts: Vec<AccountReport>,
}

impl RunReport {
    pub fn aborted_count(&self) -> usize {
        self.accounts
            .iter()
            .filter(|r| matches!(r.outcome, AccountOutcome::Aborted(_)))
            .count()
    }

    /// 1 when any account failed outright, else 0.
    pub fn exit_code(&self) -> i32 {
        if self.aborted_count() > 0 {
            1
        } else {
            0
        }
    }

    pub fn log_summary(&self) {
        let total = |f: fn(&RunStats) -> usize| self.accounts.iter().map(|r| f(&r.stats)).sum::<usize>();
        info!(
            accounts = self.accounts.len(),
            aborted = self.aborted_count(),
            processed = total(|s| s.processed),
            labeled = total(|s| s.labeled),
            failed = total(|s| s.failed),
            "Sync run complete"
        );
    }
}
