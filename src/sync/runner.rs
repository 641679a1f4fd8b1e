use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{info, warn};

use super::{AccountReport, RunReport, SyncEngine};
use crate::classify::Classifier;
use crate::config::SyncConfig;
use crate::errors::{AppError, AppResult};
use crate::gmail::{GmailClient, Mailbox, TokenSource};
use crate::oauth::RefreshingToken;
use crate::retry::RetryPolicy;
use crate::state::{LegacyBootstrapper, StateLock};
use crate::types::{now_ts, Account};

/// Opens an authenticated mailbox session for one account.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn connect(&self, account: &Account) -> AppResult<Arc<dyn Mailbox>>;
}

/// Builds a Gmail client that refreshes the account's access token as the
/// run goes on.
pub struct GmailConnector {
    timeout: Duration,
    retry: RetryPolicy,
}

impl GmailConnector {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            timeout: config.http_timeout,
            retry: RetryPolicy::new(3, Duration::from_secs(2)),
        }
    }
}

#[async_trait]
impl MailboxConnector for GmailConnector {
    async fn connect(&self, account: &Account) -> AppResult<Arc<dyn Mailbox>> {
        let started = Instant::now();
        let tokens = Arc::new(RefreshingToken::new(account.clone()));
        // Surface a revoked credential before the run starts.
        tokens.access_token().await?;
        info!(account = %account.id, elapsed_ms = started.elapsed().as_millis() as u64, "OAuth token obtained");
        let client = GmailClient::new(tokens, self.timeout, self.retry)?;
        Ok(Arc::new(client))
    }
}

/// Runs the sync engine for each selected account. Accounts never share
/// state or failures: a lock conflict, auth error or abort in one is
/// reported and the rest carry on.
pub struct AccountRunner {
    connector: Arc<dyn MailboxConnector>,
    classifier: Arc<dyn Classifier>,
    config: SyncConfig,
    legacy: LegacyBootstrapper,
    clock: fn() -> i64,
}

impl AccountRunner {
    pub fn new(
        connector: Arc<dyn MailboxConnector>,
        classifier: Arc<dyn Classifier>,
        config: SyncConfig,
        legacy: LegacyBootstrapper,
    ) -> Self {
        Self {
            connector,
            classifier,
            config,
            legacy,
            clock: now_ts,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub async fn run_all(&self, accounts: &[Account], parallel: bool) -> RunReport {
        let reports = if parallel {
            join_all(accounts.iter().map(|account| self.run_account(account))).await
        } else {
            let mut reports = Vec::with_capacity(accounts.len());
            for account in accounts {
                reports.push(self.run_account(account).await);
            }
            reports
        };

        for report in &reports {
            report.log();
        }
        RunReport { accounts: reports }
    }

    pub async fn run_account(&self, account: &Account) -> AccountReport {
        info!(account = %account.id, "Starting sync");

        let _lock = match StateLock::acquire(&account.dir) {
            Ok(lock) => lock,
            Err(AppError::LockBusy(path)) => {
                warn!(account = %account.id, lock = %path, "Another run holds this account; skipping");
                return AccountReport::busy(&account.id);
            }
            Err(e) => return AccountReport::aborted(&account.id, e.to_string()),
        };

        let mailbox = match self.connector.connect(account).await {
            Ok(mailbox) => mailbox,
            Err(e) => {
                warn!(account = %account.id, error = %e, "Could not open mailbox");
                return AccountReport::aborted(&account.id, e.to_string());
            }
        };

        let engine = SyncEngine::new(mailbox, Arc::clone(&self.classifier), self.config.clone())
            .with_clock(self.clock);
        match engine.run(account, &self.legacy).await {
            Ok(stats) => AccountReport::finished(&account.id, stats),
            Err(e) => {
                warn!(account = %account.id, error = %e, "Account sync aborted");
                AccountReport::aborted(&account.id, e.to_string())
            }
        }
    }
}
