use crate::accounts::AccountRegistry;
use crate::classify::OpenAiClassifier;
use crate::cli::Cli;
use crate::config::{ClassifierConfig, SyncConfig};
use crate::onboarding;
use crate::state::{LegacyBootstrapper, LEGACY_MARKER_FILE};
use crate::sync::{AccountRunner, GmailConnector};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Exit code when Ctrl-C stops a run before it finishes.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Run one invocation and return the process exit code.
pub async fn run(cli: Cli) -> Result<i32> {
    let config = SyncConfig::load();
    let mut registry = AccountRegistry::load(&config.data_dir)?;
    info!(data_dir = %config.data_dir.display(), "Using data directory");

    if cli.add_account {
        let account = onboarding::onboard_account(&mut registry).await?;
        info!(account = %account.id, "Account added");
        return Ok(0);
    }

    let accounts = registry.resolve(&cli.accounts)?;
    if !registry.has_registry() && !accounts.iter().any(|a| a.token_path().exists()) {
        warn!("No accounts configured. Run with --add-account to onboard.");
        return Ok(1);
    }

    // Read once; nothing past this point looks at the marker file again.
    let legacy = LegacyBootstrapper::read(&config.data_dir.join(LEGACY_MARKER_FILE));

    let classifier = OpenAiClassifier::new(
        ClassifierConfig::load()?,
        config.http_timeout,
        config.retry_backoff,
    )
    .context("building classifier")?;
    let runner = AccountRunner::new(
        Arc::new(GmailConnector::new(&config)),
        Arc::new(classifier),
        config.clone(),
        legacy,
    );

    info!(
        accounts = accounts.len(),
        parallel = cli.parallel,
        lookback_seconds = config.lookback_seconds,
        backfill_days = config.backfill_days,
        "Starting sync run"
    );

    tokio::select! {
        report = runner.run_all(&accounts, cli.parallel) => {
            report.log_summary();
            Ok(report.exit_code())
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted before commit; unfinished accounts will be redone next run");
            Ok(INTERRUPTED_EXIT_CODE)
        }
    }
}
