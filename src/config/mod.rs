use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{AppError, AppResult};

pub const DEFAULT_LOOKBACK_SECONDS: i64 = 2 * 24 * 60 * 60;
pub const DEFAULT_BACKFILL_DAYS: i64 = 14;
pub const DEFAULT_MAX_BODY_CHARS: usize = 22_000;

/// Knobs for the watermark, dedupe window and fetch planning. Everything
/// comes from the environment (or `.env`) and falls back to defaults when a
/// value is missing or does not parse.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub lookback_seconds: i64,
    pub backfill_days: i64,
    pub max_body_chars: usize,
    pub query_filter: Option<String>,
    pub data_dir: PathBuf,
    pub http_timeout: Duration,
    pub retry_backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookback_seconds: DEFAULT_LOOKBACK_SECONDS,
            backfill_days: DEFAULT_BACKFILL_DAYS,
            max_body_chars: DEFAULT_MAX_BODY_CHARS,
            query_filter: None,
            data_dir: PathBuf::from("."),
            http_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(60),
        }
    }
}

impl SyncConfig {
    pub fn load() -> Self {
        let defaults = Self::default();
        Self {
            lookback_seconds: env_parse("LOOKBACK_SECONDS").unwrap_or(defaults.lookback_seconds),
            backfill_days: env_parse("BACKFILL_DAYS").unwrap_or(defaults.backfill_days),
            max_body_chars: env_parse("MAX_BODY_CHARS").unwrap_or(defaults.max_body_chars),
            query_filter: env::var("JOBSYNC_QUERY")
                .ok()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty()),
            data_dir: env::var("JOBSYNC_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            http_timeout: env_parse("HTTP_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            retry_backoff: env_parse("RETRY_BACKOFF_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_backoff),
        }
    }
}

/// Settings for the text-classification service.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_attempts: u32,
}

impl ClassifierConfig {
    pub fn load() -> AppResult<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::Config("OPENAI_API_KEY missing".into()))?;
        Ok(Self {
            api_key,
            base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            max_attempts: env_parse("CLASSIFY_MAX_ATTEMPTS").unwrap_or(2).max(1),
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}
