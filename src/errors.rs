use reqwest::StatusCode;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    /// Network or service unavailability; worth retrying.
    #[error("Transient error: {0}")]
    Transient(String),
    /// Bad content or a permanent rejection for a single message.
    #[error("Message error: {0}")]
    PermanentMessage(String),
    #[error("State file unreadable: {0}")]
    StateCorruption(String),
    #[error("State commit failed: {0}")]
    StateWrite(String),
    #[error("Auth failed for account: {0}")]
    Auth(String),
    #[error("Another run holds the lock at {0}")]
    LockBusy(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Transient(_))
    }

    /// Errors that end the whole account run instead of one message.
    pub fn is_fatal_for_account(&self) -> bool {
        matches!(self, AppError::Auth(_) | AppError::StateWrite(_))
    }
}

impl AppError {
    /// Classify a non-success HTTP response from a remote API.
    pub fn from_status(what: &str, status: StatusCode, body: &str) -> Self {
        let detail = format!("{what} failed with status {status}: {}", body.trim());
        match status {
            StatusCode::FORBIDDEN if is_rate_limit(body) => AppError::Transient(detail),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::Auth(detail),
            StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
                AppError::Transient(detail)
            }
            s if s.is_server_error() => AppError::Transient(detail),
            _ => AppError::PermanentMessage(detail),
        }
    }
}

/// Google reports quota exhaustion as 403 with a reason such as
/// `rateLimitExceeded` or `userRateLimitExceeded`.
fn is_rate_limit(body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    body.contains("ratelimitexceeded") || body.contains("quotaexceeded")
}
