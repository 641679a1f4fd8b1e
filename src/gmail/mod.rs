//! Mailbox access. The sync engine only talks to the [`Mailbox`] trait;
//! [`GmailClient`] is the REST implementation used in production.

mod client;

pub use client::GmailClient;

use async_trait::async_trait;

use crate::errors::AppResult;
use crate::types::{MessageContent, MessageSummary};

#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Messages delivered at or after `since` (a query hint; may return
    /// more). Order is whatever the provider gives back.
    async fn search(&self, since: i64, filter: Option<&str>) -> AppResult<Vec<MessageSummary>>;

    async fn fetch_content(&self, message_id: &str) -> AppResult<MessageContent>;

    /// Id of the label with this hierarchical name, creating it (and any
    /// missing parents) if needed.
    async fn ensure_label(&self, name: &str) -> AppResult<String>;

    async fn apply_label(&self, message_id: &str, label_id: &str) -> AppResult<()>;
}

/// Bearer tokens for API calls. Implementations cache a token and hand out
/// a fresh one once it is close to expiry or has been invalidated.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> AppResult<String>;

    /// Forget the cached token after the API rejected it.
    async fn invalidate(&self);
}
