use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Mailbox, TokenSource};
use crate::errors::{AppError, AppResult};
use crate::retry::RetryPolicy;
use crate::sanitize::extract_content;
use crate::types::{MessageContent, MessageSummary};

const BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const PAGE_SIZE: &str = "500";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMessagesResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MinimalMessage {
    id: String,
    /// Milliseconds since the epoch, encoded as a string.
    internal_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    raw: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListLabelsResponse {
    #[serde(default)]
    labels: Vec<LabelInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct LabelInfo {
    id: String,
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLabelRequest<'a> {
    name: &'a str,
    label_list_visibility: &'a str,
    message_list_visibility: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyMessageRequest<'a> {
    add_label_ids: [&'a str; 1],
}

/// Gmail REST client bound to one account's tokens.
pub struct GmailClient {
    http: Client,
    tokens: Arc<dyn TokenSource>,
    base_url: String,
    retry: RetryPolicy,
}

impl GmailClient {
    pub fn new(tokens: Arc<dyn TokenSource>, timeout: Duration, retry: RetryPolicy) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Unexpected(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            tokens,
            base_url: BASE_URL.to_string(),
            retry,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn send(&self, what: &str, req: RequestBuilder) -> AppResult<Response> {
        let token = self.tokens.access_token().await?;
        req.bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::Transient(format!("{what}: {e}")))
    }

    /// Send with the current token; a 401 gets one retry with a refreshed
    /// token before it is reported as an auth failure.
    async fn send_json<T: DeserializeOwned>(&self, what: &str, req: RequestBuilder) -> AppResult<T> {
        let again = req.try_clone();
        let mut resp = self.send(what, req).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            if let Some(again) = again {
                warn!(op = what, "Access token rejected; refreshing");
                self.tokens.invalidate().await;
                resp = self.send(what, again).await?;
            }
        }
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::from_status(what, status, &body));
        }
        resp.json::<T>()
            .await
            .map_err(|e| AppError::PermanentMessage(format!("{what}: decoding response: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, what: &str, url: &str, query: &[(&str, &str)]) -> AppResult<T> {
        self.retry
            .run(what, || self.send_json(what, self.http.get(url).query(query)))
            .await
    }

    async fn list_ids(&self, q: &str) -> AppResult<Vec<String>> {
        let url = format!("{}/messages", self.base_url);
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("q", q), ("maxResults", PAGE_SIZE)];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }
            let page: ListMessagesResponse = self.get_json("list messages", &url, &query).await?;
            ids.extend(page.messages.into_iter().map(|m| m.id));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(ids)
    }

    async fn list_labels(&self) -> AppResult<Vec<LabelInfo>> {
        let url = format!("{}/labels", self.base_url);
        let resp: ListLabelsResponse = self.get_json("list labels", &url, &[]).await?;
        Ok(resp.labels)
    }

    async fn create_label(&self, name: &str) -> AppResult<LabelInfo> {
        let url = format!("{}/labels", self.base_url);
        let body = CreateLabelRequest {
            name,
            label_list_visibility: "labelShow",
            message_list_visibility: "show",
        };
        self.retry
            .run("create label", || {
                self.send_json("create label", self.http.post(&url).json(&body))
            })
            .await
    }
}

#[async_trait]
impl Mailbox for GmailClient {
    async fn search(&self, since: i64, filter: Option<&str>) -> AppResult<Vec<MessageSummary>> {
        // `after:` is exclusive; step back a second so nothing at `since` is lost.
        let mut q = format!("after:{}", (since - 1).max(0));
        if let Some(extra) = filter {
            q.push(' ');
            q.push_str(extra);
        }
        info!(query = %q, "Searching mailbox");

        let ids = self.list_ids(&q).await?;
        debug!(count = ids.len(), "Listed candidate ids");

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            let url = format!("{}/messages/{}", self.base_url, id);
            let msg: MinimalMessage = match self
                .get_json("get message", &url, &[("format", "minimal")])
                .await
            {
                Ok(msg) => msg,
                Err(AppError::PermanentMessage(e)) => {
                    warn!(message = %id, error = %e, "Skipping unreadable message");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let Some(internal_ts) = msg
                .internal_date
                .as_deref()
                .and_then(|ms| ms.parse::<i64>().ok())
                .map(|ms| ms.div_euclid(1000))
            else {
                warn!(message = %msg.id, "Message has no internalDate; skipping");
                continue;
            };
            summaries.push(MessageSummary {
                id: msg.id,
                internal_ts,
            });
        }
        Ok(summaries)
    }

    async fn fetch_content(&self, message_id: &str) -> AppResult<MessageContent> {
        let url = format!("{}/messages/{}", self.base_url, message_id);
        let msg: RawMessage = self
            .get_json("get raw message", &url, &[("format", "raw")])
            .await?;
        let raw = msg
            .raw
            .ok_or_else(|| AppError::PermanentMessage(format!("message {message_id} has no raw body")))?;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(raw.trim_end_matches('=').as_bytes())
            .map_err(|e| AppError::PermanentMessage(format!("decoding message {message_id}: {e}")))?;
        Ok(extract_content(&bytes))
    }

    async fn ensure_label(&self, name: &str) -> AppResult<String> {
        let mut labels = self.list_labels().await?;
        let parts: Vec<&str> = name.split('/').collect();
        let mut final_id = None;

        for depth in 1..=parts.len() {
            let path = parts[..depth].join("/");
            let existing = labels
                .iter()
                .find(|l| l.name.eq_ignore_ascii_case(&path))
                .map(|l| l.id.clone());
            let id = match existing {
                Some(id) => id,
                None => {
                    let created = self.create_label(&path).await?;
                    info!(label = %path, id = %created.id, "Created label");
                    let id = created.id.clone();
                    labels.push(created);
                    id
                }
            };
            final_id = Some(id);
        }

        final_id.ok_or_else(|| AppError::Unexpected(format!("empty label name {name:?}")))
    }

    async fn apply_label(&self, message_id: &str, label_id: &str) -> AppResult<()> {
        let url = format!("{}/messages/{}/modify", self.base_url, message_id);
        let body = ModifyMessageRequest {
            add_label_ids: [label_id],
        };
        let _: serde_json::Value = self
            .retry
            .run("apply label", || {
                self.send_json("apply label", self.http.post(&url).json(&body))
            })
            .await?;
        Ok(())
    }
}
