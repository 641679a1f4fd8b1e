use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{parse_status, Classifier};
use crate::config::ClassifierConfig;
use crate::errors::{AppError, AppResult};
use crate::retry::RetryPolicy;
use crate::types::{ClassificationResult, MessageContent};

const PROMPT: &str = r#"Read the following email and decide whether it is about a job application I might have made.

If it is not about a job application, answer: Not-Job-Related
Otherwise answer with the application status, one of:
Applied, Holding, Assessment, Interview, Offer, Rejected, Other
(use Other when it is job-related but none of the statuses fit)

From: {from}
Subject: {subject}

Email Content:
{body}

Answer with the label only."#;

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Classifier backed by an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiClassifier {
    http: Client,
    config: ClassifierConfig,
    retry: RetryPolicy,
}

impl OpenAiClassifier {
    pub fn new(config: ClassifierConfig, timeout: Duration, backoff: Duration) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Unexpected(format!("building HTTP client: {e}")))?;
        let retry = RetryPolicy::new(config.max_attempts, backoff);
        Ok(Self {
            http,
            config,
            retry,
        })
    }

    fn build_prompt(content: &MessageContent) -> String {
        let subject = if content.subject.is_empty() {
            "(no subject)"
        } else {
            content.subject.as_str()
        };
        PROMPT
            .replace("{from}", &content.from)
            .replace("{subject}", subject)
            .replace("{body}", &content.body)
    }

    async fn complete(&self, prompt: &str) -> AppResult<String> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": 20,
            "temperature": 0.2,
        });

        debug!(model = %self.config.model, "Calling classification service");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Transient(format!("classification request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::from_status("classification", status, &text));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| AppError::PermanentMessage(format!("decoding classification: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::PermanentMessage("classification response had no content".into()))
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify(&self, content: &MessageContent) -> AppResult<ClassificationResult> {
        let prompt = Self::build_prompt(content);
        let answer = self
            .retry
            .run("classify", || self.complete(&prompt))
            .await?;
        Ok(parse_status(&answer))
    }
}
