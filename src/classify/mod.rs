//! Job-application status classification.

mod openai;

pub use openai::OpenAiClassifier;

use async_trait::async_trait;
use tracing::warn;

use crate::errors::AppResult;
use crate::types::{ClassificationResult, JobStatus, MessageContent};

#[async_trait]
pub trait Classifier: Send + Sync {
    /// `content.body` is expected to be truncated by the caller already.
    async fn classify(&self, content: &MessageContent) -> AppResult<ClassificationResult>;
}

const NOT_JOB_PHRASES: [&str; 4] = [
    "not job related",
    "not related",
    "not about a job",
    "not a job",
];

/// Map free-form service output onto the fixed label set. Anything that
/// names no known status becomes `Other`, keeping the raw text as rationale.
pub fn parse_status(response: &str) -> ClassificationResult {
    let cleaned: String = response
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    let joined = words.join(" ");

    if joined.is_empty() {
        warn!("Empty classification response; using Other");
        return unrecognised(response);
    }
    if words.first() == Some(&"no") || NOT_JOB_PHRASES.iter().any(|p| joined.contains(p)) {
        return ClassificationResult {
            status: JobStatus::NotJobRelated,
            rationale: Some(response.trim().to_string()),
        };
    }

    let mut matches = JobStatus::LABELED
        .iter()
        .filter(|status| words.contains(&status.as_str().to_lowercase().as_str()));
    match (matches.next(), matches.next()) {
        (Some(status), None) => ClassificationResult {
            status: *status,
            rationale: Some(response.trim().to_string()),
        },
        _ => {
            warn!(response = %response.trim(), "Unrecognised classification; using Other");
            unrecognised(response)
        }
    }
}

fn unrecognised(response: &str) -> ClassificationResult {
    ClassificationResult {
        status: JobStatus::Other,
        rationale: Some(format!("unrecognised response: {}", response.trim())),
    }
}
