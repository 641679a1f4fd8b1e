//! In-memory mailbox and classifier used by the sync tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jobsync::classify::Classifier;
use jobsync::config::SyncConfig;
use jobsync::errors::{AppError, AppResult};
use jobsync::gmail::Mailbox;
use jobsync::sync::MailboxConnector;
use jobsync::types::{Account, ClassificationResult, JobStatus, MessageContent, MessageSummary};

pub const NOW: i64 = 1_700_000_000;
pub const DAY: i64 = 24 * 60 * 60;

pub fn clock() -> i64 {
    NOW
}

pub fn config(data_dir: &Path) -> SyncConfig {
    SyncConfig {
        data_dir: data_dir.to_path_buf(),
        ..SyncConfig::default()
    }
}

pub fn account(dir: &Path, id: &str) -> Account {
    Account {
        id: id.to_string(),
        dir: dir.join(id),
        legacy: false,
    }
}

#[derive(Default)]
pub struct FakeMailbox {
    messages: Mutex<Vec<(MessageSummary, MessageContent)>>,
    applied: Mutex<Vec<(String, String)>>,
    searches: Mutex<Vec<i64>>,
    fail_search: AtomicBool,
    fail_apply: Mutex<HashSet<String>>,
    /// Applies allowed before every further apply fails auth.
    auth_fail_after: Mutex<Option<usize>>,
}

impl FakeMailbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver a message whose subject doubles as the classifier verdict key.
    pub fn deliver(&self, id: &str, ts: i64, subject: &str, body: &str) {
        self.messages.lock().unwrap().push((
            MessageSummary {
                id: id.to_string(),
                internal_ts: ts,
            },
            MessageContent {
                subject: subject.to_string(),
                from: "recruiting@example.com".to_string(),
                body: body.to_string(),
            },
        ));
    }

    pub fn applied(&self) -> Vec<(String, String)> {
        self.applied.lock().unwrap().clone()
    }

    pub fn applied_to(&self, id: &str) -> usize {
        self.applied().iter().filter(|(m, _)| m == id).count()
    }

    pub fn searches(&self) -> Vec<i64> {
        self.searches.lock().unwrap().clone()
    }

    pub fn set_fail_search(&self, fail: bool) {
        self.fail_search.store(fail, Ordering::SeqCst);
    }

    pub fn fail_apply_for(&self, id: &str) {
        self.fail_apply.lock().unwrap().insert(id.to_string());
    }

    pub fn clear_apply_failures(&self) {
        self.fail_apply.lock().unwrap().clear();
    }

    pub fn fail_auth_after(&self, applies: Option<usize>) {
        *self.auth_fail_after.lock().unwrap() = applies;
    }
}

#[async_trait]
impl Mailbox for FakeMailbox {
    async fn search(&self, since: i64, _filter: Option<&str>) -> AppResult<Vec<MessageSummary>> {
        self.searches.lock().unwrap().push(since);
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(AppError::Transient("mailbox unavailable".into()));
        }
        // Newest first, like the provider; the engine must not rely on order.
        let mut found: Vec<_> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .map(|(s, _)| s.clone())
            .filter(|s| s.internal_ts >= since)
            .collect();
        found.sort_by(|a, b| b.internal_ts.cmp(&a.internal_ts));
        Ok(found)
    }

    async fn fetch_content(&self, message_id: &str) -> AppResult<MessageContent> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|(s, _)| s.id == message_id)
            .map(|(_, c)| c.clone())
            .ok_or_else(|| AppError::PermanentMessage(format!("no message {message_id}")))
    }

    async fn ensure_label(&self, name: &str) -> AppResult<String> {
        Ok(format!("id:{name}"))
    }

    async fn apply_label(&self, message_id: &str, label_id: &str) -> AppResult<()> {
        if let Some(limit) = *self.auth_fail_after.lock().unwrap() {
            if self.applied.lock().unwrap().len() >= limit {
                return Err(AppError::Auth("token revoked".into()));
            }
        }
        if self.fail_apply.lock().unwrap().contains(message_id) {
            return Err(AppError::Transient("label service down".into()));
        }
        self.applied
            .lock()
            .unwrap()
            .push((message_id.to_string(), label_id.to_string()));
        Ok(())
    }
}

/// Classifies by subject; unknown subjects are a permanent failure.
#[derive(Default)]
pub struct FakeClassifier {
    verdicts: Mutex<HashMap<String, JobStatus>>,
    seen_bodies: Mutex<Vec<String>>,
}

impl FakeClassifier {
    pub fn new(verdicts: &[(&str, JobStatus)]) -> Arc<Self> {
        let map = verdicts
            .iter()
            .map(|(subject, status)| (subject.to_string(), *status))
            .collect();
        Arc::new(Self {
            verdicts: Mutex::new(map),
            seen_bodies: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.seen_bodies.lock().unwrap().len()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.seen_bodies.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, content: &MessageContent) -> AppResult<ClassificationResult> {
        self.seen_bodies.lock().unwrap().push(content.body.clone());
        self.verdicts
            .lock()
            .unwrap()
            .get(&content.subject)
            .map(|status| ClassificationResult::new(*status))
            .ok_or_else(|| AppError::PermanentMessage(format!("cannot classify {}", content.subject)))
    }
}

/// Hands out one fake mailbox per account id; unknown ids fail auth.
#[derive(Default)]
pub struct FakeConnector {
    mailboxes: HashMap<String, Arc<FakeMailbox>>,
}

impl FakeConnector {
    pub fn with(mut self, account_id: &str, mailbox: Arc<FakeMailbox>) -> Self {
        self.mailboxes.insert(account_id.to_string(), mailbox);
        self
    }
}

#[async_trait]
impl MailboxConnector for FakeConnector {
    async fn connect(&self, account: &Account) -> AppResult<Arc<dyn Mailbox>> {
        self.mailboxes
            .get(&account.id)
            .map(|m| Arc::clone(m) as Arc<dyn Mailbox>)
            .ok_or_else(|| AppError::Auth(format!("no credential for {}", account.id)))
    }
}
