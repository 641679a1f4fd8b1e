mod common;

use std::fs;
use std::sync::Arc;

use common::{account, clock, config, FakeClassifier, FakeMailbox, DAY, NOW};
use jobsync::errors::AppError;
use jobsync::state::{LegacyBootstrapper, StateStore};
use jobsync::sync::SyncEngine;
use jobsync::types::{JobStatus, SyncState};
use tempfile::TempDir;

fn engine(mailbox: &Arc<FakeMailbox>, classifier: &Arc<FakeClassifier>, dir: &TempDir) -> SyncEngine {
    SyncEngine::new(mailbox.clone(), classifier.clone(), config(dir.path())).with_clock(clock)
}

fn job_classifier() -> Arc<FakeClassifier> {
    FakeClassifier::new(&[
        ("Interview invite", JobStatus::Interview),
        ("Application update", JobStatus::Rejected),
        ("Weekly newsletter", JobStatus::NotJobRelated),
        ("Thanks for applying", JobStatus::Applied),
    ])
}

#[tokio::test]
async fn first_run_backfills_classifies_and_labels() {
    let dir = TempDir::new().unwrap();
    let acct = account(dir.path(), "me@example.com");
    let mailbox = FakeMailbox::new();
    mailbox.deliver("m1", NOW - 3 * DAY, "Interview invite", "Can you talk Tuesday?");
    mailbox.deliver("m2", NOW - 2 * DAY, "Application update", "We went another way.");
    mailbox.deliver("m3", NOW - DAY, "Weekly newsletter", "Top stories this week");
    mailbox.deliver("ancient", NOW - 30 * DAY, "Interview invite", "Old news");
    let classifier = job_classifier();

    let stats = engine(&mailbox, &classifier, &dir)
        .run(&acct, &LegacyBootstrapper::default())
        .await
        .unwrap();

    assert_eq!(mailbox.searches(), vec![NOW - 14 * DAY]);
    assert_eq!(stats.processed, 3);
    assert_eq!(stats.labeled, 2);
    assert_eq!(stats.failed, 0);

    let mut applied = mailbox.applied();
    applied.sort();
    assert_eq!(
        applied,
        vec![
            ("m1".to_string(), "id:Jobs/Interview".to_string()),
            ("m2".to_string(), "id:Jobs/Rejected".to_string()),
        ]
    );

    let state = StateStore::for_account(&acct).load().unwrap();
    assert_eq!(state.last_internal_ts, NOW - DAY);
    assert_eq!(state.last_run_at, Some(NOW));
    let ids: Vec<_> = state.seen_ids.keys().cloned().collect();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);
}

fn an_hour_later() -> i64 {
    NOW + 3_600
}

#[tokio::test]
async fn second_run_without_new_mail_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let acct = account(dir.path(), "me@example.com");
    let mailbox = FakeMailbox::new();
    mailbox.deliver("m1", NOW - 3 * DAY, "Interview invite", "Tuesday?");
    mailbox.deliver("m2", NOW - 2 * DAY, "Weekly newsletter", "News");
    let classifier = job_classifier();
    let legacy = LegacyBootstrapper::default();

    engine(&mailbox, &classifier, &dir).run(&acct, &legacy).await.unwrap();
    let first = StateStore::for_account(&acct).load().unwrap();
    let labels_after_first = mailbox.applied().len();

    let stats = engine(&mailbox, &classifier, &dir)
        .with_clock(an_hour_later)
        .run(&acct, &legacy)
        .await
        .unwrap();
    let second = StateStore::for_account(&acct).load().unwrap();

    assert_eq!(second.last_internal_ts, first.last_internal_ts);
    assert_eq!(second.seen_ids, first.seen_ids);
    assert_eq!(first.last_run_at, Some(NOW));
    assert_eq!(second.last_run_at, Some(an_hour_later()));
    assert_eq!(mailbox.applied().len(), labels_after_first);
    assert_eq!(stats.processed, 0);
    assert_eq!(stats.skipped, 2);
    assert_eq!(classifier.calls(), 2);
}

#[tokio::test]
async fn late_delivery_behind_watermark_is_admitted() {
    let dir = TempDir::new().unwrap();
    let acct = account(dir.path(), "me@example.com");
    let watermark = NOW - DAY;
    let mut prior = SyncState::from_watermark(watermark);
    prior.seen_ids.insert("old".into(), watermark);
    StateStore::for_account(&acct).commit(&prior).unwrap();

    let mailbox = FakeMailbox::new();
    mailbox.deliver("old", watermark, "Interview invite", "Already handled");
    mailbox.deliver("late", watermark - 60, "Thanks for applying", "Received");
    let classifier = job_classifier();

    let stats = engine(&mailbox, &classifier, &dir)
        .run(&acct, &LegacyBootstrapper::default())
        .await
        .unwrap();

    assert_eq!(mailbox.searches(), vec![watermark - 172_800]);
    assert_eq!(stats.processed, 1);
    assert_eq!(mailbox.applied(), vec![("late".to_string(), "id:Jobs/Applied".to_string())]);

    let state = StateStore::for_account(&acct).load().unwrap();
    assert_eq!(state.last_internal_ts, watermark);
    assert!(state.seen_ids.contains_key("late"));
    assert!(state.seen_ids.contains_key("old"));
}

#[tokio::test]
async fn seen_message_is_never_labeled_again() {
    let dir = TempDir::new().unwrap();
    let acct = account(dir.path(), "me@example.com");
    let mailbox = FakeMailbox::new();
    mailbox.deliver("m1", NOW - DAY, "Interview invite", "Tuesday?");
    let classifier = job_classifier();
    let engine = engine(&mailbox, &classifier, &dir);
    let legacy = LegacyBootstrapper::default();

    engine.run(&acct, &legacy).await.unwrap();
    // The provider reports the same message again with a shifted timestamp.
    mailbox.deliver("m1", NOW - DAY + 30, "Interview invite", "Tuesday?");
    engine.run(&acct, &legacy).await.unwrap();
    engine.run(&acct, &legacy).await.unwrap();

    assert_eq!(mailbox.applied_to("m1"), 1);
    assert_eq!(classifier.calls(), 1);
}

#[tokio::test]
async fn failed_message_is_isolated_and_retried_next_run() {
    let dir = TempDir::new().unwrap();
    let acct = account(dir.path(), "me@example.com");
    let mailbox = FakeMailbox::new();
    mailbox.deliver("a", NOW - 3 * DAY, "Interview invite", "Tuesday?");
    mailbox.deliver("b", NOW - 2 * DAY, "Application update", "Sorry");
    mailbox.deliver("c", NOW - DAY, "Thanks for applying", "Received");
    mailbox.fail_apply_for("b");
    let classifier = job_classifier();
    let engine = engine(&mailbox, &classifier, &dir);
    let legacy = LegacyBootstrapper::default();

    let stats = engine.run(&acct, &legacy).await.unwrap();
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.failed, 1);

    let state = StateStore::for_account(&acct).load().unwrap();
    assert!(!state.seen_ids.contains_key("b"));
    assert!(state.seen_ids.contains_key("a"));
    assert!(state.seen_ids.contains_key("c"));
    assert!(state.last_internal_ts < NOW - 2 * DAY);

    mailbox.clear_apply_failures();
    let stats = engine.run(&acct, &legacy).await.unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 0);

    assert_eq!(mailbox.applied_to("a"), 1);
    assert_eq!(mailbox.applied_to("b"), 1);
    assert_eq!(mailbox.applied_to("c"), 1);
    let state = StateStore::for_account(&acct).load().unwrap();
    assert_eq!(state.last_internal_ts, NOW - DAY);
}

#[tokio::test]
async fn unclassifiable_message_does_not_stop_the_batch() {
    let dir = TempDir::new().unwrap();
    let acct = account(dir.path(), "me@example.com");
    let mailbox = FakeMailbox::new();
    mailbox.deliver("odd", NOW - 2 * DAY, "???", "garbled");
    mailbox.deliver("ok", NOW - DAY, "Interview invite", "Tuesday?");
    let classifier = job_classifier();

    let stats = engine(&mailbox, &classifier, &dir)
        .run(&acct, &LegacyBootstrapper::default())
        .await
        .unwrap();

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.labeled, 1);
    let state = StateStore::for_account(&acct).load().unwrap();
    assert!(!state.seen_ids.contains_key("odd"));
    assert_eq!(state.last_internal_ts, NOW - 2 * DAY - 1);
}

#[tokio::test]
async fn crash_before_commit_redoes_only_uncommitted_work() {
    let dir = TempDir::new().unwrap();
    let acct = account(dir.path(), "me@example.com");
    let mailbox = FakeMailbox::new();
    mailbox.deliver("a", NOW - 3 * DAY, "Interview invite", "Tuesday?");
    mailbox.deliver("b", NOW - 2 * DAY, "Application update", "Sorry");
    let classifier = job_classifier();
    let engine = engine(&mailbox, &classifier, &dir);
    let legacy = LegacyBootstrapper::default();

    engine.run(&acct, &legacy).await.unwrap();
    let committed = fs::read(acct.state_path()).unwrap();

    // This run labels "c" but "crashes" before its commit lands.
    mailbox.deliver("c", NOW - DAY, "Thanks for applying", "Received");
    engine.run(&acct, &legacy).await.unwrap();
    fs::write(acct.state_path(), &committed).unwrap();

    let stats = engine.run(&acct, &legacy).await.unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(mailbox.applied_to("a"), 1);
    assert_eq!(mailbox.applied_to("b"), 1);
    assert_eq!(mailbox.applied_to("c"), 2);
}

#[tokio::test]
async fn failed_search_aborts_without_touching_state() {
    let dir = TempDir::new().unwrap();
    let acct = account(dir.path(), "me@example.com");
    let prior = SyncState::from_watermark(NOW - DAY);
    StateStore::for_account(&acct).commit(&prior).unwrap();

    let mailbox = FakeMailbox::new();
    mailbox.set_fail_search(true);
    let classifier = job_classifier();

    let err = engine(&mailbox, &classifier, &dir)
        .run(&acct, &LegacyBootstrapper::default())
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(StateStore::for_account(&acct).load().unwrap(), prior);
}

#[tokio::test]
async fn auth_failure_on_first_message_records_no_progress() {
    let dir = TempDir::new().unwrap();
    let acct = account(dir.path(), "me@example.com");
    let mailbox = FakeMailbox::new();
    mailbox.deliver("a", NOW - DAY, "Interview invite", "Tuesday?");
    mailbox.fail_auth_after(Some(0));
    let classifier = job_classifier();

    let err = engine(&mailbox, &classifier, &dir)
        .run(&acct, &LegacyBootstrapper::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Auth(_)));
    let state = StateStore::for_account(&acct).load().unwrap();
    assert!(state.seen_ids.is_empty());
    assert!(state.last_internal_ts < NOW - DAY);
}

#[tokio::test]
async fn auth_failure_mid_batch_keeps_finished_messages() {
    let dir = TempDir::new().unwrap();
    let acct = account(dir.path(), "me@example.com");
    let mailbox = FakeMailbox::new();
    mailbox.deliver("m1", NOW - 4 * DAY, "Interview invite", "Monday?");
    mailbox.deliver("m2", NOW - 3 * DAY, "Application update", "Sorry");
    mailbox.deliver("m3", NOW - 2 * DAY, "Thanks for applying", "Received");
    mailbox.deliver("m4", NOW - DAY, "Interview invite", "Tuesday?");
    // Newest first: m4 and m3 are labeled, then the token dies on m2.
    mailbox.fail_auth_after(Some(2));
    let classifier = job_classifier();
    let engine = engine(&mailbox, &classifier, &dir);
    let legacy = LegacyBootstrapper::default();

    let err = engine.run(&acct, &legacy).await.unwrap_err();
    assert!(matches!(err, AppError::Auth(_)));

    let state = StateStore::for_account(&acct).load().unwrap();
    assert!(state.seen_ids.contains_key("m4"));
    assert!(state.seen_ids.contains_key("m3"));
    assert!(!state.seen_ids.contains_key("m2"));
    assert!(!state.seen_ids.contains_key("m1"));
    assert!(state.last_internal_ts < NOW - 4 * DAY);

    mailbox.fail_auth_after(None);
    let stats = engine.run(&acct, &legacy).await.unwrap();
    assert_eq!(stats.processed, 2);
    for id in ["m1", "m2", "m3", "m4"] {
        assert_eq!(mailbox.applied_to(id), 1, "{id}");
    }
    let state = StateStore::for_account(&acct).load().unwrap();
    assert_eq!(state.last_internal_ts, NOW - DAY);
}

#[tokio::test]
async fn legacy_marker_seeds_the_first_window() {
    let dir = TempDir::new().unwrap();
    let mut acct = account(dir.path(), "me@example.com");
    acct.legacy = true;
    let marker = NOW - 5 * DAY;
    let legacy = LegacyBootstrapper::new(Some(marker));

    let mailbox = FakeMailbox::new();
    mailbox.deliver("at-marker", marker, "Interview invite", "Tuesday?");
    mailbox.deliver("after", marker + 100, "Thanks for applying", "Received");
    let classifier = job_classifier();

    engine(&mailbox, &classifier, &dir).run(&acct, &legacy).await.unwrap();

    let since = mailbox.searches()[0];
    assert!(since <= marker);
    assert_eq!(mailbox.applied_to("at-marker"), 1);
    assert_eq!(mailbox.applied_to("after"), 1);
    let state = StateStore::for_account(&acct).load().unwrap();
    assert_eq!(state.last_internal_ts, marker + 100);
}

#[tokio::test]
async fn legacy_marker_is_ignored_once_state_exists() {
    let dir = TempDir::new().unwrap();
    let mut acct = account(dir.path(), "me@example.com");
    acct.legacy = true;
    StateStore::for_account(&acct)
        .commit(&SyncState::from_watermark(NOW - DAY))
        .unwrap();

    let mailbox = FakeMailbox::new();
    let classifier = job_classifier();
    engine(&mailbox, &classifier, &dir)
        .run(&acct, &LegacyBootstrapper::new(Some(NOW - 10 * DAY)))
        .await
        .unwrap();

    assert_eq!(mailbox.searches(), vec![NOW - DAY - 172_800]);
}

#[tokio::test]
async fn corrupt_state_degrades_to_backfill() {
    let dir = TempDir::new().unwrap();
    let acct = account(dir.path(), "me@example.com");
    fs::create_dir_all(&acct.dir).unwrap();
    fs::write(acct.state_path(), b"{\"last_internal_ts\": 17").unwrap();

    let mailbox = FakeMailbox::new();
    let classifier = job_classifier();
    engine(&mailbox, &classifier, &dir)
        .run(&acct, &LegacyBootstrapper::default())
        .await
        .unwrap();

    assert_eq!(mailbox.searches(), vec![NOW - 14 * DAY]);
    assert!(StateStore::for_account(&acct).load().is_some());
}

#[tokio::test]
async fn empty_body_is_marked_processed_without_classifying() {
    let dir = TempDir::new().unwrap();
    let acct = account(dir.path(), "me@example.com");
    let mailbox = FakeMailbox::new();
    mailbox.deliver("blank", NOW - DAY, "Interview invite", "   ");
    let classifier = job_classifier();

    let stats = engine(&mailbox, &classifier, &dir)
        .run(&acct, &LegacyBootstrapper::default())
        .await
        .unwrap();

    assert_eq!(stats.processed, 1);
    assert_eq!(classifier.calls(), 0);
    assert!(mailbox.applied().is_empty());
    let state = StateStore::for_account(&acct).load().unwrap();
    assert!(state.seen_ids.contains_key("blank"));
}

#[tokio::test]
async fn oversized_bodies_are_truncated_before_classification() {
    let dir = TempDir::new().unwrap();
    let acct = account(dir.path(), "me@example.com");
    let mailbox = FakeMailbox::new();
    let long_body = "x".repeat(30_000);
    mailbox.deliver("big", NOW - DAY, "Interview invite", &long_body);
    let classifier = job_classifier();

    engine(&mailbox, &classifier, &dir)
        .run(&acct, &LegacyBootstrapper::default())
        .await
        .unwrap();

    let bodies = classifier.bodies();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0], format!("{}...", "x".repeat(22_000)));
}
