//! Storage bootstrap and reconciliation tests.
//!
//! Run with paused time so the fixed retry delay elapses instantly.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use sc_test_utils::{test_root_user, TEST_BCRYPT_COST};
use session_coordinator::bootstrap::{reconcile, BootstrapCoordinator, RootAccountAction};
use session_coordinator::store::mock::{MockConnector, MockStore};
use session_coordinator::store::{UserFields, UserLevel, UserRecord};
use common::types::{ConnectionId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const RETRY: Duration = Duration::from_millis(10_000);

fn bootstrap_with(
    connector: Arc<MockConnector>,
) -> (
    BootstrapCoordinator,
    session_coordinator::bootstrap::StorageHandle,
) {
    BootstrapCoordinator::new(connector, test_root_user(), TEST_BCRYPT_COST, RETRY)
}

fn stale_root(id: &str) -> UserRecord {
    UserRecord {
        id: UserId::from(id),
        fields: UserFields {
            username: "old-root".to_string(),
            email: "root@example.com".to_string(),
            password_hash: "stale-hash".to_string(),
            first_name: "Old".to_string(),
            last_name: "Name".to_string(),
            level: UserLevel::Standard,
        },
        last_online: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_retries_at_fixed_delay_until_connected() {
    let store = Arc::new(MockStore::new());
    let connector = Arc::new(MockConnector::failing_first(2, store.clone()));
    let (bootstrap, storage) = bootstrap_with(connector.clone());

    assert!(!storage.is_connected());
    let report = bootstrap.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.attempts, 3);
    assert_eq!(report.root_action, RootAccountAction::Created);
    assert!(storage.is_connected());

    let times = connector.attempt_times();
    assert_eq!(times.len(), 3);
    for pair in times.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= RETRY, "retry came early: {gap:?}");
        assert!(gap < RETRY + Duration::from_millis(100), "retry came late: {gap:?}");
    }

    // Reconciliation ran exactly once, on the successful attempt.
    assert_eq!(store.calls("find_user_by_email"), 1);
    assert_eq!(store.calls("create_user"), 1);
    assert_eq!(store.calls("reset_meeting_peers"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_failure_restarts_whole_sequence() {
    let store = Arc::new(MockStore::new());
    store.fail_operation("reset_meeting_peers");
    let connector = Arc::new(MockConnector::accepting(store.clone()));
    let (bootstrap, storage) = bootstrap_with(connector.clone());

    let task = tokio::spawn(bootstrap.run(CancellationToken::new()));

    // Attempts at 0s, 10s and 20s fail at the reset step.
    tokio::time::sleep(Duration::from_millis(25_000)).await;
    assert!(!storage.is_connected());
    assert_eq!(connector.attempt_count(), 3);

    store.clear_failures();
    let report = task.await.unwrap().unwrap();

    assert_eq!(report.attempts, 4);
    assert!(storage.is_connected());
    // Created once, then found and overwritten by every later attempt.
    assert_eq!(store.calls("create_user"), 1);
    assert_eq!(store.calls("overwrite_user"), 3);
    assert_eq!(report.root_action, RootAccountAction::Overwritten);
    assert_eq!(store.users_with_email("root@example.com").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_retrying() {
    let store = Arc::new(MockStore::new());
    let connector = Arc::new(MockConnector::failing_first(usize::MAX, store));
    let (bootstrap, storage) = bootstrap_with(connector.clone());
    let cancel = CancellationToken::new();

    let task = tokio::spawn(bootstrap.run(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(35_000)).await;
    cancel.cancel();

    assert!(task.await.unwrap().is_none());
    assert!(!storage.is_connected());
    assert_eq!(connector.attempt_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_wait_connected_resolves_after_bootstrap() {
    let store = Arc::new(MockStore::new());
    let connector = Arc::new(MockConnector::failing_first(1, store));
    let (bootstrap, mut storage) = bootstrap_with(connector);

    let waiter = tokio::spawn(async move { storage.wait_connected().await.is_some() });
    tokio::spawn(bootstrap.run(CancellationToken::new()));

    assert!(waiter.await.unwrap());
}

#[tokio::test]
async fn test_existing_root_is_overwritten_unconditionally() {
    let store = MockStore::new();
    store.insert_user(stale_root("root-1"));

    let report = reconcile(&store, &test_root_user(), TEST_BCRYPT_COST)
        .await
        .unwrap();

    assert_eq!(report.root_action, RootAccountAction::Overwritten);
    assert_eq!(report.root_user_id, UserId::from("root-1"));

    let root = store.user(&UserId::from("root-1")).unwrap();
    assert_eq!(root.fields.username, "root");
    assert_eq!(root.fields.first_name, "Root");
    assert_eq!(root.fields.last_name, "User");
    assert_eq!(root.fields.level, UserLevel::Root);
    assert!(bcrypt::verify("root-password", &root.fields.password_hash).unwrap());
}

#[tokio::test]
async fn test_root_lookup_ignores_email_case() {
    let store = MockStore::new();
    let mut stored = stale_root("root-1");
    stored.fields.email = "ROOT@Example.com".to_string();
    store.insert_user(stored);

    let report = reconcile(&store, &test_root_user(), TEST_BCRYPT_COST)
        .await
        .unwrap();

    assert_eq!(report.root_action, RootAccountAction::Overwritten);
    assert_eq!(store.calls("create_user"), 0);
    let root = store.user(&UserId::from("root-1")).unwrap();
    assert_eq!(root.fields.email, "root@example.com");
}

#[tokio::test]
async fn test_password_rehashed_on_every_run() {
    let store = MockStore::new();
    reconcile(&store, &test_root_user(), TEST_BCRYPT_COST)
        .await
        .unwrap();
    let first = store.users_with_email("root@example.com")[0].clone();

    reconcile(&store, &test_root_user(), TEST_BCRYPT_COST)
        .await
        .unwrap();
    let second = store.user(&first.id).unwrap();

    assert_ne!(first.fields.password_hash, second.fields.password_hash);
    assert_eq!(store.users_with_email("root@example.com").len(), 1);
}

#[tokio::test]
async fn test_reconcile_clears_every_meeting() {
    let store = MockStore::new();
    store.insert_meeting("m1", &[ConnectionId::new(), ConnectionId::new()]);
    store.insert_meeting("m2", &[ConnectionId::new()]);
    store.insert_meeting("m3", &[]);

    let report = reconcile(&store, &test_root_user(), TEST_BCRYPT_COST)
        .await
        .unwrap();

    assert_eq!(report.meetings_reset, 3);
    for meeting in ["m1", "m2", "m3"] {
        assert!(store.meeting_peers(meeting).unwrap().is_empty(), "{meeting}");
    }
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let store = MockStore::new();
    store.insert_meeting("m1", &[ConnectionId::new()]);

    let first = reconcile(&store, &test_root_user(), TEST_BCRYPT_COST)
        .await
        .unwrap();
    let second = reconcile(&store, &test_root_user(), TEST_BCRYPT_COST)
        .await
        .unwrap();

    assert_eq!(first.root_user_id, second.root_user_id);
    assert_eq!(second.root_action, RootAccountAction::Overwritten);
    assert_eq!(store.users_with_email("root@example.com").len(), 1);
    assert!(store.meeting_peers("m1").unwrap().is_empty());
}
