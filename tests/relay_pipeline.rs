//! End-to-end tests of the polling pipeline.
//!
//! These tests drive whole cycles against an in-memory upstream and check
//! ordering, cursor durability, failure isolation and self-heal.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{relay_on, setup_relay, FakeSource, RecordingMessenger, DEFAULT_TIMEOUT, FEED};
use feed_relay::relay::DisabledReason;
use feed_relay::{Database, DeliveryError, Scheduler};

async fn cursor_of(relay: &feed_relay::FeedRelay) -> Option<String> {
    relay
        .cursor()
        .await
        .unwrap()
        .map(|c| c.last_seen_item_id.as_str().to_string())
}

#[tokio::test]
async fn test_items_delivered_oldest_first() {
    let source = FakeSource::with_ids(&["7", "6", "5"]);
    let messenger = RecordingMessenger::new();
    let (_db, relay) = setup_relay(source, messenger.clone()).await;
    relay.enable_subscription("a", "t-a").await.unwrap();
    relay.enable_subscription("b", "t-b").await.unwrap();

    let report = relay.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.processed, 3);
    assert_eq!(report.delivered, 6);
    assert_eq!(messenger.delivered_to("t-a"), vec!["5", "6", "7"]);
    assert_eq!(messenger.delivered_to("t-b"), vec!["5", "6", "7"]);
    assert_eq!(cursor_of(&relay).await.as_deref(), Some("7"));
}

#[tokio::test]
async fn test_empty_fetch_is_noop() {
    let source = FakeSource::with_ids(&[]);
    let messenger = RecordingMessenger::new();
    let (_db, relay) = setup_relay(source, messenger.clone()).await;
    relay.enable_subscription("a", "t-a").await.unwrap();

    let report = relay.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.fetched, 0);
    assert_eq!(messenger.delivered_count(), 0);
    assert!(cursor_of(&relay).await.is_none());
}

#[tokio::test]
async fn test_next_cycle_fetches_from_cursor() {
    let source = FakeSource::with_ids(&["7", "6", "5"]);
    let messenger = RecordingMessenger::new();
    let (_db, relay) = setup_relay(source.clone(), messenger.clone()).await;
    relay.enable_subscription("a", "t-a").await.unwrap();

    relay.run_cycle(&CancellationToken::new()).await.unwrap();
    let report = relay.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.processed, 0);

    source.set_ids(&["8", "7", "6", "5"]);
    relay.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(messenger.delivered_to("t-a"), vec!["5", "6", "7", "8"]);
    assert_eq!(
        source.cursors(),
        vec![None, Some("7".to_string()), Some("7".to_string())]
    );
    assert_eq!(cursor_of(&relay).await.as_deref(), Some("8"));
}

#[tokio::test]
async fn test_stale_items_are_never_redelivered() {
    let source = FakeSource::with_ids(&["10"]);
    let messenger = RecordingMessenger::new();
    let (_db, relay) = setup_relay(source.clone(), messenger.clone()).await;
    relay.enable_subscription("a", "t-a").await.unwrap();
    relay.run_cycle(&CancellationToken::new()).await.unwrap();

    // Upstream ignores since_id and returns older items
    source.set_ids(&["10", "9", "4"]);
    source.set_ignore_cursor(true);
    let report = relay.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.fetched, 3);
    assert_eq!(report.processed, 0);
    assert_eq!(messenger.delivered_to("t-a"), vec!["10"]);
    assert_eq!(cursor_of(&relay).await.as_deref(), Some("10"));
}

#[tokio::test]
async fn test_failure_isolation() {
    let source = FakeSource::with_ids(&["5"]);
    let messenger = RecordingMessenger::new();
    messenger.fail("t-b", DeliveryError::PermissionDenied("403 Forbidden".to_string()));
    let (_db, relay) = setup_relay(source.clone(), messenger.clone()).await;
    for tenant in ["a", "b", "c"] {
        relay
            .enable_subscription(tenant, &format!("t-{tenant}"))
            .await
            .unwrap();
    }

    let report = relay.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.delivered, 2);
    assert_eq!(report.disabled, 1);
    assert_eq!(messenger.delivered_to("t-a"), vec!["5"]);
    assert_eq!(messenger.delivered_to("t-c"), vec!["5"]);

    let b = relay.registry().get(FEED, "b").await.unwrap().unwrap();
    assert!(!b.enabled);
    assert_eq!(b.disabled_reason, Some(DisabledReason::PermissionDenied));

    // B is not attempted again
    source.set_ids(&["6", "5"]);
    relay.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(messenger.attempts_to("t-b"), 1);
    assert_eq!(messenger.delivered_to("t-a"), vec!["5", "6"]);
    assert_eq!(messenger.delivered_to("t-c"), vec!["5", "6"]);
}

#[tokio::test]
async fn test_self_heal_within_one_cycle() {
    let source = FakeSource::with_ids(&["6", "5"]);
    let messenger = RecordingMessenger::new();
    messenger.fail("t-b", DeliveryError::TargetMissing("404 Not Found".to_string()));
    let (_db, relay) = setup_relay(source, messenger.clone()).await;
    relay.enable_subscription("a", "t-a").await.unwrap();
    relay.enable_subscription("b", "t-b").await.unwrap();

    let report = relay.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.disabled, 1);
    assert_eq!(messenger.attempts_to("t-b"), 1);
    assert_eq!(messenger.delivered_to("t-a"), vec!["5", "6"]);
    let b = relay.registry().get(FEED, "b").await.unwrap().unwrap();
    assert_eq!(b.disabled_reason, Some(DisabledReason::TargetMissing));
}

#[tokio::test]
async fn test_reenable_after_self_heal() {
    let source = FakeSource::with_ids(&["5"]);
    let messenger = RecordingMessenger::new();
    messenger.fail("t-b", DeliveryError::PermissionDenied("403 Forbidden".to_string()));
    let (_db, relay) = setup_relay(source.clone(), messenger.clone()).await;
    relay.enable_subscription("b", "t-b").await.unwrap();
    relay.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(relay.registry().count_enabled(FEED).await.unwrap(), 0);

    messenger.heal("t-b");
    let sub = relay.enable_subscription("b", "t-b").await.unwrap();
    assert!(sub.enabled);
    assert!(sub.disabled_reason.is_none());

    source.set_ids(&["6", "5"]);
    relay.run_cycle(&CancellationToken::new()).await.unwrap();

    // Items from before re-enabling are not backfilled
    assert_eq!(messenger.delivered_to("t-b"), vec!["6"]);
}

#[tokio::test]
async fn test_transient_failure_keeps_subscription() {
    let source = FakeSource::with_ids(&["5"]);
    let messenger = RecordingMessenger::new();
    messenger.fail("t-b", DeliveryError::Transport("connection reset".to_string()));
    let (_db, relay) = setup_relay(source.clone(), messenger.clone()).await;
    relay.enable_subscription("a", "t-a").await.unwrap();
    relay.enable_subscription("b", "t-b").await.unwrap();

    let report = relay.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.transient, 1);
    assert_eq!(report.disabled, 0);
    assert!(relay.registry().get(FEED, "b").await.unwrap().unwrap().enabled);
    assert_eq!(cursor_of(&relay).await.as_deref(), Some("5"));

    // The missed item is not retried, later items arrive
    messenger.heal("t-b");
    source.set_ids(&["6", "5"]);
    relay.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(messenger.delivered_to("t-b"), vec!["6"]);
}

#[tokio::test]
async fn test_fetch_failure_keeps_cursor() {
    let source = FakeSource::with_ids(&["5"]);
    let messenger = RecordingMessenger::new();
    let (_db, relay) = setup_relay(source.clone(), messenger.clone()).await;
    relay.enable_subscription("a", "t-a").await.unwrap();
    relay.run_cycle(&CancellationToken::new()).await.unwrap();

    source.set_ids(&["6", "5"]);
    source.set_failing(true);
    let report = relay.run_cycle(&CancellationToken::new()).await.unwrap();
    assert!(report.fetch_failed);
    assert_eq!(report.processed, 0);
    assert_eq!(cursor_of(&relay).await.as_deref(), Some("5"));

    source.set_failing(false);
    relay.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(messenger.delivered_to("t-a"), vec!["5", "6"]);
}

#[tokio::test]
async fn test_restart_redelivers_interrupted_item() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay.db");

    let source = FakeSource::with_ids(&["7", "6", "5"]);
    let messenger = RecordingMessenger::new();
    messenger.hang_on("6");

    {
        let db = Database::open(&path).await.unwrap();
        let relay = relay_on(&db, source.clone(), messenger.clone());
        relay.enable_subscription("a", "t-a").await.unwrap();

        // Simulate a crash while item 6 is being delivered
        let cancel = CancellationToken::new();
        tokio::select! {
            _ = relay.run_cycle(&cancel) => panic!("cycle should not complete"),
            _ = messenger.reached.notified() => {}
        }
        db.close().await;
    }

    assert_eq!(messenger.delivered_to("t-a"), vec!["5"]);

    let db = Database::open(&path).await.unwrap();
    let messenger = RecordingMessenger::new();
    let relay = relay_on(&db, source.clone(), messenger.clone());
    assert_eq!(cursor_of(&relay).await.as_deref(), Some("5"));

    relay.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(messenger.delivered_to("t-a"), vec!["6", "7"]);
    assert_eq!(cursor_of(&relay).await.as_deref(), Some("7"));
}

#[tokio::test]
async fn test_subscriptions_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay.db");
    let source = FakeSource::with_ids(&["5"]);

    {
        let db = Database::open(&path).await.unwrap();
        let relay = relay_on(&db, source.clone(), RecordingMessenger::new());
        relay.enable_subscription("a", "t-a").await.unwrap();
        relay.enable_subscription("b", "t-b").await.unwrap();
        relay.disable_subscription("b").await.unwrap();
        db.close().await;
    }

    let db = Database::open(&path).await.unwrap();
    let messenger = RecordingMessenger::new();
    let relay = relay_on(&db, source, messenger.clone());
    relay.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(messenger.delivered_to("t-a"), vec!["5"]);
    assert_eq!(messenger.attempts_to("t-b"), 0);
    let b = relay.registry().get(FEED, "b").await.unwrap().unwrap();
    assert_eq!(b.disabled_reason, Some(DisabledReason::OptOut));
}

#[tokio::test]
async fn test_disable_unknown_tenant_is_noop() {
    let (_db, relay) = setup_relay(FakeSource::with_ids(&[]), RecordingMessenger::new()).await;

    assert!(!relay.disable_subscription("nobody").await.unwrap());
    assert!(relay.registry().list_all(FEED).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_scheduler_relays_in_background() {
    let source = FakeSource::with_ids(&["2", "1"]);
    let messenger = RecordingMessenger::new();
    let (_db, relay) = setup_relay(source.clone(), messenger.clone()).await;
    relay.enable_subscription("a", "t-a").await.unwrap();

    let handle = Scheduler::new(Arc::new(relay), Duration::from_millis(20)).start(async {});

    let waited = tokio::time::timeout(DEFAULT_TIMEOUT, async {
        while messenger.delivered_count() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        source.set_ids(&["3", "2", "1"]);
        while messenger.delivered_count() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    handle.stop().await;

    assert!(waited.is_ok(), "scheduler did not deliver in time");
    assert_eq!(messenger.delivered_to("t-a"), vec!["1", "2", "3"]);
}
