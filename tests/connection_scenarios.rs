//! End-to-end connection manager behaviour against the memory broker

mod common;

use publish_gateway::broker::MemoryBroker;
use publish_gateway::retry::RetryPolicy;
use publish_gateway::PublishOutcome;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_first_publish_on_new_channel() {
    let broker = MemoryBroker::new();
    let gateway = common::gateway(&broker).await;

    let raw = common::request(common::USER, common::PASSWORD, "orders.created", "{\"id\":7}");
    let reply = gateway.handle(&raw, "10.1.2.3").await.unwrap();

    assert!(reply.outcome.success);
    assert_eq!(reply.outcome.code, "0");
    assert_eq!(reply.outcome.mqid, "1");
    assert!(gateway.connections().is_connected("orders.created"));
    assert_eq!(broker.delivered("orders.created"), vec!["{\"id\":7}"]);
}

#[tokio::test]
async fn test_credentials_compare_case_insensitively() {
    let broker = MemoryBroker::new();
    let gateway = common::gateway(&broker).await;

    let raw = common::request(
        &common::USER.to_uppercase(),
        &common::PASSWORD.to_lowercase(),
        "a",
        "m",
    );
    assert!(gateway.handle(&raw, "r").await.unwrap().outcome.success);

    let raw = common::request(common::USER, "not-the-password", "a", "m");
    let err = gateway.handle(&raw, "r").await.unwrap_err();
    assert_eq!(err.error_type_label(), "auth_failed");
}

#[tokio::test(start_paused = true)]
async fn test_broker_down_exhausts_connect_attempts() {
    let broker = MemoryBroker::new();
    broker.fail_next_opens(u32::MAX);
    let manager = common::manager(
        &broker,
        RetryPolicy::new(3, Duration::from_millis(200)),
        RetryPolicy::new(1, Duration::from_millis(50)),
    );

    let outcome = manager.publish(0, "m", "orders.created").await;

    assert_eq!(outcome.code, PublishOutcome::FAILURE_CODE);
    assert_eq!(outcome.mqid, "0");
    assert!(!outcome.success);

    let attempts = broker.open_attempts("orders.created");
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[1] - attempts[0], Duration::from_millis(200));
    assert_eq!(attempts[2] - attempts[1], Duration::from_millis(200));
    assert_eq!(manager.channel_count(), 0);
}

#[tokio::test]
async fn test_rejected_channel_leaves_table_untouched() {
    let broker = MemoryBroker::new();
    let gateway = common::gateway(&broker).await;

    let raw = common::request(common::USER, common::PASSWORD, "../etc/passwd", "m");
    let err = gateway.handle(&raw, "r").await.unwrap_err();

    assert_eq!(err.error_type_label(), "channel_invalid");
    assert_eq!(err.caller_message(), Some("invalid channel name format"));
    assert_eq!(gateway.connections().channel_count(), 0);
    assert_eq!(broker.open_count(), 0);
}

#[tokio::test]
async fn test_async_error_triggers_single_reconnect() {
    let broker = MemoryBroker::new();
    let manager = common::manager(
        &broker,
        RetryPolicy::new(3, Duration::from_millis(10)),
        RetryPolicy::new(3, Duration::from_millis(10)),
    );

    assert!(manager.publish(0, "first", "a").await.success);
    let before = manager.current("a").unwrap();

    assert_eq!(broker.raise_async_error("a", "connection reset by peer"), 1);
    assert!(!manager.is_connected("a"));

    let outcome = manager.publish(1, "second", "a").await;

    assert!(outcome.success);
    assert_eq!(broker.open_count(), 2);
    assert!(manager.is_connected("a"));
    assert!(!Arc::ptr_eq(&before, &manager.current("a").unwrap()));
    assert_eq!(broker.delivered("a"), vec!["first", "second"]);
}

#[tokio::test]
async fn test_recovers_after_transient_connect_failures() {
    let broker = MemoryBroker::new();
    broker.fail_next_opens(2);
    let manager = common::manager(
        &broker,
        RetryPolicy::new(3, Duration::from_millis(5)),
        RetryPolicy::new(1, Duration::from_millis(5)),
    );

    let outcome = manager.publish(0, "m", "a").await;

    assert!(outcome.success);
    assert_eq!(broker.open_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_channels_all_complete() {
    let broker = MemoryBroker::new();
    let manager = Arc::new(common::manager(
        &broker,
        RetryPolicy::new(2, Duration::from_millis(5)),
        RetryPolicy::new(2, Duration::from_millis(5)),
    ));

    let handles: Vec<_> = (0..16u64)
        .map(|i| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.publish(i, "m", &format!("channel.{i}")).await })
        })
        .collect();

    let outcomes = tokio::time::timeout(Duration::from_secs(10), async {
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }
        outcomes
    })
    .await
    .expect("publishes finish");

    assert!(outcomes.iter().all(|o| o.success));
    assert_eq!(manager.channel_count(), 16);
    assert_eq!(manager.valid_publishers(), 16);
    assert_eq!(broker.open_count(), 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_channel_opens_once() {
    let broker = MemoryBroker::new();
    let manager = Arc::new(common::manager(
        &broker,
        RetryPolicy::new(2, Duration::from_millis(5)),
        RetryPolicy::new(2, Duration::from_millis(5)),
    ));

    let handles: Vec<_> = (0..8u64)
        .map(|i| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.publish(i, "m", "shared").await })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().success);
    }

    assert_eq!(broker.open_count(), 1);
    assert_eq!(broker.delivered("shared").len(), 8);
}

#[tokio::test]
async fn test_shutdown_closes_publishers() {
    let broker = MemoryBroker::new();
    let gateway = common::gateway(&broker).await;

    let raw = common::request(common::USER, common::PASSWORD, "a", "m");
    assert!(gateway.handle(&raw, "r").await.unwrap().outcome.success);

    gateway.connections().shutdown().await;

    let reply = gateway.handle(&raw, "r").await.unwrap();
    assert!(!reply.outcome.success);
    assert_eq!(reply.outcome.code, PublishOutcome::FAILURE_CODE);
    assert_eq!(gateway.connections().channel_count(), 0);
}
