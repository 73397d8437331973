//! Backoff, outcome classification and the connectivity gate.

use super::harness::{config, TestGroup};
use crate::{BackoffConfig, ChannelConfig, ChannelEvent, TransportResult};
use std::time::Duration;

/// Three recoverable failures in a row back off 1s, 2s, 4s while the records
/// stay stored, then a success removes them.
#[tokio::test(start_paused = true)]
async fn backoff_doubles_until_success() {
    let group = TestGroup::start();
    group.add("logs", config(3)).await;
    for _ in 0..3 {
        group.transport.push_response(TransportResult::Status(503));
    }

    group.enqueue_n("logs", 3);
    let status = group.settle().await;
    let logs = status.channel("logs").unwrap();
    assert_eq!(logs.consecutive_failures, 1);
    assert_eq!(logs.retry_in, Some(Duration::from_secs(1)));
    assert_eq!(logs.pending, 3);

    group.advance(Duration::from_secs(1)).await;
    assert_eq!(group.pending("logs"), 3);
    group.advance(Duration::from_secs(2)).await;
    assert_eq!(group.pending("logs"), 3);
    assert_eq!(
        group.retry_delays("logs"),
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );

    let status = group.advance(Duration::from_secs(4)).await;
    assert_eq!(group.transport.request_count(), 4);
    assert_eq!(group.pending("logs"), 0);
    assert_eq!(status.channel("logs").unwrap().consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn nothing_is_sent_before_the_delay_ends() {
    let group = TestGroup::start();
    group.add("logs", config(3)).await;
    group.transport.push_response(TransportResult::NetworkError(
        "connection reset".to_string(),
    ));

    group.enqueue_n("logs", 6);
    group.settle().await;
    group.advance(Duration::from_millis(999)).await;
    assert_eq!(group.transport.request_count(), 1);

    group.advance(Duration::from_millis(1)).await;
    assert_eq!(group.sent_ids()[1], vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn success_resets_delay_to_base() {
    let group = TestGroup::start();
    group.add("logs", config(3)).await;
    group.transport.push_response(TransportResult::Status(500));
    group.transport.push_response(TransportResult::Status(200));
    group.transport.push_response(TransportResult::Status(429));

    group.enqueue_n("logs", 3);
    group.settle().await;
    group.advance(Duration::from_secs(1)).await;
    assert_eq!(group.pending("logs"), 0);

    group.enqueue_n("logs", 3);
    group.settle().await;
    assert_eq!(
        group.retry_delays("logs"),
        vec![Duration::from_secs(1), Duration::from_secs(1)]
    );
}

#[tokio::test(start_paused = true)]
async fn delay_is_capped() {
    let group = TestGroup::start();
    group
        .add(
            "logs",
            ChannelConfig {
                backoff: BackoffConfig::fixed(Duration::from_secs(1), Duration::from_secs(3)),
                ..config(1)
            },
        )
        .await;
    group
        .transport
        .set_default(TransportResult::Status(503));

    group.enqueue_n("logs", 1);
    group.settle().await;
    for delay in [1, 2, 3, 3] {
        group.advance(Duration::from_secs(delay)).await;
    }

    assert_eq!(
        group.retry_delays("logs"),
        [1, 2, 3, 3, 3]
            .into_iter()
            .map(Duration::from_secs)
            .collect::<Vec<_>>()
    );
    assert_eq!(group.pending("logs"), 1);
}

#[tokio::test(start_paused = true)]
async fn fatal_failure_drops_without_retry() {
    let group = TestGroup::start();
    group.add("logs", config(3)).await;
    group.transport.push_response(TransportResult::Status(400));

    group.enqueue_n("logs", 3);
    let status = group.settle().await;
    group.advance(Duration::from_secs(10)).await;

    assert_eq!(group.transport.request_count(), 1);
    assert_eq!(group.pending("logs"), 0);
    assert_eq!(status.channel("logs").unwrap().consecutive_failures, 0);
    assert!(group.observer.events_for("logs").iter().any(|e| matches!(
        e,
        ChannelEvent::BatchDropped { record_count: 3, reason, .. } if reason == "HTTP 400"
    )));
}

#[tokio::test(start_paused = true)]
async fn offline_holds_dispatch() {
    let group = TestGroup::start();
    group.add("logs", config(3)).await;
    group.handle.set_network_available(false);

    group.enqueue_n("logs", 5);
    group.advance(Duration::from_secs(10)).await;
    assert_eq!(group.transport.request_count(), 0);
    assert_eq!(group.pending("logs"), 5);

    group.handle.set_network_available(true);
    group.settle().await;
    assert_eq!(group.sent_ids(), vec![vec![1, 2, 3], vec![4, 5]]);
}

#[tokio::test(start_paused = true)]
async fn regaining_network_skips_remaining_delay() {
    let group = TestGroup::start();
    group
        .add(
            "logs",
            ChannelConfig {
                backoff: BackoffConfig::fixed(Duration::from_secs(30), Duration::from_secs(300)),
                ..config(3)
            },
        )
        .await;
    group.transport.push_response(TransportResult::Status(503));

    group.enqueue_n("logs", 3);
    let status = group.settle().await;
    assert_eq!(
        status.channel("logs").unwrap().retry_in,
        Some(Duration::from_secs(30))
    );

    group.handle.set_network_available(false);
    group.handle.set_network_available(true);
    group.settle().await;

    assert_eq!(group.transport.request_count(), 2);
    assert_eq!(group.pending("logs"), 0);
}
