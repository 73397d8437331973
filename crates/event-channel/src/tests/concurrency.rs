//! Several batches in flight on one channel.

use super::harness::{concurrent_config, TestGroup};
use crate::{BackoffConfig, ChannelConfig, ChannelEvent, TransportResult};
use std::time::Duration;

fn slow_retry(max_in_flight: usize) -> ChannelConfig {
    ChannelConfig {
        backoff: BackoffConfig::fixed(Duration::from_secs(30), Duration::from_secs(60)),
        ..concurrent_config(1, max_in_flight)
    }
}

#[tokio::test(start_paused = true)]
async fn in_flight_limit_caps_concurrent_batches() {
    let group = TestGroup::start();
    group.transport.answer_manually();
    group.add("logs", concurrent_config(1, 2)).await;

    group.enqueue_n("logs", 5);
    let status = group.settle().await;
    assert_eq!(group.sent_ids(), vec![vec![1], vec![2]]);
    assert_eq!(status.channel("logs").unwrap().in_flight_batches, 2);

    // A reply for the second batch frees one slot.
    assert!(group.transport.answer(1, TransportResult::Status(200)));
    group.settle().await;
    assert_eq!(group.sent_ids(), vec![vec![1], vec![2], vec![3]]);

    assert!(group.transport.answer(0, TransportResult::Status(200)));
    let status = group.settle().await;
    assert_eq!(group.sent_ids().len(), 4);
    assert_eq!(status.channel("logs").unwrap().in_flight_batches, 2);

    assert!(group.transport.answer(2, TransportResult::Status(200)));
    assert!(group.transport.answer(3, TransportResult::Status(200)));
    group.settle().await;
    assert!(group.transport.answer(4, TransportResult::Status(200)));
    group.settle().await;

    assert_eq!(
        group.sent_ids(),
        vec![vec![1], vec![2], vec![3], vec![4], vec![5]]
    );
    assert_eq!(group.pending("logs"), 0);
}

#[tokio::test(start_paused = true)]
async fn out_of_order_replies_settle_their_own_batches() {
    let group = TestGroup::start();
    group.transport.answer_manually();
    group.add("logs", concurrent_config(1, 3)).await;

    group.enqueue_n("logs", 3);
    group.settle().await;
    assert_eq!(group.sent_ids(), vec![vec![1], vec![2], vec![3]]);

    assert!(group.transport.answer(2, TransportResult::Status(200)));
    let status = group.settle().await;
    assert_eq!(group.pending("logs"), 2);
    assert_eq!(status.channel("logs").unwrap().in_flight_batches, 2);

    assert!(group.transport.answer(0, TransportResult::Status(200)));
    group.settle().await;
    assert_eq!(group.pending("logs"), 1);

    assert!(group.transport.answer(1, TransportResult::Status(400)));
    let status = group.settle().await;
    assert_eq!(group.pending("logs"), 0);
    assert_eq!(status.channel("logs").unwrap().in_flight_batches, 0);
    assert_eq!(group.sent_events("logs"), 2);

    let dropped: Vec<usize> = group
        .observer
        .events_for("logs")
        .into_iter()
        .filter_map(|e| match e {
            ChannelEvent::BatchDropped { record_count, .. } => Some(record_count),
            _ => None,
        })
        .collect();
    assert_eq!(dropped, vec![1]);
    assert_eq!(group.transport.request_count(), 3);
}

/// A success for a batch sent before a failure must not cancel the delay
/// that failure started.
#[tokio::test(start_paused = true)]
async fn earlier_success_keeps_backoff_of_later_failure() {
    let group = TestGroup::start();
    group.transport.push_response(TransportResult::Status(503));
    group.add("logs", slow_retry(3)).await;

    group.enqueue_n("logs", 3);
    let status = group.settle().await;
    assert_eq!(group.sent_ids(), vec![vec![1], vec![2], vec![3]]);
    assert_eq!(group.retry_delays("logs"), vec![Duration::from_secs(30)]);
    let logs = status.channel("logs").unwrap();
    assert_eq!(logs.retry_in, Some(Duration::from_secs(30)));
    assert_eq!(logs.consecutive_failures, 1);
    assert_eq!(group.pending("logs"), 1);

    group.advance(Duration::from_secs(29)).await;
    assert_eq!(group.transport.request_count(), 3);

    let status = group.advance(Duration::from_secs(1)).await;
    assert_eq!(
        group.sent_ids(),
        vec![vec![1], vec![2], vec![3], vec![1]]
    );
    assert_eq!(group.pending("logs"), 0);
    assert_eq!(status.channel("logs").unwrap().consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn failure_after_successes_still_backs_off() {
    let group = TestGroup::start();
    group.transport.answer_manually();
    group.add("logs", slow_retry(3)).await;

    group.enqueue_n("logs", 3);
    group.settle().await;

    assert!(group.transport.answer(0, TransportResult::Status(503)));
    group.settle().await;
    assert!(group.transport.answer(1, TransportResult::Status(200)));
    assert!(group.transport.answer(2, TransportResult::Status(200)));
    let status = group.settle().await;

    let logs = status.channel("logs").unwrap();
    assert_eq!(logs.retry_in, Some(Duration::from_secs(30)));
    assert_eq!(logs.in_flight_batches, 0);
    assert_eq!(group.transport.request_count(), 3);

    group.advance(Duration::from_secs(30)).await;
    assert_eq!(group.sent_ids()[3], vec![1]);
    assert!(group.transport.answer(3, TransportResult::Status(200)));
    let status = group.settle().await;
    assert_eq!(group.pending("logs"), 0);
    assert_eq!(status.channel("logs").unwrap().consecutive_failures, 0);
}

/// Records left behind by a full batch keep the age they had, so an overdue
/// remainder goes out at once instead of waiting a fresh interval.
#[tokio::test(start_paused = true)]
async fn overdue_remainder_is_not_held_for_another_interval() {
    let group = TestGroup::start();
    group.add("logs", concurrent_config(3, 3)).await;
    group.handle.pause("logs");

    group.enqueue_n("logs", 4);
    group.advance(Duration::from_secs(10)).await;
    assert_eq!(group.transport.request_count(), 0);

    group.transport.hold();
    group.handle.resume("logs");
    group.settle().await;

    assert_eq!(group.sent_ids(), vec![vec![1, 2, 3], vec![4]]);
    group.transport.release();
    group.settle().await;
    assert_eq!(group.pending("logs"), 0);
}
