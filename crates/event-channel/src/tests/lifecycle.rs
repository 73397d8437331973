//! Channel and group lifecycle.

use super::harness::{config, event, TestGroup};
use crate::{ChannelError, ChannelEvent, ChannelState, TransportResult};
use std::time::Duration;

/// Disabling while a batch is in flight empties storage and the late outcome
/// changes nothing.
#[tokio::test(start_paused = true)]
async fn disable_ignores_outcome_in_flight() {
    let group = TestGroup::start();
    group.add("logs", config(3)).await;
    group.transport.hold();

    group.enqueue_n("logs", 4);
    group.settle().await;
    assert_eq!(group.transport.request_count(), 1);

    group.handle.set_channel_enabled("logs", false);
    let status = group.settle().await;
    assert_eq!(status.channel("logs").unwrap().state, ChannelState::Disabled);
    assert_eq!(group.pending("logs"), 0);

    group.transport.release();
    let status = group.settle().await;
    assert_eq!(group.sent_events("logs"), 0);
    assert_eq!(status.channel("logs").unwrap().in_flight_batches, 0);

    group.enqueue_n("logs", 3);
    group.settle().await;
    assert_eq!(group.pending("logs"), 0);
    assert_eq!(group.transport.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reenabled_channel_starts_fresh() {
    let group = TestGroup::start();
    group.add("logs", config(3)).await;
    group.handle.set_channel_enabled("logs", false);
    group.handle.set_channel_enabled("logs", true);

    group.enqueue_n("logs", 3);
    group.settle().await;
    assert_eq!(group.sent_ids(), vec![vec![1, 2, 3]]);
}

#[tokio::test(start_paused = true)]
async fn paused_channel_never_dispatches() {
    let group = TestGroup::start();
    group.add("logs", config(3)).await;
    group.handle.pause("logs");

    group.enqueue_n("logs", 5);
    let status = group.advance(Duration::from_secs(30)).await;
    assert_eq!(group.transport.request_count(), 0);
    assert_eq!(status.channel("logs").unwrap().state, ChannelState::Paused);
    assert_eq!(status.channel("logs").unwrap().pending, 5);

    group.handle.resume("logs");
    group.settle().await;
    assert_eq!(group.sent_ids(), vec![vec![1, 2, 3], vec![4, 5]]);
}

#[tokio::test(start_paused = true)]
async fn partial_batch_sent_after_interval() {
    let group = TestGroup::start();
    group.add("logs", config(10)).await;

    group.enqueue_n("logs", 2);
    group.advance(Duration::from_millis(2_900)).await;
    assert_eq!(group.transport.request_count(), 0);

    group.advance(Duration::from_millis(100)).await;
    assert_eq!(group.sent_ids(), vec![vec![1, 2]]);
}

#[tokio::test(start_paused = true)]
async fn flush_sends_partial_batch_now() {
    let group = TestGroup::start();
    group.add("logs", config(10)).await;

    group.enqueue_n("logs", 2);
    group.handle.flush("logs");
    group.settle().await;
    assert_eq!(group.sent_ids(), vec![vec![1, 2]]);
}

#[tokio::test(start_paused = true)]
async fn app_suspended_flushes_every_channel() {
    let group = TestGroup::start();
    group.add("crashes", config(10)).await;
    group.add("analytics", config(10)).await;

    group.handle.enqueue("crashes", event(0));
    group.handle.enqueue("analytics", event(1));
    group.handle.app_suspended();
    group.settle().await;

    assert_eq!(group.transport.request_count(), 2);
    assert_eq!(group.pending("crashes"), 0);
    assert_eq!(group.pending("analytics"), 0);
}

#[tokio::test(start_paused = true)]
async fn clear_discards_stored_records() {
    let group = TestGroup::start();
    group.add("logs", config(10)).await;

    group.enqueue_n("logs", 4);
    group.handle.clear("logs");
    let status = group.settle().await;

    assert_eq!(status.channel("logs").unwrap().state, ChannelState::Running);
    assert_eq!(group.pending("logs"), 0);
    assert!(group.observer.events_for("logs").contains(&ChannelEvent::ChannelCleared {
        channel: "logs".to_string(),
        record_count: 4,
    }));
}

#[tokio::test(start_paused = true)]
async fn group_disable_covers_channels_added_later() {
    let group = TestGroup::start();
    group.add("crashes", config(3)).await;
    group.handle.set_enabled(false);
    group.add("analytics", config(3)).await;

    group.enqueue_n("analytics", 3);
    let status = group.settle().await;
    assert!(!status.enabled);
    assert_eq!(status.channel("crashes").unwrap().state, ChannelState::Disabled);
    assert_eq!(status.channel("analytics").unwrap().state, ChannelState::Disabled);
    assert_eq!(group.pending("analytics"), 0);

    group.handle.set_enabled(true);
    group.enqueue_n("analytics", 3);
    group.settle().await;
    assert_eq!(group.transport.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn removed_channel_flushes_first() {
    let group = TestGroup::start();
    group.add("logs", config(10)).await;

    group.enqueue_n("logs", 2);
    group.handle.remove_channel("logs").await.unwrap();
    let status = group.settle().await;

    assert_eq!(group.sent_ids(), vec![vec![1, 2]]);
    assert!(status.channel("logs").is_none());
    assert_eq!(group.pending("logs"), 0);
}

#[tokio::test(start_paused = true)]
async fn removed_channel_discards_after_failure() {
    let group = TestGroup::start();
    group.add("logs", config(10)).await;
    group.transport.push_response(TransportResult::Status(503));

    group.enqueue_n("logs", 2);
    group.handle.remove_channel("logs").await.unwrap();
    let status = group.settle().await;
    group.advance(Duration::from_secs(5)).await;

    assert!(status.channel("logs").is_none());
    assert_eq!(group.transport.request_count(), 1);
    assert_eq!(group.pending("logs"), 0);
}

#[tokio::test(start_paused = true)]
async fn removing_paused_channel_discards_without_sending() {
    let group = TestGroup::start();
    group.add("logs", config(10)).await;
    group.handle.pause("logs");

    group.enqueue_n("logs", 3);
    group.settle().await;
    assert_eq!(group.pending("logs"), 3);

    group.handle.remove_channel("logs").await.unwrap();
    let status = group.settle().await;

    assert!(status.channel("logs").is_none());
    assert_eq!(group.transport.request_count(), 0);
    assert_eq!(group.pending("logs"), 0);
}

#[tokio::test(start_paused = true)]
async fn registration_errors() {
    let group = TestGroup::start();
    group.add("logs", config(10)).await;

    assert!(matches!(
        group.handle.add_channel("logs", config(10)).await,
        Err(ChannelError::ChannelExists(_))
    ));
    assert!(matches!(
        group.handle.remove_channel("missing").await,
        Err(ChannelError::ChannelNotFound(_))
    ));
    assert!(matches!(
        group.handle.add_channel("bad", config(0)).await,
        Err(ChannelError::InvalidConfig(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn unknown_channel_events_are_dropped() {
    let group = TestGroup::start();
    group.handle.enqueue("missing", event(0));
    let status = group.settle().await;

    assert!(status.channels.is_empty());
    assert_eq!(group.pending("missing"), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_handle() {
    let group = TestGroup::start();
    group.add("logs", config(10)).await;

    group.handle.shutdown().await.unwrap();
    group.task.await.unwrap();

    assert!(matches!(
        group.handle.status().await,
        Err(ChannelError::GroupClosed)
    ));
    group.handle.enqueue("logs", event(0));
}
