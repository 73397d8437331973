//! Notifications emitted by channels.
//!
//! Events are emitted after the storage change they describe has been
//! attempted. The observer decides what they mean; channels never wait on it.

use crate::{BatchId, ChannelState};
use event_storage::RecordId;
use parking_lot::Mutex;
use std::time::Duration;

/// Why records left a channel without being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Storage was full and the oldest records made room.
    CapacityEviction,
    /// The in-memory fallback buffer overflowed while storage was failing.
    FallbackOverflow,
}

/// An observable consequence of channel activity.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Records were discarded before delivery. Ids are empty for records
    /// that never reached storage.
    RecordsDiscarded {
        channel: String,
        record_ids: Vec<RecordId>,
        count: usize,
        reason: DiscardReason,
    },
    /// A batch was accepted by the ingestion endpoint.
    BatchSent {
        channel: String,
        batch_id: BatchId,
        record_count: usize,
    },
    /// A batch failed recoverably and its records wait for the next attempt.
    BatchRetryScheduled {
        channel: String,
        batch_id: BatchId,
        consecutive_failures: u32,
        delay: Duration,
        reason: String,
    },
    /// A batch failed fatally and its records were deleted.
    BatchDropped {
        channel: String,
        batch_id: BatchId,
        record_count: usize,
        reason: String,
    },
    /// All of a channel's records were deleted by clear or disable.
    ChannelCleared { channel: String, record_count: usize },
    /// A storage operation failed.
    StorageDegraded {
        channel: String,
        operation: &'static str,
        error: String,
    },
    /// Storage accepted the writes that had been held back.
    StorageRecovered { channel: String },
    /// The channel moved between running, paused and disabled.
    StateChanged { channel: String, state: ChannelState },
}

impl ChannelEvent {
    pub fn channel(&self) -> &str {
        match self {
            Self::RecordsDiscarded { channel, .. }
            | Self::BatchSent { channel, .. }
            | Self::BatchRetryScheduled { channel, .. }
            | Self::BatchDropped { channel, .. }
            | Self::ChannelCleared { channel, .. }
            | Self::StorageDegraded { channel, .. }
            | Self::StorageRecovered { channel }
            | Self::StateChanged { channel, .. } => channel,
        }
    }
}

/// Receives channel events.
///
/// Called from the group worker, so implementations must return quickly.
pub trait ChannelObserver: Send + Sync {
    fn on_event(&self, event: ChannelEvent);
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullObserver;

impl ChannelObserver for NullObserver {
    fn on_event(&self, _event: ChannelEvent) {}
}

/// Logs every event through `tracing`.
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl ChannelObserver for LoggingObserver {
    fn on_event(&self, event: ChannelEvent) {
        tracing::debug!(channel = event.channel(), event = ?event, "Channel event");
    }
}

/// Records every event for inspection in tests.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ChannelEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded events.
    pub fn events(&self) -> Vec<ChannelEvent> {
        self.events.lock().clone()
    }

    /// Returns the recorded events for one channel.
    pub fn events_for(&self, channel: &str) -> Vec<ChannelEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.channel() == channel)
            .cloned()
            .collect()
    }

    /// Ids of every record reported discarded on `channel`.
    pub fn discarded_ids(&self, channel: &str) -> Vec<RecordId> {
        self.events_for(channel)
            .into_iter()
            .filter_map(|e| match e {
                ChannelEvent::RecordsDiscarded { record_ids, .. } => Some(record_ids),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChannelObserver for RecordingObserver {
    fn on_event(&self, event: ChannelEvent) {
        self.events.lock().push(event);
    }
}
