//! Stored record model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a stored record, monotonic within its channel.
pub type RecordId = i64;

/// A record persisted in a channel's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub channel: String,
    pub record_id: RecordId,
    pub type_tag: String,
    pub payload: Vec<u8>,
    pub enqueued_at: DateTime<Utc>,
}

/// A record about to be appended. The store assigns the identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEventRecord {
    pub type_tag: String,
    pub payload: Vec<u8>,
    pub enqueued_at: DateTime<Utc>,
}

impl NewEventRecord {
    /// Build a record stamped with the current time.
    pub fn now(type_tag: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            type_tag: type_tag.into(),
            payload: payload.into(),
            enqueued_at: Utc::now(),
        }
    }
}

/// Result of a successful append.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendReceipt {
    /// Identifier assigned to the appended record.
    pub record_id: RecordId,
    /// Oldest records evicted to stay within capacity, in id order.
    pub evicted: Vec<RecordId>,
}

impl AppendReceipt {
    /// Whether the append had to evict older records.
    pub fn evicted_any(&self) -> bool {
        !self.evicted.is_empty()
    }
}
