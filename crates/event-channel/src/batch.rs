//! Events handed to a channel and the batches formed from them.

use event_storage::{EventRecord, NewEventRecord, RecordId};

/// Identifier of a transmitted batch.
pub type BatchId = String;

/// A telemetry event as produced by the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEvent {
    pub type_tag: String,
    pub body: Vec<u8>,
}

impl OutgoingEvent {
    pub fn new(type_tag: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            type_tag: type_tag.into(),
            body: body.into(),
        }
    }

    pub(crate) fn into_record(self) -> NewEventRecord {
        NewEventRecord::now(self.type_tag, self.body)
    }
}

/// Records transmitted together under one batch id.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub batch_id: BatchId,
    pub channel: String,
    pub records: Vec<EventRecord>,
}

impl Batch {
    pub fn record_ids(&self) -> Vec<RecordId> {
        self.records.iter().map(|r| r.record_id).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
