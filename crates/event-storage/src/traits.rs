//! Storage trait definitions.

use crate::{AppendReceipt, EventRecord, NewEventRecord, RecordId, StorageResult};

/// Durable per-channel event log.
///
/// Every mutating call must be durable before it returns `Ok`: a crash right
/// after a successful `append` keeps the record, a crash right after a
/// successful removal never resurrects it.
pub trait EventStore: Send + Sync {
    /// Append a record to a channel, evicting the oldest records if the
    /// channel would hold more than `capacity` records.
    fn append(
        &self,
        channel: &str,
        record: &NewEventRecord,
        capacity: usize,
    ) -> StorageResult<AppendReceipt>;

    /// Oldest records of a channel that are not part of an in-flight batch.
    /// Does not remove anything.
    fn take_oldest(&self, channel: &str, max_count: usize) -> StorageResult<Vec<EventRecord>>;

    /// Assign records to an in-flight batch.
    fn mark_in_flight(
        &self,
        channel: &str,
        batch_id: &str,
        record_ids: &[RecordId],
    ) -> StorageResult<()>;

    /// Delete the records still assigned to a batch. Returns how many were deleted.
    fn remove_batch(&self, channel: &str, batch_id: &str) -> StorageResult<usize>;

    /// Return a batch's records to the pending pool. Returns how many were released.
    fn release_batch(&self, channel: &str, batch_id: &str) -> StorageResult<usize>;

    /// Delete specific records.
    fn remove(&self, channel: &str, record_ids: &[RecordId]) -> StorageResult<usize>;

    /// Number of stored records for a channel, in flight or not.
    fn count(&self, channel: &str) -> StorageResult<usize>;

    /// Number of stored records for a channel that are not in flight.
    fn count_available(&self, channel: &str) -> StorageResult<usize>;

    /// Delete every record of a channel.
    fn clear(&self, channel: &str) -> StorageResult<usize>;

    /// Release all in-flight assignments left behind by a previous process.
    fn recover(&self) -> StorageResult<usize>;

    /// Channels that currently hold records.
    fn channels(&self) -> StorageResult<Vec<String>>;

    /// Whether a channel has no stored records.
    fn is_empty(&self, channel: &str) -> StorageResult<bool> {
        Ok(self.count(channel)? == 0)
    }
}
