//! SQLite-backed event store.

use crate::{
    migrations, AppendReceipt, EventRecord, EventStore, NewEventRecord, RecordId, StorageError,
    StorageResult,
};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use std::path::Path;
use tracing::{debug, info, warn};

/// Maximum number of ids bound into a single `IN (...)` clause.
const ID_CHUNK_SIZE: usize = 500;

/// SQLite event store.
///
/// All statements run under one connection guarded by a mutex, so appends,
/// evictions and removals on the same channel are serialized.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    /// Open a store at the given path, running migrations if needed.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // synchronous = FULL: a successful commit survives power loss.
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        migrations::run_migrations(&conn)?;

        info!(path = %path.display(), "Event store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store for testing.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA temp_store = MEMORY;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl EventStore for SqliteEventStore {
    fn append(
        &self,
        channel: &str,
        record: &NewEventRecord,
        capacity: usize,
    ) -> StorageResult<AppendReceipt> {
        if capacity == 0 {
            return Err(StorageError::InvalidData(format!(
                "capacity for channel {} must be at least 1",
                channel
            )));
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let record_id: RecordId = tx
            .query_row(
                "SELECT next_record_id FROM channel_sequences WHERE channel = ?1",
                params![channel],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(1);

        tx.execute(
            "INSERT INTO channel_sequences (channel, next_record_id) VALUES (?1, ?2)
             ON CONFLICT(channel) DO UPDATE SET next_record_id = excluded.next_record_id",
            params![channel, record_id + 1],
        )?;

        tx.execute(
            "INSERT INTO event_records (channel, record_id, type_tag, payload, enqueued_at, batch_id)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
            params![
                channel,
                record_id,
                record.type_tag,
                record.payload,
                record.enqueued_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            ],
        )?;

        let stored: i64 = tx.query_row(
            "SELECT COUNT(*) FROM event_records WHERE channel = ?1",
            params![channel],
            |row| row.get(0),
        )?;

        let excess = (stored as usize).saturating_sub(capacity);
        let mut evicted = Vec::with_capacity(excess);
        if excess > 0 {
            {
                let mut stmt = tx.prepare(
                    "SELECT record_id FROM event_records WHERE channel = ?1
                     ORDER BY record_id ASC LIMIT ?2",
                )?;
                let ids = stmt
                    .query_map(params![channel, excess as i64], |row| row.get::<_, i64>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                evicted.extend(ids);
            }
            delete_ids(&tx, channel, &evicted)?;
        }

        tx.commit()?;

        if !evicted.is_empty() {
            warn!(
                channel = %channel,
                count = evicted.len(),
                capacity,
                "Evicted oldest records to stay within capacity"
            );
        }
        debug!(channel = %channel, record_id, "Appended record");

        Ok(AppendReceipt { record_id, evicted })
    }

    fn take_oldest(&self, channel: &str, max_count: usize) -> StorageResult<Vec<EventRecord>> {
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT channel, record_id, type_tag, payload, enqueued_at
             FROM event_records
             WHERE channel = ?1 AND batch_id IS NULL
             ORDER BY record_id ASC
             LIMIT ?2",
        )?;

        let records = stmt
            .query_map(params![channel, max_count as i64], |row| {
                Ok(EventRecord {
                    channel: row.get(0)?,
                    record_id: row.get(1)?,
                    type_tag: row.get(2)?,
                    payload: row.get(3)?,
                    enqueued_at: parse_datetime(row.get::<_, String>(4)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn mark_in_flight(
        &self,
        channel: &str,
        batch_id: &str,
        record_ids: &[RecordId],
    ) -> StorageResult<()> {
        if record_ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for chunk in record_ids.chunks(ID_CHUNK_SIZE) {
            let sql = format!(
                "UPDATE event_records SET batch_id = ?1
                 WHERE channel = ?2 AND record_id IN ({})",
                placeholders(chunk.len(), 3)
            );
            let mut params_vec: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() + 2);
            params_vec.push(&batch_id);
            params_vec.push(&channel);
            for id in chunk {
                params_vec.push(id);
            }
            tx.execute(&sql, params_vec.as_slice())?;
        }
        tx.commit()?;

        debug!(channel = %channel, batch_id = %batch_id, count = record_ids.len(), "Marked records in flight");
        Ok(())
    }

    fn remove_batch(&self, channel: &str, batch_id: &str) -> StorageResult<usize> {
        let conn = self.conn.lock();
        let count = conn.execute(
            "DELETE FROM event_records WHERE channel = ?1 AND batch_id = ?2",
            params![channel, batch_id],
        )?;
        debug!(channel = %channel, batch_id = %batch_id, count, "Removed batch records");
        Ok(count)
    }

    fn release_batch(&self, channel: &str, batch_id: &str) -> StorageResult<usize> {
        let conn = self.conn.lock();
        let count = conn.execute(
            "UPDATE event_records SET batch_id = NULL WHERE channel = ?1 AND batch_id = ?2",
            params![channel, batch_id],
        )?;
        debug!(channel = %channel, batch_id = %batch_id, count, "Released batch records");
        Ok(count)
    }

    fn remove(&self, channel: &str, record_ids: &[RecordId]) -> StorageResult<usize> {
        if record_ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let count = delete_ids(&tx, channel, record_ids)?;
        tx.commit()?;
        Ok(count)
    }

    fn count(&self, channel: &str) -> StorageResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM event_records WHERE channel = ?1",
            params![channel],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn count_available(&self, channel: &str) -> StorageResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM event_records WHERE channel = ?1 AND batch_id IS NULL",
            params![channel],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn clear(&self, channel: &str) -> StorageResult<usize> {
        let conn = self.conn.lock();
        let count = conn.execute(
            "DELETE FROM event_records WHERE channel = ?1",
            params![channel],
        )?;
        info!(channel = %channel, count, "Cleared channel records");
        Ok(count)
    }

    fn recover(&self) -> StorageResult<usize> {
        let conn = self.conn.lock();
        let count = conn.execute(
            "UPDATE event_records SET batch_id = NULL WHERE batch_id IS NOT NULL",
            [],
        )?;
        if count > 0 {
            info!(count, "Recovered in-flight records to pending");
        }
        Ok(count)
    }

    fn channels(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT DISTINCT channel FROM event_records ORDER BY channel ASC")?;
        let channels = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(channels)
    }
}

/// Delete the given ids of a channel, chunked to stay under the bind limit.
fn delete_ids(conn: &Connection, channel: &str, record_ids: &[RecordId]) -> StorageResult<usize> {
    let mut total = 0;
    for chunk in record_ids.chunks(ID_CHUNK_SIZE) {
        let sql = format!(
            "DELETE FROM event_records WHERE channel = ?1 AND record_id IN ({})",
            placeholders(chunk.len(), 2)
        );
        let mut params_vec: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() + 1);
        params_vec.push(&channel);
        for id in chunk {
            params_vec.push(id);
        }
        total += conn.execute(&sql, params_vec.as_slice())?;
    }
    Ok(total)
}

/// Numbered placeholders `?start, ?start+1, ...`.
fn placeholders(count: usize, start: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse an RFC3339 datetime string, falling back to current time on error.
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
