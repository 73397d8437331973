//! Database migrations.
//!
//! Migrations run in order and are tracked in the `migrations` table. Each
//! one commits together with its `migrations` row, so an interrupted run
//! leaves the schema at the previous version.

use crate::{StorageError, StorageResult};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> StorageResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version > CURRENT_VERSION {
        return Err(StorageError::Migration(format!(
            "store schema v{} is newer than supported v{}",
            current_version, CURRENT_VERSION
        )));
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_event_records(conn)?;
    }
    if current_version < 2 {
        migrate_v2_in_flight_ledger(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: per-channel record log and the persisted id sequence.
fn migrate_v1_event_records(conn: &Connection) -> StorageResult<()> {
    info!("Applying migration v1: event records");

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS event_records (
            channel TEXT NOT NULL,
            record_id INTEGER NOT NULL,
            type_tag TEXT NOT NULL,
            payload BLOB NOT NULL,
            enqueued_at TEXT NOT NULL,
            PRIMARY KEY (channel, record_id)
        );

        CREATE TABLE IF NOT EXISTS channel_sequences (
            channel TEXT PRIMARY KEY,
            next_record_id INTEGER NOT NULL
        );
        ",
    )?;

    record_migration(&tx, 1, "event_records")?;
    tx.commit()?;
    Ok(())
}

/// V2: batch assignment column for the in-flight ledger.
fn migrate_v2_in_flight_ledger(conn: &Connection) -> StorageResult<()> {
    info!("Applying migration v2: in-flight ledger");

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "
        ALTER TABLE event_records ADD COLUMN batch_id TEXT;

        CREATE INDEX IF NOT EXISTS idx_event_records_batch
            ON event_records(channel, batch_id);
        ",
    )?;

    record_migration(&tx, 2, "in_flight_ledger")?;
    tx.commit()?;
    Ok(())
}
