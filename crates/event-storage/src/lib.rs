//! Durable event storage for the telemetry pipeline.
//!
//! This crate provides:
//! - `EventStore`: the storage contract the channel layer programs against
//! - `SqliteEventStore`: a SQLite implementation with WAL mode and full sync
//! - Schema migrations tracked in a `migrations` table
//! - Model types for stored records and append receipts
//!
//! # Layout
//!
//! Each channel is an append log of records with identifiers assigned
//! monotonically per channel. Identifiers come from a persisted sequence
//! table, so they are never reused, not even after a channel is cleared.
//!
//! Records that belong to an in-flight batch carry that batch's identifier.
//! This is the ledger that lets a late outcome remove exactly the records it
//! covered, even if the channel was evicted or cleared in the meantime.
//!
//! ```ignore
//! let store = SqliteEventStore::open(&path)?;
//! store.recover()?;
//! let receipt = store.append("analytics", &record, 10_000)?;
//! let oldest = store.take_oldest("analytics", 50)?;
//! ```

mod db;
mod error;
mod migrations;
mod models;
mod traits;

pub use db::SqliteEventStore;
pub use error::{StorageError, StorageResult};
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::{AppendReceipt, EventRecord, NewEventRecord, RecordId};
pub use traits::EventStore;
