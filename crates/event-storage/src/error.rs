//! Storage error types.

use thiserror::Error;

/// Storage error type.
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid data error
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Backend unavailable (used by non-SQLite stores and test doubles)
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias using StorageError.
pub type StorageResult<T> = Result<T, StorageError>;
