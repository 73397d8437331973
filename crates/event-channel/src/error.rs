//! Channel error types.

use thiserror::Error;

/// Channel error type.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] event_storage::StorageError),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid channel or sender configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Channel not registered with the group
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// Channel name already registered
    #[error("Channel already exists: {0}")]
    ChannelExists(String),

    /// The group worker is no longer running
    #[error("Channel group is closed")]
    GroupClosed,
}

/// Result type alias using ChannelError.
pub type ChannelResult<T> = Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_not_found_display() {
        let err = ChannelError::ChannelNotFound("crashes".to_string());
        assert_eq!(err.to_string(), "Channel not found: crashes");
    }

    #[test]
    fn storage_error_from() {
        let err: ChannelError =
            event_storage::StorageError::Unavailable("disk full".to_string()).into();
        assert_eq!(err.to_string(), "Storage error: Storage unavailable: disk full");
    }
}
