//! Channel configuration.

use crate::{ChannelError, ChannelResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default maximum number of records per batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;

/// Default time a partial batch may wait before it is sent.
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_secs(3);

/// Default number of batches allowed in flight per channel. One keeps records
/// in enqueue order across retries.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1;

/// Default number of records retained per channel before eviction.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Exponential backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay after the first consecutive failure.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub max: Duration,
    /// Fraction of the nominal delay added as random jitter, in `[0, 1]`.
    pub jitter_ratio: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
            jitter_ratio: 0.2,
        }
    }
}

impl BackoffConfig {
    /// Backoff without jitter, used where delays must be exact.
    pub fn fixed(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter_ratio: 0.0,
        }
    }
}

/// Per-channel batching and retention settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Records per batch.
    pub max_batch_size: usize,
    /// Maximum age of the oldest buffered record before a partial batch is sent.
    pub batch_interval: Duration,
    /// Batches allowed in flight at once.
    ///
    /// Above one, a batch that fails recoverably is resent after batches that
    /// were formed behind it, so enqueue order only holds while sends succeed.
    pub max_in_flight: usize,
    /// Records retained in storage before the oldest are evicted.
    pub capacity: usize,
    /// Retry backoff.
    pub backoff: BackoffConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            batch_interval: DEFAULT_BATCH_INTERVAL,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            capacity: DEFAULT_CAPACITY,
            backoff: BackoffConfig::default(),
        }
    }
}

impl ChannelConfig {
    /// Check that the settings describe a usable channel.
    pub fn validate(&self) -> ChannelResult<()> {
        if self.max_batch_size == 0 {
            return Err(ChannelError::InvalidConfig(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(ChannelError::InvalidConfig(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.capacity == 0 {
            return Err(ChannelError::InvalidConfig(
                "capacity must be at least 1".to_string(),
            ));
        }
        if self.batch_interval.is_zero() {
            return Err(ChannelError::InvalidConfig(
                "batch_interval must be positive".to_string(),
            ));
        }
        if self.backoff.base > self.backoff.max {
            return Err(ChannelError::InvalidConfig(format!(
                "backoff base {:?} exceeds max {:?}",
                self.backoff.base, self.backoff.max
            )));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter_ratio) {
            return Err(ChannelError::InvalidConfig(format!(
                "jitter_ratio {} outside [0, 1]",
                self.backoff.jitter_ratio
            )));
        }
        Ok(())
    }
}
