//! Exponential backoff with bounded jitter.

use crate::BackoffConfig;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// Delay before the next attempt after `consecutive_failures` failures.
///
/// `min(max, base * 2^(n-1) * (1 + jitter_ratio * sample))`. With the ratio
/// in `[0, 1]` the sequence never decreases as `n` grows.
pub fn compute_backoff(
    consecutive_failures: u32,
    config: &BackoffConfig,
    jitter_sample: f64,
) -> Duration {
    if consecutive_failures == 0 {
        return Duration::ZERO;
    }

    let base_ms = config.base.as_millis().min(u64::MAX as u128) as u64;
    let max_ms = config.max.as_millis().min(u64::MAX as u128) as u64;
    let shift = (consecutive_failures - 1).min(63);
    let nominal_ms = base_ms.saturating_mul(1u64 << shift);

    let ratio = config.jitter_ratio.clamp(0.0, 1.0);
    let sample = jitter_sample.clamp(0.0, 1.0);
    let jittered_ms = (nominal_ms as f64) * (1.0 + ratio * sample);

    Duration::from_millis(jittered_ms.min(max_ms as f64) as u64)
}

/// Failure streak and earliest permitted retry for one channel.
///
/// Every recoverable failure starts a new epoch. A batch carries the epoch it
/// was formed in, and only a success from the current epoch ends the streak:
/// a batch formed before the failure says nothing about whether the endpoint
/// has recovered.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    consecutive_failures: u32,
    next_allowed_at: Option<Instant>,
    epoch: u64,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn next_allowed_at(&self) -> Option<Instant> {
        self.next_allowed_at
    }

    /// Current failure epoch; stamp it on batches when they form.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Count a recoverable failure and push the next attempt out.
    pub fn record_failure(&mut self, now: Instant, config: &BackoffConfig) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.epoch = self.epoch.wrapping_add(1);
        let sample = rand::thread_rng().gen::<f64>();
        let delay = compute_backoff(self.consecutive_failures, config, sample);
        self.next_allowed_at = Some(now + delay);
        delay
    }

    /// Apply a success from a batch formed in `epoch`. Returns whether the
    /// streak was reset; a success from before the latest failure leaves the
    /// pending delay in place.
    pub fn record_success(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch {
            return false;
        }
        self.reset();
        true
    }

    /// Forget the streak and any pending delay.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.next_allowed_at = None;
    }

    /// Drop the pending delay but keep the failure count.
    pub fn skip_delay(&mut self) {
        self.next_allowed_at = None;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_allowed_at.map_or(true, |at| now >= at)
    }

    /// Time left until the next attempt, if one is pending.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.next_allowed_at
            .filter(|at| *at > now)
            .map(|at| at - now)
    }
}
