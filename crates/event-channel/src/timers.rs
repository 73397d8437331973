//! Pending wake-ups for the group worker.

use std::collections::HashMap;
use tokio::time::Instant;

/// What a timer wakes a channel for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// The batching window elapses.
    BatchWindow,
    /// The backoff delay after a recoverable failure ends.
    Backoff,
    /// Retry storage writes that failed earlier.
    StorageRetry,
}

/// At most one deadline per channel and kind.
#[derive(Debug, Default)]
pub struct TimerSchedule {
    entries: HashMap<(String, TimerKind), Instant>,
}

impl TimerSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, channel: &str, kind: TimerKind, at: Instant) {
        self.entries.insert((channel.to_string(), kind), at);
    }

    pub fn deadline(&self, channel: &str, kind: TimerKind) -> Option<Instant> {
        self.entries.get(&(channel.to_string(), kind)).copied()
    }

    pub fn cancel_channel(&mut self, channel: &str) {
        self.entries.retain(|(name, _), _| name != channel);
    }

    /// Replace every timer of `channel` with `timers`.
    pub fn replace_channel(
        &mut self,
        channel: &str,
        timers: impl IntoIterator<Item = (TimerKind, Instant)>,
    ) {
        self.cancel_channel(channel);
        for (kind, at) in timers {
            self.schedule(channel, kind, at);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().min().copied()
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<(String, TimerKind)> {
        let mut due: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, at)| (*at, key.clone()))
            .collect();
        due.sort();

        for (_, key) in &due {
            self.entries.remove(key);
        }
        due.into_iter().map(|(_, key)| key).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
