//! Decides when buffered records become a batch.

use crate::ChannelConfig;
use event_storage::RecordId;
use std::collections::BTreeMap;
use tokio::time::Instant;

/// Why a batch was formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Enough records for a full batch.
    SizeReached,
    /// An explicit flush was requested.
    Manual,
    /// The oldest buffered record waited a full interval.
    IntervalElapsed,
}

/// A buffered record and the instant the channel first saw it.
pub type Arrival = (RecordId, Instant);

/// Records the channel knows are stored but never saw arrive, such as the
/// backlog of a previous process.
#[derive(Debug, Clone, Copy)]
struct Backlog {
    remaining: usize,
    since: Instant,
}

/// Per-channel batching window.
///
/// The window is measured from the oldest record still waiting to be
/// batched, so records left over by a size-limited batch keep their age.
/// A manual flush stays requested until the buffer drains.
#[derive(Debug, Default)]
pub struct BatchingController {
    arrivals: BTreeMap<RecordId, Instant>,
    backlog: Option<Backlog>,
    flush_requested: bool,
}

impl BatchingController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_buffered(&mut self, record_id: RecordId, at: Instant) {
        self.arrivals.entry(record_id).or_insert(at);
    }

    /// Account for `count` stored records whose arrival is unknown.
    pub fn note_backlog(&mut self, count: usize, now: Instant) {
        if count == 0 {
            return;
        }
        let since = self
            .backlog
            .filter(|b| b.remaining > 0)
            .map_or(now, |b| b.since.min(now));
        self.backlog = Some(Backlog {
            remaining: count,
            since,
        });
    }

    pub fn request_flush(&mut self) {
        self.flush_requested = true;
    }

    pub fn flush_requested(&self) -> bool {
        self.flush_requested
    }

    /// Arrival of the oldest record still waiting for a batch.
    pub fn window_started(&self) -> Option<Instant> {
        let known = self.arrivals.values().min().copied();
        let backlog = self
            .backlog
            .filter(|b| b.remaining > 0)
            .map(|b| b.since);
        match (known, backlog) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Whether a batch should be formed now from `available` records.
    pub fn decide(
        &mut self,
        available: usize,
        now: Instant,
        config: &ChannelConfig,
    ) -> Option<Trigger> {
        if available == 0 {
            self.reset();
            return None;
        }

        let started = match self.window_started() {
            Some(at) => at,
            None => {
                self.note_backlog(available, now);
                now
            }
        };
        if available >= config.max_batch_size {
            Some(Trigger::SizeReached)
        } else if self.flush_requested {
            Some(Trigger::Manual)
        } else if now >= started + config.batch_interval {
            Some(Trigger::IntervalElapsed)
        } else {
            None
        }
    }

    /// Take a formed batch's records out of the window. The returned
    /// arrivals go back through [`BatchingController::restore`] if the batch
    /// is released for a retry.
    pub fn on_batch_formed(
        &mut self,
        record_ids: &[RecordId],
        remaining: usize,
        now: Instant,
    ) -> Vec<Arrival> {
        let taken = record_ids
            .iter()
            .map(|id| (*id, self.take_arrival(*id, now)))
            .collect();
        if remaining == 0 {
            self.reset();
        }
        taken
    }

    /// Put released records back with their original arrival.
    pub fn restore(&mut self, arrivals: impl IntoIterator<Item = Arrival>) {
        for (record_id, at) in arrivals {
            self.note_buffered(record_id, at);
        }
    }

    /// Drop records that left storage without being batched.
    pub fn forget(&mut self, record_ids: &[RecordId]) {
        for id in record_ids {
            if self.arrivals.remove(id).is_none() {
                if let Some(backlog) = self.backlog.as_mut() {
                    backlog.remaining = backlog.remaining.saturating_sub(1);
                }
            }
        }
    }

    /// When the current window elapses.
    pub fn deadline(&self, config: &ChannelConfig) -> Option<Instant> {
        self.window_started().map(|at| at + config.batch_interval)
    }

    pub fn reset(&mut self) {
        self.arrivals.clear();
        self.backlog = None;
        self.flush_requested = false;
    }

    fn take_arrival(&mut self, record_id: RecordId, now: Instant) -> Instant {
        if let Some(at) = self.arrivals.remove(&record_id) {
            return at;
        }
        match self.backlog.as_mut() {
            Some(backlog) if backlog.remaining > 0 => {
                backlog.remaining -= 1;
                backlog.since
            }
            _ => now,
        }
    }
}
