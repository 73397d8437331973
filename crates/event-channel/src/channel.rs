//! A single named channel.
//!
//! A channel owns its batching window, retry state and the set of batches it
//! has in flight. Records live in the shared [`EventStore`]; a channel only
//! holds records in memory while storage is refusing writes.

use crate::{
    Arrival, Batch, BatchId, BatchingController, ChannelConfig, ChannelEvent, ChannelObserver,
    ChannelResult, DiscardReason, DispatchReport, OutgoingEvent, RetryState, SendOutcome, Sender,
    TimerKind,
};
use event_storage::{EventStore, NewEventRecord, RecordId, StorageError};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long to wait before retrying storage writes that failed.
pub const STORAGE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Accepting events and transmitting.
    Running,
    /// Accepting events, not transmitting.
    Paused,
    /// Dropping events. Storage for the channel is empty.
    Disabled,
}

/// What a dispatch outcome did to the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The batch was unknown, typically because the channel was disabled
    /// while it was in flight.
    Ignored,
    Delivered { removed: usize },
    RetryScheduled { delay: Duration },
    Dropped { removed: usize },
}

/// Point-in-time view of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub name: String,
    pub state: ChannelState,
    /// Stored records plus records waiting for storage.
    pub pending: usize,
    pub in_flight_batches: usize,
    pub consecutive_failures: u32,
    pub retry_in: Option<Duration>,
    pub storage_degraded: bool,
    pub retiring: bool,
}

#[derive(Debug)]
struct InFlightBatch {
    record_count: usize,
    dispatched_at: Instant,
    /// Failure epoch when the batch formed.
    epoch: u64,
    arrivals: Vec<Arrival>,
}

/// Storage writes that failed and must be replayed.
#[derive(Debug)]
enum DeferredOp {
    RemoveBatch(BatchId),
    ReleaseBatch(BatchId, Vec<Arrival>),
    Clear,
}

impl DeferredOp {
    fn operation(&self) -> &'static str {
        match self {
            Self::RemoveBatch(_) => "remove_batch",
            Self::ReleaseBatch(..) => "release_batch",
            Self::Clear => "clear",
        }
    }
}

/// A named channel.
pub struct Channel {
    name: String,
    config: ChannelConfig,
    state: ChannelState,
    storage: Arc<dyn EventStore>,
    sender: Arc<Sender>,
    observer: Arc<dyn ChannelObserver>,
    batching: BatchingController,
    retry: RetryState,
    in_flight: HashMap<BatchId, InFlightBatch>,
    fallback: VecDeque<(NewEventRecord, Instant)>,
    deferred: Vec<DeferredOp>,
    storage_degraded: bool,
    retiring: bool,
}

impl Channel {
    /// Create a running channel. Records already stored under `name` are
    /// picked up as its backlog.
    pub fn new(
        name: impl Into<String>,
        config: ChannelConfig,
        storage: Arc<dyn EventStore>,
        sender: Arc<Sender>,
        observer: Arc<dyn ChannelObserver>,
        now: Instant,
    ) -> ChannelResult<Self> {
        config.validate()?;

        let mut channel = Self {
            name: name.into(),
            config,
            state: ChannelState::Running,
            storage,
            sender,
            observer,
            batching: BatchingController::new(),
            retry: RetryState::new(),
            in_flight: HashMap::new(),
            fallback: VecDeque::new(),
            deferred: Vec::new(),
            storage_degraded: false,
            retiring: false,
        };

        match channel.storage.count_available(&channel.name) {
            Ok(backlog) => {
                channel.batching.note_backlog(backlog, now);
                info!(channel = %channel.name, backlog, "Channel created");
            }
            Err(e) => channel.degrade("count_available", &e),
        }

        Ok(channel)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_retiring(&self) -> bool {
        self.retiring
    }

    /// Persist an event. Disabled and retiring channels drop it.
    pub fn enqueue(&mut self, event: OutgoingEvent, now: Instant) {
        if self.state == ChannelState::Disabled {
            debug!(channel = %self.name, "Dropping event for disabled channel");
            return;
        }
        if self.retiring {
            debug!(channel = %self.name, "Dropping event for retiring channel");
            return;
        }

        let record = event.into_record();
        if self.fallback.is_empty() {
            self.persist(record, now);
        } else {
            // Older records are still waiting; keep order by queueing behind them.
            self.push_fallback(record, now);
            self.drain_fallback();
        }
    }

    /// Send everything buffered as soon as the in-flight limit allows.
    pub fn flush(&mut self) {
        if self.state != ChannelState::Disabled {
            self.batching.request_flush();
        }
    }

    pub fn pause(&mut self) -> bool {
        if self.state != ChannelState::Running {
            return false;
        }
        self.set_state(ChannelState::Paused);
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.state != ChannelState::Paused {
            return false;
        }
        self.set_state(ChannelState::Running);
        true
    }

    pub fn enable(&mut self, now: Instant) -> bool {
        if self.state != ChannelState::Disabled {
            return false;
        }
        self.set_state(ChannelState::Running);
        match self.storage.count_available(&self.name) {
            Ok(backlog) => self.batching.note_backlog(backlog, now),
            Err(e) => self.degrade("count_available", &e),
        }
        true
    }

    /// Stop accepting events and delete everything the channel holds.
    /// Outcomes of batches already in flight are ignored when they arrive.
    pub fn disable(&mut self) -> bool {
        if self.state == ChannelState::Disabled {
            return false;
        }
        self.in_flight.clear();
        self.discard_all();
        self.set_state(ChannelState::Disabled);
        true
    }

    /// Delete every record of the channel without changing its state.
    /// Batches in flight are forgotten like on disable.
    pub fn clear(&mut self) {
        self.in_flight.clear();
        self.discard_all();
    }

    /// Start removal: flush what is buffered and accept nothing new.
    pub fn retire(&mut self) {
        self.retiring = true;
        self.batching.request_flush();
    }

    /// Whether a retiring channel has nothing left in flight.
    pub fn is_retired(&self) -> bool {
        self.retiring && self.in_flight.is_empty()
    }

    /// Connectivity came back: retry now instead of waiting out the delay.
    pub fn reset_backoff(&mut self) {
        if self.retry.consecutive_failures() > 0 {
            self.retry.skip_delay();
            self.batching.request_flush();
        }
    }

    /// The backoff delay ended: resend the released records right away.
    pub fn on_retry_due(&mut self) {
        if self.retry.consecutive_failures() > 0 {
            self.batching.request_flush();
        }
    }

    /// Form every batch that may be sent now and mark it in flight.
    pub fn poll_batches(&mut self, now: Instant) -> Vec<Batch> {
        if self.state != ChannelState::Running {
            return Vec::new();
        }

        self.run_deferred();
        if !self.fallback.is_empty() {
            self.drain_fallback();
        }
        if !self.retry.is_due(now) {
            return Vec::new();
        }

        let mut batches = Vec::new();
        let mut failed = false;
        while self.in_flight.len() < self.config.max_in_flight {
            let available = match self.storage.count_available(&self.name) {
                Ok(available) => available,
                Err(e) => {
                    self.degrade("count_available", &e);
                    failed = true;
                    break;
                }
            };
            let Some(trigger) = self.batching.decide(available, now, &self.config) else {
                break;
            };

            let records = match self
                .storage
                .take_oldest(&self.name, self.config.max_batch_size)
            {
                Ok(records) => records,
                Err(e) => {
                    self.degrade("take_oldest", &e);
                    failed = true;
                    break;
                }
            };
            if records.is_empty() {
                self.batching.reset();
                break;
            }

            let batch_id = Uuid::new_v4().to_string();
            let record_ids: Vec<RecordId> = records.iter().map(|r| r.record_id).collect();
            if let Err(e) = self
                .storage
                .mark_in_flight(&self.name, &batch_id, &record_ids)
            {
                self.degrade("mark_in_flight", &e);
                failed = true;
                break;
            }

            debug!(
                channel = %self.name,
                batch_id = %batch_id,
                record_count = records.len(),
                trigger = ?trigger,
                "Batch formed"
            );
            let arrivals = self.batching.on_batch_formed(
                &record_ids,
                available.saturating_sub(records.len()),
                now,
            );
            self.in_flight.insert(
                batch_id.clone(),
                InFlightBatch {
                    record_count: records.len(),
                    dispatched_at: now,
                    epoch: self.retry.epoch(),
                    arrivals,
                },
            );
            batches.push(Batch {
                batch_id,
                channel: self.name.clone(),
                records,
            });
        }

        if !failed {
            self.check_recovered();
        }
        if self.in_flight.len() >= self.config.max_in_flight {
            debug!(channel = %self.name, in_flight = self.in_flight.len(), "In-flight limit reached");
        }
        batches
    }

    /// Start sending a batch formed by [`Channel::poll_batches`].
    pub fn dispatch(&self, batch: &Batch) -> BoxFuture<'static, DispatchReport> {
        self.sender.dispatch(batch)
    }

    /// Apply the outcome of an in-flight batch.
    pub fn complete(&mut self, batch_id: &str, outcome: SendOutcome, now: Instant) -> Completion {
        let Some(entry) = self.in_flight.remove(batch_id) else {
            debug!(channel = %self.name, batch_id, "Ignoring outcome for unknown batch");
            return Completion::Ignored;
        };
        let elapsed_ms = now.saturating_duration_since(entry.dispatched_at).as_millis() as u64;

        match outcome {
            SendOutcome::Success => {
                let removed = self.remove_batch(batch_id);
                if !self.retry.record_success(entry.epoch) {
                    // Formed before a later failure; that failure's delay stands.
                    debug!(
                        channel = %self.name,
                        batch_id,
                        consecutive_failures = self.retry.consecutive_failures(),
                        "Keeping backoff after stale success"
                    );
                }
                info!(
                    channel = %self.name,
                    batch_id,
                    record_count = entry.record_count,
                    elapsed_ms,
                    "Batch delivered"
                );
                self.observer.on_event(ChannelEvent::BatchSent {
                    channel: self.name.clone(),
                    batch_id: batch_id.to_string(),
                    record_count: entry.record_count,
                });
                if matches!(self.storage.count_available(&self.name), Ok(n) if n > 0) {
                    self.batching.request_flush();
                }
                Completion::Delivered { removed }
            }
            SendOutcome::RecoverableFailure(reason) => {
                match self.storage.release_batch(&self.name, batch_id) {
                    Ok(_) => self.batching.restore(entry.arrivals),
                    Err(e) => {
                        self.degrade("release_batch", &e);
                        self.deferred.push(DeferredOp::ReleaseBatch(
                            batch_id.to_string(),
                            entry.arrivals,
                        ));
                    }
                }
                let delay = self.retry.record_failure(now, &self.config.backoff);
                warn!(
                    channel = %self.name,
                    batch_id,
                    reason = %reason,
                    consecutive_failures = self.retry.consecutive_failures(),
                    delay_ms = delay.as_millis() as u64,
                    "Batch failed, will retry"
                );
                self.observer.on_event(ChannelEvent::BatchRetryScheduled {
                    channel: self.name.clone(),
                    batch_id: batch_id.to_string(),
                    consecutive_failures: self.retry.consecutive_failures(),
                    delay,
                    reason,
                });
                Completion::RetryScheduled { delay }
            }
            SendOutcome::FatalFailure(reason) => {
                let removed = self.remove_batch(batch_id);
                error!(
                    channel = %self.name,
                    batch_id,
                    reason = %reason,
                    record_count = entry.record_count,
                    "Batch rejected, dropping records"
                );
                self.observer.on_event(ChannelEvent::BatchDropped {
                    channel: self.name.clone(),
                    batch_id: batch_id.to_string(),
                    record_count: entry.record_count,
                    reason,
                });
                Completion::Dropped { removed }
            }
        }
    }

    /// Wake-ups this channel needs, given its state after the last poll.
    pub fn deadlines(&self, now: Instant) -> Vec<(TimerKind, Instant)> {
        let mut timers = Vec::new();
        if self.state != ChannelState::Running {
            return timers;
        }

        if !self.fallback.is_empty() || !self.deferred.is_empty() {
            timers.push((TimerKind::StorageRetry, now + STORAGE_RETRY_INTERVAL));
        }
        if let Some(at) = self.retry.next_allowed_at() {
            if at > now {
                timers.push((TimerKind::Backoff, at));
                return timers;
            }
        }
        if self.in_flight.len() >= self.config.max_in_flight {
            return timers;
        }
        if let Some(at) = self.batching.deadline(&self.config) {
            // A window that is already due was not acted on, so storage is
            // failing; poll again later instead of spinning.
            let at = if at > now {
                at
            } else {
                now + STORAGE_RETRY_INTERVAL
            };
            timers.push((TimerKind::BatchWindow, at));
        }
        timers
    }

    pub fn status(&self, now: Instant) -> ChannelResult<ChannelStatus> {
        let stored = self.storage.count(&self.name)?;
        Ok(ChannelStatus {
            name: self.name.clone(),
            state: self.state,
            pending: stored + self.fallback.len(),
            in_flight_batches: self.in_flight.len(),
            consecutive_failures: self.retry.consecutive_failures(),
            retry_in: self.retry.remaining(now),
            storage_degraded: self.storage_degraded,
            retiring: self.retiring,
        })
    }

    fn set_state(&mut self, state: ChannelState) {
        info!(channel = %self.name, from = ?self.state, to = ?state, "Channel state changed");
        self.state = state;
        self.observer.on_event(ChannelEvent::StateChanged {
            channel: self.name.clone(),
            state,
        });
    }

    fn persist(&mut self, record: NewEventRecord, now: Instant) {
        match self
            .storage
            .append(&self.name, &record, self.config.capacity)
        {
            Ok(receipt) => {
                self.report_evicted(receipt.evicted);
                self.batching.note_buffered(receipt.record_id, now);
            }
            Err(e) => {
                self.degrade("append", &e);
                self.push_fallback(record, now);
            }
        }
    }

    fn push_fallback(&mut self, record: NewEventRecord, at: Instant) {
        if self.fallback.len() >= self.config.capacity {
            self.fallback.pop_front();
            warn!(channel = %self.name, "Fallback buffer full, dropping oldest event");
            self.observer.on_event(ChannelEvent::RecordsDiscarded {
                channel: self.name.clone(),
                record_ids: Vec::new(),
                count: 1,
                reason: DiscardReason::FallbackOverflow,
            });
        }
        self.fallback.push_back((record, at));
    }

    /// Move held-back records into storage in arrival order.
    fn drain_fallback(&mut self) {
        while let Some((record, at)) = self.fallback.front() {
            let at = *at;
            match self
                .storage
                .append(&self.name, record, self.config.capacity)
            {
                Ok(receipt) => {
                    self.fallback.pop_front();
                    self.report_evicted(receipt.evicted);
                    self.batching.note_buffered(receipt.record_id, at);
                }
                Err(e) => {
                    self.degrade("append", &e);
                    return;
                }
            }
        }
        self.check_recovered();
    }

    fn run_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }

        for op in std::mem::take(&mut self.deferred) {
            let result = match &op {
                DeferredOp::RemoveBatch(batch_id) => {
                    self.storage.remove_batch(&self.name, batch_id).map(drop)
                }
                DeferredOp::ReleaseBatch(batch_id, _) => {
                    self.storage.release_batch(&self.name, batch_id).map(drop)
                }
                DeferredOp::Clear => self.storage.clear(&self.name).map(drop),
            };
            match result {
                Ok(()) => {
                    if let DeferredOp::ReleaseBatch(_, arrivals) = op {
                        self.batching.restore(arrivals);
                    }
                }
                Err(e) => {
                    self.degrade(op.operation(), &e);
                    self.deferred.push(op);
                }
            }
        }
        self.check_recovered();
    }

    fn remove_batch(&mut self, batch_id: &str) -> usize {
        match self.storage.remove_batch(&self.name, batch_id) {
            Ok(removed) => removed,
            Err(e) => {
                self.degrade("remove_batch", &e);
                self.deferred
                    .push(DeferredOp::RemoveBatch(batch_id.to_string()));
                0
            }
        }
    }

    fn discard_all(&mut self) {
        let held_back = self.fallback.len();
        self.fallback.clear();
        self.deferred.clear();
        self.retry.reset();
        self.batching.reset();

        let stored = match self.storage.clear(&self.name) {
            Ok(removed) => removed,
            Err(e) => {
                self.degrade("clear", &e);
                self.deferred.push(DeferredOp::Clear);
                0
            }
        };
        self.check_recovered();

        info!(channel = %self.name, stored, held_back, "Channel cleared");
        self.observer.on_event(ChannelEvent::ChannelCleared {
            channel: self.name.clone(),
            record_count: stored + held_back,
        });
    }

    fn report_evicted(&mut self, evicted: Vec<RecordId>) {
        if evicted.is_empty() {
            return;
        }
        self.forget_evicted(&evicted);
        warn!(
            channel = %self.name,
            count = evicted.len(),
            first = evicted[0],
            "Capacity reached, evicted oldest records"
        );
        self.observer.on_event(ChannelEvent::RecordsDiscarded {
            channel: self.name.clone(),
            count: evicted.len(),
            record_ids: evicted,
            reason: DiscardReason::CapacityEviction,
        });
    }

    /// Evicted records may belong to a batch in flight; only the others
    /// were still counted by the batching window.
    fn forget_evicted(&mut self, evicted: &[RecordId]) {
        let mut waiting = Vec::with_capacity(evicted.len());
        for id in evicted {
            let in_flight = self.in_flight.values_mut().any(|batch| {
                let before = batch.arrivals.len();
                batch.arrivals.retain(|(record_id, _)| record_id != id);
                batch.arrivals.len() != before
            });
            if !in_flight {
                waiting.push(*id);
            }
        }
        self.batching.forget(&waiting);
    }

    fn degrade(&mut self, operation: &'static str, err: &StorageError) {
        warn!(channel = %self.name, operation, error = %err, "Storage operation failed");
        self.storage_degraded = true;
        self.observer.on_event(ChannelEvent::StorageDegraded {
            channel: self.name.clone(),
            operation,
            error: err.to_string(),
        });
    }

    fn check_recovered(&mut self) {
        if self.storage_degraded && self.fallback.is_empty() && self.deferred.is_empty() {
            self.storage_degraded = false;
            info!(channel = %self.name, "Storage recovered");
            self.observer.on_event(ChannelEvent::StorageRecovered {
                channel: self.name.clone(),
            });
        }
    }
}
