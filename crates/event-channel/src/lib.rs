//! Batching, retrying event channels for the telemetry pipeline.
//!
//! This crate provides:
//! - `Channel`: one named stream of events with its own batching window,
//!   in-flight limit, capacity and backoff
//! - `ChannelGroup`: the worker task that owns every channel and routes
//!   commands, dispatch outcomes and timers
//! - `Sender` and `Transport`: batch encoding, delivery and classification
//!   of results into success, recoverable and fatal
//! - `ChannelObserver`: notifications for evictions, deliveries, drops and
//!   storage trouble
//!
//! # Flow
//!
//! ```ignore
//! let group = ChannelGroup::open(storage, sender, Arc::new(LoggingObserver))?;
//! let (handle, _task) = group.spawn();
//! handle.add_channel("analytics", ChannelConfig::default()).await?;
//! handle.enqueue("analytics", OutgoingEvent::new("page_view", body));
//! ```
//!
//! Every record is persisted before it is eligible for a batch, and only
//! removed once its batch succeeded or failed fatally. Delivery is
//! at-least-once.

mod backoff;
mod batch;
mod batching;
mod channel;
mod classify;
mod config;
mod error;
mod group;
mod observer;
mod sender;
mod timers;
mod transport;

#[cfg(test)]
mod tests;

pub use backoff::{compute_backoff, RetryState};
pub use batch::{Batch, BatchId, OutgoingEvent};
pub use batching::{Arrival, BatchingController, Trigger};
pub use channel::{Channel, ChannelState, ChannelStatus, Completion, STORAGE_RETRY_INTERVAL};
pub use classify::{classify, ClassificationTable, SendOutcome, StatusMatcher, TransportResult};
pub use config::{
    BackoffConfig, ChannelConfig, DEFAULT_BATCH_INTERVAL, DEFAULT_CAPACITY, DEFAULT_MAX_BATCH_SIZE,
    DEFAULT_MAX_IN_FLIGHT,
};
pub use error::{ChannelError, ChannelResult};
pub use group::{ChannelGroup, ChannelGroupHandle, GroupStatus};
pub use observer::{
    ChannelEvent, ChannelObserver, DiscardReason, LoggingObserver, NullObserver, RecordingObserver,
};
pub use sender::{BatchEnvelope, DispatchReport, LogEntry, Sender, SenderConfig};
pub use timers::{TimerKind, TimerSchedule};
pub use transport::{HttpTransport, ScriptedTransport, Transport, TransportRequest};
