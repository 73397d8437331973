//! Integration tests for the channel group.
//!
//! - `harness.rs`        - Group fixture, scripted transport and a store that can be made to fail
//! - `ordering.rs`       - Batches carry records in enqueue order, across retries too
//! - `retry.rs`          - Backoff growth, reset on success, fatal drops, connectivity gate
//! - `capacity.rs`       - Eviction of the oldest records at capacity
//! - `lifecycle.rs`      - Pause, resume, enable, disable, clear, removal and shutdown
//! - `concurrency.rs`    - Several batches in flight, replies in any order
//! - `crash_safety.rs`   - Restart with batches left in flight
//! - `storage_failure.rs` - Degraded storage and recovery

mod concurrency;
mod lifecycle;
mod retry;
