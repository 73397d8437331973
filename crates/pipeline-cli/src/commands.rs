//! Subcommand implementations.

use crate::settings::config_for;
use event_channel::{
    ChannelGroup, GroupStatus, HttpTransport, LoggingObserver, Sender, SenderConfig,
};
use event_storage::{EventStore, NewEventRecord, SqliteEventStore, StorageResult};
use pipeline_config_and_utils::{Config, Paths};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

type CommandResult = Result<(), Box<dyn std::error::Error>>;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

fn open_store(paths: &Paths) -> Result<SqliteEventStore, Box<dyn std::error::Error>> {
    Ok(SqliteEventStore::open(&paths.database_file())?)
}

/// Stored and in-flight record counts per channel. The two counts come from
/// separate queries, so in-flight is clamped at zero.
fn channel_rows(store: &dyn EventStore) -> StorageResult<Vec<(String, usize, usize)>> {
    let mut rows = Vec::new();
    for channel in store.channels()? {
        let stored = store.count(&channel)?;
        let available = store.count_available(&channel)?;
        rows.push((channel, stored, stored.saturating_sub(available)));
    }
    Ok(rows)
}

pub fn status(paths: &Paths, json: bool) -> CommandResult {
    let store = open_store(paths)?;
    let rows = channel_rows(&store)?;

    if json {
        let value: Vec<_> = rows
            .iter()
            .map(|(channel, stored, in_flight)| {
                serde_json::json!({
                    "channel": channel,
                    "stored": stored,
                    "inFlight": in_flight,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No stored events");
        return Ok(());
    }
    println!("{:<24} {:>10} {:>10}", "CHANNEL", "STORED", "IN FLIGHT");
    for (channel, stored, in_flight) in rows {
        println!("{:<24} {:>10} {:>10}", channel, stored, in_flight);
    }
    Ok(())
}

pub fn clear(paths: &Paths, channel: &str) -> CommandResult {
    let store = open_store(paths)?;
    let removed = store.clear(channel)?;
    info!(channel, removed, "Cleared channel");
    println!("Removed {} events from {}", removed, channel);
    Ok(())
}

pub fn enqueue(
    paths: &Paths,
    config: &Config,
    channel: &str,
    type_tag: &str,
    body: String,
) -> CommandResult {
    let store = open_store(paths)?;
    let capacity = config_for(config, channel).capacity;
    let receipt = store.append(channel, &NewEventRecord::now(type_tag, body), capacity)?;
    if receipt.evicted_any() {
        warn!(channel, evicted = receipt.evicted.len(), "Capacity reached");
    }
    println!("Stored event {} in {}", receipt.record_id, channel);
    Ok(())
}

/// Register every configured or stored channel, flush, and wait until the
/// store is empty or `timeout` passes.
pub async fn drain(paths: &Paths, config: &Config, timeout: Duration) -> CommandResult {
    let store: Arc<dyn EventStore> = Arc::new(open_store(paths)?);
    let transport = Arc::new(HttpTransport::new(Duration::from_secs(
        config.request_timeout_secs,
    ))?);
    let sender = Arc::new(Sender::new(
        transport,
        SenderConfig {
            endpoint: config.ingestion_url.clone(),
            app_secret: config.app_secret.clone(),
            install_id: config.install_id.clone(),
            ..Default::default()
        },
    ));

    let group = ChannelGroup::open(store.clone(), sender, Arc::new(LoggingObserver))?;
    let (handle, task) = group.spawn();

    let mut names: BTreeSet<String> = config.channels.keys().cloned().collect();
    names.extend(store.channels()?);
    for name in &names {
        handle.add_channel(name.as_str(), config_for(config, name)).await?;
    }
    handle.flush_all();
    info!(channels = names.len(), "Draining");

    let deadline = tokio::time::Instant::now() + timeout;
    let status = loop {
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        let status = handle.status().await?;
        if is_drained(&status) || tokio::time::Instant::now() >= deadline {
            break status;
        }
        // Keep pushing partial batches out instead of waiting for the window.
        handle.flush_all();
    };

    handle.shutdown().await?;
    task.await?;

    print_group(&status);
    if !is_drained(&status) {
        return Err(format!("drain timed out after {:?}", timeout).into());
    }
    Ok(())
}

fn is_drained(status: &GroupStatus) -> bool {
    status
        .channels
        .iter()
        .all(|c| c.pending == 0 && c.in_flight_batches == 0)
}

fn print_group(status: &GroupStatus) {
    println!(
        "{:<24} {:>10} {:>10} {:>10}",
        "CHANNEL", "PENDING", "IN FLIGHT", "FAILURES"
    );
    for channel in &status.channels {
        println!(
            "{:<24} {:>10} {:>10} {:>10}",
            channel.name, channel.pending, channel.in_flight_batches, channel.consecutive_failures
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn enqueue_then_clear() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        paths.ensure_dirs().unwrap();
        let config = Config::default();

        enqueue(&paths, &config, "logs", "event", "one".to_string()).unwrap();
        enqueue(&paths, &config, "logs", "event", "two".to_string()).unwrap();
        let store = open_store(&paths).unwrap();
        assert_eq!(store.count("logs").unwrap(), 2);

        clear(&paths, "logs").unwrap();
        assert_eq!(store.count("logs").unwrap(), 0);
        assert!(status(&paths, true).is_ok());
    }

    #[test]
    fn rows_count_in_flight_records() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        for n in 0..3 {
            store
                .append("logs", &NewEventRecord::now("event", format!("event-{}", n)), 100)
                .unwrap();
        }
        store.mark_in_flight("logs", "batch-1", &[1, 2]).unwrap();

        let rows = channel_rows(&store).unwrap();
        assert_eq!(rows, vec![("logs".to_string(), 3, 2)]);
    }

    #[test]
    fn drained_requires_nothing_pending_or_in_flight() {
        let mut status = GroupStatus {
            enabled: true,
            network_available: true,
            channels: vec![],
        };
        assert!(is_drained(&status));

        status.channels.push(event_channel::ChannelStatus {
            name: "logs".to_string(),
            state: event_channel::ChannelState::Running,
            pending: 0,
            in_flight_batches: 1,
            consecutive_failures: 0,
            retry_in: None,
            storage_degraded: false,
            retiring: false,
        });
        assert!(!is_drained(&status));
    }
}
