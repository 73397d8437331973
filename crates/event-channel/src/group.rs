//! The channel group and its worker task.
//!
//! All channel state is owned by one worker task. Producers talk to it
//! through a cloneable [`ChannelGroupHandle`]; enqueue never waits on storage
//! or the network. The worker multiplexes three sources with `select!`:
//! commands, finished dispatches and the earliest pending timer.

use crate::{
    Channel, ChannelConfig, ChannelError, ChannelObserver, ChannelResult, ChannelStatus,
    DispatchReport, OutgoingEvent, SendOutcome, Sender, TimerKind, TimerSchedule,
};
use event_storage::EventStore;
use futures_util::FutureExt;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Point-in-time view of the whole group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupStatus {
    pub enabled: bool,
    pub network_available: bool,
    pub channels: Vec<ChannelStatus>,
}

impl GroupStatus {
    pub fn channel(&self, name: &str) -> Option<&ChannelStatus> {
        self.channels.iter().find(|c| c.name == name)
    }
}

/// Commands accepted by the group worker.
#[derive(Debug)]
enum GroupCommand {
    AddChannel {
        name: String,
        config: ChannelConfig,
        reply: oneshot::Sender<ChannelResult<()>>,
    },
    RemoveChannel {
        name: String,
        reply: oneshot::Sender<ChannelResult<()>>,
    },
    Enqueue {
        channel: String,
        event: OutgoingEvent,
    },
    Flush {
        channel: Option<String>,
    },
    Pause {
        channel: Option<String>,
    },
    Resume {
        channel: Option<String>,
    },
    SetChannelEnabled {
        channel: String,
        enabled: bool,
    },
    Clear {
        channel: String,
    },
    SetEnabled(bool),
    AppSuspended,
    SetNetworkAvailable(bool),
    Status {
        reply: oneshot::Sender<ChannelResult<GroupStatus>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running channel group.
#[derive(Clone, Debug)]
pub struct ChannelGroupHandle {
    commands: mpsc::UnboundedSender<GroupCommand>,
}

impl ChannelGroupHandle {
    fn send(&self, command: GroupCommand) {
        if self.commands.send(command).is_err() {
            debug!("Channel group closed, command dropped");
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> GroupCommand,
    ) -> ChannelResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| ChannelError::GroupClosed)?;
        response.await.map_err(|_| ChannelError::GroupClosed)
    }

    /// Register a channel. Fails if the name is taken or the config is invalid.
    pub async fn add_channel(
        &self,
        name: impl Into<String>,
        config: ChannelConfig,
    ) -> ChannelResult<()> {
        let name = name.into();
        self.request(|reply| GroupCommand::AddChannel {
            name,
            config,
            reply,
        })
        .await?
    }

    /// Flush and unregister a channel. Whatever is left once its in-flight
    /// batches settle is discarded.
    ///
    /// A paused channel, or any channel while the network is unavailable,
    /// has nothing in flight and cannot flush, so its backlog is discarded
    /// right away.
    pub async fn remove_channel(&self, name: impl Into<String>) -> ChannelResult<()> {
        let name = name.into();
        self.request(|reply| GroupCommand::RemoveChannel { name, reply })
            .await?
    }

    /// Hand an event to a channel. Returns immediately.
    pub fn enqueue(&self, channel: impl Into<String>, event: OutgoingEvent) {
        self.send(GroupCommand::Enqueue {
            channel: channel.into(),
            event,
        });
    }

    pub fn flush(&self, channel: impl Into<String>) {
        self.send(GroupCommand::Flush {
            channel: Some(channel.into()),
        });
    }

    pub fn flush_all(&self) {
        self.send(GroupCommand::Flush { channel: None });
    }

    pub fn pause(&self, channel: impl Into<String>) {
        self.send(GroupCommand::Pause {
            channel: Some(channel.into()),
        });
    }

    pub fn pause_all(&self) {
        self.send(GroupCommand::Pause { channel: None });
    }

    pub fn resume(&self, channel: impl Into<String>) {
        self.send(GroupCommand::Resume {
            channel: Some(channel.into()),
        });
    }

    pub fn resume_all(&self) {
        self.send(GroupCommand::Resume { channel: None });
    }

    pub fn set_channel_enabled(&self, channel: impl Into<String>, enabled: bool) {
        self.send(GroupCommand::SetChannelEnabled {
            channel: channel.into(),
            enabled,
        });
    }

    /// Delete every stored record of a channel.
    pub fn clear(&self, channel: impl Into<String>) {
        self.send(GroupCommand::Clear {
            channel: channel.into(),
        });
    }

    /// Enable or disable every channel, including ones added later.
    pub fn set_enabled(&self, enabled: bool) {
        self.send(GroupCommand::SetEnabled(enabled));
    }

    /// The host is about to be suspended: flush everything.
    pub fn app_suspended(&self) {
        self.send(GroupCommand::AppSuspended);
    }

    /// Gate transmission on connectivity. Regaining it retries immediately.
    pub fn set_network_available(&self, available: bool) {
        self.send(GroupCommand::SetNetworkAvailable(available));
    }

    pub async fn status(&self) -> ChannelResult<GroupStatus> {
        self.request(|reply| GroupCommand::Status { reply }).await?
    }

    /// Stop the worker. Batches in flight are abandoned; their records are
    /// released on the next start.
    pub async fn shutdown(&self) -> ChannelResult<()> {
        self.request(|reply| GroupCommand::Shutdown { reply }).await
    }
}

/// Owns every channel and drives batching, dispatch and retries.
pub struct ChannelGroup {
    storage: Arc<dyn EventStore>,
    sender: Arc<Sender>,
    observer: Arc<dyn ChannelObserver>,
    channels: HashMap<String, Channel>,
    timers: TimerSchedule,
    dispatches: JoinSet<DispatchReport>,
    enabled: bool,
    network_available: bool,
}

impl ChannelGroup {
    /// Create a group over `storage`, releasing batches a previous process
    /// left in flight.
    pub fn open(
        storage: Arc<dyn EventStore>,
        sender: Arc<Sender>,
        observer: Arc<dyn ChannelObserver>,
    ) -> ChannelResult<Self> {
        let recovered = storage.recover()?;
        if recovered > 0 {
            info!(recovered, "Released records left in flight by a previous run");
        }

        Ok(Self {
            storage,
            sender,
            observer,
            channels: HashMap::new(),
            timers: TimerSchedule::new(),
            dispatches: JoinSet::new(),
            enabled: true,
            network_available: true,
        })
    }

    /// Spawn the worker on the current runtime.
    pub fn spawn(self) -> (ChannelGroupHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        (ChannelGroupHandle { commands: tx }, task)
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<GroupCommand>) {
        info!("Channel group started");

        loop {
            let deadline = self.timers.next_deadline();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(GroupCommand::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(joined) = self.dispatches.join_next(), if !self.dispatches.is_empty() => {
                    self.on_dispatch_finished(joined);
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_timers_due();
                }
            }
        }

        info!("Channel group stopped");
    }

    fn handle_command(&mut self, command: GroupCommand) {
        let now = Instant::now();
        match command {
            GroupCommand::AddChannel {
                name,
                config,
                reply,
            } => {
                let _ = reply.send(self.add_channel(&name, config, now));
            }
            GroupCommand::RemoveChannel { name, reply } => {
                let result = match self.channels.get_mut(&name) {
                    Some(channel) => {
                        channel.retire();
                        self.pump(&name);
                        Ok(())
                    }
                    None => Err(ChannelError::ChannelNotFound(name)),
                };
                let _ = reply.send(result);
            }
            GroupCommand::Enqueue { channel, event } => match self.channels.get_mut(&channel) {
                Some(target) => {
                    target.enqueue(event, now);
                    self.pump(&channel);
                }
                None => warn!(channel = %channel, "Dropping event for unknown channel"),
            },
            GroupCommand::Flush { channel } => {
                self.for_each(channel, |c| {
                    c.flush();
                    true
                });
            }
            GroupCommand::Pause { channel } => {
                self.for_each(channel, |c| c.pause());
            }
            GroupCommand::Resume { channel } => {
                self.for_each(channel, |c| c.resume());
            }
            GroupCommand::SetChannelEnabled { channel, enabled } => {
                self.for_each(Some(channel), |c| {
                    if enabled {
                        c.enable(now)
                    } else {
                        c.disable()
                    }
                });
            }
            GroupCommand::Clear { channel } => {
                self.for_each(Some(channel), |c| {
                    c.clear();
                    true
                });
            }
            GroupCommand::SetEnabled(enabled) => {
                info!(enabled, "Channel group enabled state changed");
                self.enabled = enabled;
                self.for_each(None, |c| {
                    if enabled {
                        c.enable(now)
                    } else {
                        c.disable()
                    }
                });
            }
            GroupCommand::AppSuspended => {
                info!("Host suspending, flushing all channels");
                self.for_each(None, |c| {
                    c.flush();
                    true
                });
            }
            GroupCommand::SetNetworkAvailable(available) => {
                if available == self.network_available {
                    return;
                }
                info!(available, "Network availability changed");
                self.network_available = available;
                if available {
                    self.for_each(None, |c| {
                        c.reset_backoff();
                        true
                    });
                } else {
                    self.timers.clear();
                }
            }
            GroupCommand::Status { reply } => {
                let _ = reply.send(self.status(now));
            }
            GroupCommand::Shutdown { .. } => {}
        }
    }

    fn add_channel(&mut self, name: &str, config: ChannelConfig, now: Instant) -> ChannelResult<()> {
        if self.channels.contains_key(name) {
            return Err(ChannelError::ChannelExists(name.to_string()));
        }

        let mut channel = Channel::new(
            name,
            config,
            self.storage.clone(),
            self.sender.clone(),
            self.observer.clone(),
            now,
        )?;
        if !self.enabled {
            channel.disable();
        }
        self.channels.insert(name.to_string(), channel);
        self.pump(name);
        Ok(())
    }

    /// Apply `action` to one channel or all of them, then pump the ones it
    /// changed.
    fn for_each(&mut self, channel: Option<String>, mut action: impl FnMut(&mut Channel) -> bool) {
        let names: Vec<String> = match channel {
            Some(name) => vec![name],
            None => self.channels.keys().cloned().collect(),
        };

        for name in names {
            match self.channels.get_mut(&name) {
                Some(target) => {
                    if action(target) {
                        self.pump(&name);
                    } else {
                        self.refresh_timers(&name);
                    }
                }
                None => warn!(channel = %name, "Unknown channel"),
            }
        }
    }

    /// Form and dispatch whatever batches the channel allows, then re-arm
    /// its timers.
    fn pump(&mut self, name: &str) {
        let now = Instant::now();
        let Some(channel) = self.channels.get_mut(name) else {
            return;
        };

        if self.network_available {
            for batch in channel.poll_batches(now) {
                let dispatch = channel.dispatch(&batch);
                let channel_name = batch.channel.clone();
                let batch_id = batch.batch_id.clone();
                self.dispatches.spawn(async move {
                    match AssertUnwindSafe(dispatch).catch_unwind().await {
                        Ok(report) => report,
                        Err(_) => DispatchReport {
                            channel: channel_name,
                            batch_id,
                            outcome: SendOutcome::RecoverableFailure(
                                "dispatch panicked".to_string(),
                            ),
                        },
                    }
                });
            }
        }

        self.refresh_timers(name);
        self.finish_retired(name);
    }

    fn refresh_timers(&mut self, name: &str) {
        let now = Instant::now();
        match self.channels.get(name) {
            Some(channel) if self.network_available => {
                self.timers.replace_channel(name, channel.deadlines(now));
            }
            _ => self.timers.cancel_channel(name),
        }
    }

    fn finish_retired(&mut self, name: &str) {
        if !self.channels.get(name).is_some_and(Channel::is_retired) {
            return;
        }

        let Some(channel) = self.channels.remove(name) else {
            return;
        };
        self.timers.cancel_channel(name);
        match self.storage.clear(name) {
            Ok(0) => info!(channel = %name, "Channel removed"),
            Ok(discarded) => warn!(
                channel = %name,
                discarded,
                state = ?channel.state(),
                network_available = self.network_available,
                "Channel removed with unsent records"
            ),
            Err(e) => error!(channel = %name, error = %e, "Failed to clear removed channel"),
        }
    }

    fn on_dispatch_finished(&mut self, joined: Result<DispatchReport, JoinError>) {
        let report = match joined {
            Ok(report) => report,
            Err(e) => {
                debug!(error = %e, "Dispatch task did not complete");
                return;
            }
        };

        let now = Instant::now();
        match self.channels.get_mut(&report.channel) {
            Some(channel) => {
                channel.complete(&report.batch_id, report.outcome, now);
                self.pump(&report.channel);
            }
            None => debug!(
                channel = %report.channel,
                batch_id = %report.batch_id,
                "Ignoring outcome for removed channel"
            ),
        }
    }

    fn on_timers_due(&mut self) {
        let due = self.timers.pop_due(Instant::now());
        let mut names = BTreeSet::new();
        for (name, kind) in due {
            if kind == TimerKind::Backoff {
                if let Some(channel) = self.channels.get_mut(&name) {
                    channel.on_retry_due();
                }
            }
            names.insert(name);
        }
        for name in names {
            self.pump(&name);
        }
    }

    fn status(&self, now: Instant) -> ChannelResult<GroupStatus> {
        let mut channels = self
            .channels
            .values()
            .map(|c| c.status(now))
            .collect::<ChannelResult<Vec<ChannelStatus>>>()?;
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(GroupStatus {
            enabled: self.enabled,
            network_available: self.network_available,
            channels,
        })
    }

    async fn shutdown(&mut self) {
        let in_flight = self.dispatches.len();
        self.dispatches.shutdown().await;
        self.timers.clear();
        info!(in_flight, "Channel group shutting down");
    }
}
