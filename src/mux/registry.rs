use std::collections::HashMap;

use tokio::sync::mpsc;

use super::channel::{Channel, ChannelKey, ChannelStatus, CloseReason};
use super::error::{MuxError, Result};
use super::timers::Scheduler;
use super::transport::{ConnectRequest, ConnectionId, Connector};
use super::MuxEvent;
use crate::core::CLOSE_NORMAL;

/// Point-in-time view of a channel for status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSummary {
    pub key: ChannelKey,
    pub status: ChannelStatus,
    pub is_active: bool,
    pub reconnect_attempts: u32,
}

impl From<&Channel> for ChannelSummary {
    fn from(channel: &Channel) -> Self {
        Self {
            key: channel.key().clone(),
            status: channel.status(),
            is_active: channel.is_active(),
            reconnect_attempts: channel.reconnect_attempts(),
        }
    }
}

/// Table of channels keyed by (project, environment). Every method runs to
/// completion on the multiplexer task, so check-then-create cannot interleave.
pub struct ChannelRegistry {
    channels: HashMap<ChannelKey, Channel>,
    connector: Box<dyn Connector>,
    events_tx: mpsc::UnboundedSender<MuxEvent>,
    next_connection: u64,
}

impl ChannelRegistry {
    pub fn new(connector: Box<dyn Connector>, events_tx: mpsc::UnboundedSender<MuxEvent>) -> Self {
        Self {
            channels: HashMap::new(),
            connector,
            events_tx,
            next_connection: 0,
        }
    }

    /// Return the channel for `key`, creating and connecting it if absent.
    /// A channel left disconnected by an exhausted retry budget is restarted,
    /// and so is one still closing after an idle eviction.
    pub fn get_or_create(&mut self, key: ChannelKey, credentials: &str) -> Result<&mut Channel> {
        if credentials.trim().is_empty() {
            return Err(MuxError::MissingCredentials(key));
        }

        if self.channels.contains_key(&key) {
            let channel = self
                .channels
                .get_mut(&key)
                .ok_or_else(|| MuxError::UnknownChannel(key.clone()))?;
            channel.set_credentials(credentials.to_string());
            if channel.status() == ChannelStatus::Closing {
                tracing::info!("Channel {} requested while closing, reopening", key);
                channel.drop_connection();
                channel.close_reason = None;
                channel.transition(ChannelStatus::Disconnected)?;
            }
            if channel.status() == ChannelStatus::Disconnected {
                tracing::info!("Restarting disconnected channel {}", key);
                channel.reconnect_attempts = 0;
                channel.last_error = None;
                channel.transition(ChannelStatus::Connecting)?;
                self.open(&key)?;
            }
        } else {
            tracing::info!("Creating channel {}", key);
            let mut channel = Channel::new(key.clone(), credentials.to_string());
            channel.transition(ChannelStatus::Connecting)?;
            self.channels.insert(key.clone(), channel);
            self.open(&key)?;
        }

        self.channels
            .get_mut(&key)
            .ok_or(MuxError::UnknownChannel(key))
    }

    /// Open a fresh connection for a registered channel, replacing any previous one.
    pub fn open(&mut self, key: &ChannelKey) -> Result<ConnectionId> {
        let channel = self
            .channels
            .get_mut(key)
            .ok_or_else(|| MuxError::UnknownChannel(key.clone()))?;

        self.next_connection += 1;
        let connection = ConnectionId(self.next_connection);
        let request = ConnectRequest {
            key: key.clone(),
            credentials: channel.credentials().to_string(),
            connection,
            events_tx: self.events_tx.clone(),
        };
        tracing::debug!("Opening connection {:?} for {}", connection, key);
        channel.attach_connection(self.connector.open(request));
        Ok(connection)
    }

    pub fn get(&self, key: &ChannelKey) -> Option<&Channel> {
        self.channels.get(key)
    }

    pub fn get_mut(&mut self, key: &ChannelKey) -> Option<&mut Channel> {
        self.channels.get_mut(key)
    }

    /// The channel, but only if `connection` is still its current connection.
    pub fn current_mut(
        &mut self,
        key: &ChannelKey,
        connection: ConnectionId,
    ) -> Option<&mut Channel> {
        self.channels
            .get_mut(key)
            .filter(|channel| channel.connection_id() == Some(connection))
    }

    pub fn contains(&self, key: &ChannelKey) -> bool {
        self.channels.contains_key(key)
    }

    /// Cancel timers, close with a normal code and delete the entry.
    pub fn remove(&mut self, key: &ChannelKey, scheduler: &mut dyn Scheduler) -> Option<Channel> {
        let mut channel = self.channels.remove(key)?;
        teardown(&mut channel, scheduler);
        tracing::info!("Removed channel {}", key);
        Some(channel)
    }

    pub fn remove_all(&mut self, scheduler: &mut dyn Scheduler) -> usize {
        let count = self.channels.len();
        for (_, mut channel) in self.channels.drain() {
            teardown(&mut channel, scheduler);
        }
        if count > 0 {
            tracing::info!("Removed all {} channel(s)", count);
        }
        count
    }

    /// Unknown channels report `Disconnected`.
    pub fn status(&self, key: &ChannelKey) -> ChannelStatus {
        self.channels
            .get(key)
            .map(Channel::status)
            .unwrap_or(ChannelStatus::Disconnected)
    }

    pub fn snapshot(&self) -> Vec<ChannelSummary> {
        let mut summaries: Vec<ChannelSummary> =
            self.channels.values().map(ChannelSummary::from).collect();
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        summaries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

fn teardown(channel: &mut Channel, scheduler: &mut dyn Scheduler) {
    let timers: Vec<_> = channel.timer_ids().collect();
    for id in timers {
        scheduler.cancel(id);
    }
    channel.heartbeat = None;
    channel.pending_timers.clear();

    channel.unbind_surface();
    channel.close_reason = Some(CloseReason::Requested);
    if matches!(
        channel.status(),
        ChannelStatus::Connecting | ChannelStatus::Connected
    ) {
        let _ = channel.transition(ChannelStatus::Closing);
    }
    channel.close_connection(CLOSE_NORMAL, "closed by client");
    if channel.status() == ChannelStatus::Closing {
        let _ = channel.transition(ChannelStatus::Disconnected);
    }
}
