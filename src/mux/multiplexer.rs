use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use super::channel::{Channel, ChannelKey, ChannelStatus, CloseReason};
use super::error::Result;
use super::heartbeat::HeartbeatMonitor;
use super::reconnect::{ReconnectDecision, Reconnector};
use super::registry::{ChannelRegistry, ChannelSummary};
use super::router::{ActiveSessionRouter, ModeSwitchDetector};
use super::surface::Surface;
use super::timers::{Scheduler, TimerId, TimerKind};
use super::transport::{ConnectionId, Connector, InboundFrame, TransportEvent, TransportEventKind};
use super::MuxEvent;
use crate::core::config::ClientConfig;
use crate::core::{classify, Inbound, WireMessage, CLOSE_NORMAL};

#[derive(Debug, Clone)]
pub struct MuxConfig {
    pub server_url: String,
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub mode_switch_markers: Vec<String>,
}

impl Default for MuxConfig {
    fn default() -> Self {
        ClientConfig::default().mux_config()
    }
}

/// Broadcast whenever a channel's status changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub key: ChannelKey,
    pub status: ChannelStatus,
    pub reconnect_attempts: u32,
    /// The channel was deleted from the registry.
    pub removed: bool,
}

/// Single-threaded core: owns the registry, the router and the timers, and
/// applies every operation and event as one uninterrupted step.
pub struct Multiplexer {
    registry: ChannelRegistry,
    router: ActiveSessionRouter,
    heartbeat: HeartbeatMonitor,
    reconnector: Reconnector,
    scheduler: Box<dyn Scheduler>,
    status_tx: broadcast::Sender<StatusChange>,
}

impl Multiplexer {
    pub fn new(
        config: MuxConfig,
        connector: Box<dyn Connector>,
        scheduler: Box<dyn Scheduler>,
        events_tx: mpsc::UnboundedSender<MuxEvent>,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(64);
        Self {
            registry: ChannelRegistry::new(connector, events_tx.clone()),
            router: ActiveSessionRouter::new(
                ModeSwitchDetector::new(&config.mode_switch_markers),
                events_tx,
            ),
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval, config.idle_timeout),
            reconnector: Reconnector::new(config.reconnect_delay, config.max_reconnect_attempts),
            scheduler,
            status_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.status_tx.subscribe()
    }

    pub(crate) fn status_sender(&self) -> broadcast::Sender<StatusChange> {
        self.status_tx.clone()
    }

    pub fn get_or_create(
        &mut self,
        project: &str,
        env: &str,
        credentials: &str,
    ) -> Result<&Channel> {
        let key = ChannelKey::new(project, env);
        let before = self.registry.get(&key).map(Channel::status);
        let channel = self.registry.get_or_create(key.clone(), credentials)?;
        if before != Some(channel.status()) {
            notify(&self.status_tx, channel, false);
        }
        Ok(&*channel)
    }

    pub fn remove(&mut self, project: &str, env: &str) -> bool {
        let key = ChannelKey::new(project, env);
        self.router.forget(&key);
        match self.registry.remove(&key, self.scheduler.as_mut()) {
            Some(channel) => {
                notify(&self.status_tx, &channel, true);
                true
            }
            None => false,
        }
    }

    pub fn remove_all(&mut self) -> usize {
        if let Some(key) = self.router.active().cloned() {
            self.router.forget(&key);
        }
        let keys: Vec<ChannelKey> = self.registry.iter().map(|c| c.key().clone()).collect();
        let count = self.registry.remove_all(self.scheduler.as_mut());
        for key in keys {
            let _ = self.status_tx.send(StatusChange {
                key,
                status: ChannelStatus::Disconnected,
                reconnect_attempts: 0,
                removed: true,
            });
        }
        count
    }

    /// Tear everything down. The multiplexer stays usable afterwards.
    pub fn shutdown(&mut self) {
        let removed = self.remove_all();
        tracing::info!("Multiplexer shut down, {} channel(s) closed", removed);
    }

    pub fn activate(&mut self, project: &str, env: &str, surface: Arc<dyn Surface>) -> bool {
        let key = ChannelKey::new(project, env);
        let activated = self.router.activate(&mut self.registry, &key, surface);
        self.reap_failed_send(&key);
        activated
    }

    pub fn deactivate(&mut self) {
        self.router.deactivate(&mut self.registry);
    }

    pub fn sync_dimensions(&mut self) {
        self.router.sync_dimensions(&mut self.registry);
        if let Some(key) = self.router.active().cloned() {
            self.reap_failed_send(&key);
        }
    }

    pub fn status(&self, project: &str, env: &str) -> ChannelStatus {
        self.registry.status(&ChannelKey::new(project, env))
    }

    pub fn channel(&self, project: &str, env: &str) -> Option<&Channel> {
        self.registry.get(&ChannelKey::new(project, env))
    }

    pub fn snapshot(&self) -> Vec<ChannelSummary> {
        self.registry.snapshot()
    }

    pub fn active(&self) -> Option<&ChannelKey> {
        self.router.active()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn pending_timers(&self) -> usize {
        self.scheduler.pending()
    }

    pub fn handle_event(&mut self, event: MuxEvent) {
        match event {
            MuxEvent::Transport(event) => self.on_transport(event),
            MuxEvent::TimerFired { timer } => self.on_timer(timer),
            MuxEvent::LocalInput { key, data } => {
                self.router.route_local_input(&mut self.registry, &key, &data);
                self.reap_failed_send(&key);
            }
        }
    }

    fn on_transport(&mut self, event: TransportEvent) {
        let TransportEvent {
            key,
            connection,
            kind,
        } = event;
        match kind {
            TransportEventKind::Opened => self.on_opened(&key, connection),
            TransportEventKind::Frame(frame) => self.on_frame(&key, connection, frame),
            TransportEventKind::Error(message) => self.on_error(&key, connection, message),
            TransportEventKind::Closed { code, reason } => {
                self.on_closed(&key, connection, code, &reason)
            }
        }
    }

    fn on_opened(&mut self, key: &ChannelKey, connection: ConnectionId) {
        let Some(channel) = self.registry.current_mut(key, connection) else {
            tracing::debug!("Ignoring open from stale connection {:?} of {}", connection, key);
            return;
        };
        if let Err(e) = channel.transition(ChannelStatus::Connected) {
            tracing::warn!("Channel {} opened in unexpected state: {}", key, e);
            return;
        }
        tracing::info!("Channel {} connected", key);

        channel.touch();
        channel.close_reason = None;
        channel.last_error = None;
        self.reconnector.on_connected(channel);
        self.heartbeat.start(channel, self.scheduler.as_mut());

        if self.router.is_active(key) {
            if let Some(surface) = channel.surface() {
                self.router.send_dimensions(channel, surface.as_ref());
            }
        }
        notify(&self.status_tx, channel, false);
        self.reap_failed_send(key);
    }

    fn on_frame(&mut self, key: &ChannelKey, connection: ConnectionId, frame: InboundFrame) {
        let Some(channel) = self.registry.current_mut(key, connection) else {
            return;
        };
        channel.touch();

        match frame {
            InboundFrame::Text(text) => match classify(&text) {
                Inbound::Control(message) => handle_control(channel, message),
                Inbound::Data(data) => {
                    self.router.route_inbound(channel, data);
                }
            },
            InboundFrame::Binary(data) => {
                self.router.route_inbound(channel, &data);
            }
        }
        self.reap_failed_send(key);
    }

    fn on_error(&mut self, key: &ChannelKey, connection: ConnectionId, message: String) {
        let Some(channel) = self.registry.current_mut(key, connection) else {
            return;
        };
        tracing::warn!("Transport error on {}: {}", key, message);
        channel.advise(&format!("[Connection Error] {}", message));
        channel.last_error = Some(message);
    }

    fn on_closed(&mut self, key: &ChannelKey, connection: ConnectionId, code: u16, reason: &str) {
        let Some(channel) = self.registry.current_mut(key, connection) else {
            tracing::debug!("Ignoring close from stale connection {:?} of {}", connection, key);
            return;
        };
        tracing::info!("Channel {} closed, code: {} {}", key, code, reason);

        self.heartbeat.stop(channel, self.scheduler.as_mut());
        channel.drop_connection();
        if let Err(e) = channel.transition(ChannelStatus::Disconnected) {
            tracing::warn!("Channel {} closed in unexpected state: {}", key, e);
        }
        channel.advise(&format!("[Connection Closed] Code: {}", code));

        let requested = channel.close_reason.is_some();
        if code == CLOSE_NORMAL || requested {
            if channel.close_reason == Some(CloseReason::IdleTimeout) {
                tracing::info!("Channel {} evicted after idle timeout", key);
            }
            self.router.forget(key);
            if let Some(channel) = self.registry.remove(key, self.scheduler.as_mut()) {
                notify(&self.status_tx, &channel, true);
            }
            return;
        }

        self.retry_or_give_up(key);
    }

    /// Schedule the next attempt for a channel that just went `Disconnected`,
    /// or leave it there once the retry budget is spent.
    fn retry_or_give_up(&mut self, key: &ChannelKey) {
        let Some(channel) = self.registry.get_mut(key) else {
            return;
        };
        if let ReconnectDecision::Exhausted =
            self.reconnector.on_abnormal_close(channel, self.scheduler.as_mut())
        {
            tracing::warn!(
                "Channel {} is disconnected for good: {}",
                key,
                channel.last_error().unwrap_or("retries exhausted")
            );
        }
        notify(&self.status_tx, channel, false);
    }

    /// A failed send leaves the connection unusable. Drop it and take the same
    /// path as an abnormal closure.
    fn reap_failed_send(&mut self, key: &ChannelKey) {
        let Some(channel) = self.registry.get_mut(key) else {
            return;
        };
        if !channel.send_failed {
            return;
        }
        let error = channel.last_error().unwrap_or("send failed").to_string();
        tracing::warn!("Send to {} failed, dropping connection: {}", key, error);

        self.heartbeat.stop(channel, self.scheduler.as_mut());
        channel.close_connection(CLOSE_NORMAL, "send failed");
        if let Err(e) = channel.transition(ChannelStatus::Disconnected) {
            tracing::warn!("Channel {} failed in unexpected state: {}", key, e);
        }
        channel.advise(&format!("[Connection Error] {}", error));
        self.retry_or_give_up(key);
    }

    fn on_timer(&mut self, timer: TimerId) {
        let Some((key, kind)) = self.scheduler.acknowledge(timer) else {
            tracing::trace!("Ignoring stale timer {:?}", timer);
            return;
        };
        let Some(channel) = self.registry.get_mut(&key) else {
            self.scheduler.cancel(timer);
            return;
        };

        match kind {
            TimerKind::Heartbeat => {
                if channel.heartbeat != Some(timer) {
                    self.scheduler.cancel(timer);
                    return;
                }
                let before = channel.status();
                self.heartbeat.tick(channel, self.scheduler.as_mut());
                if channel.status() != before {
                    notify(&self.status_tx, channel, false);
                }
                self.reap_failed_send(&key);
            }
            TimerKind::Reconnect => {
                if self.reconnector.begin_attempt(channel, timer).is_none() {
                    return;
                }
                if let Err(e) = self.registry.open(&key) {
                    tracing::error!("Failed to reopen channel {}: {}", key, e);
                }
            }
        }
    }
}

fn handle_control(channel: &mut Channel, message: WireMessage) {
    let reply = match message {
        WireMessage::Ping { .. } => WireMessage::pong(),
        WireMessage::Heartbeat => WireMessage::ping(),
        _ => return,
    };
    if let Err(e) = channel.send(&reply) {
        tracing::debug!("Probe reply to {} not sent: {}", channel.key(), e);
    }
}

fn notify(status_tx: &broadcast::Sender<StatusChange>, channel: &Channel, removed: bool) {
    let _ = status_tx.send(StatusChange {
        key: channel.key().clone(),
        status: channel.status(),
        reconnect_attempts: channel.reconnect_attempts(),
        removed,
    });
}
