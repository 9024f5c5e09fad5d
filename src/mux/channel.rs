use std::fmt;
use std::sync::{Arc, Weak};

use tokio::time::Instant;

use super::error::{MuxError, Result};
use super::surface::Surface;
use super::timers::TimerId;
use super::transport::{Connection, ConnectionId};
use crate::core::WireMessage;

/// Identity of a channel: one per (project, environment) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    pub project: String,
    pub env: String,
}

impl ChannelKey {
    pub fn new(project: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            env: env.into(),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.env)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Connected,
    Closing,
    Disconnected,
}

impl ChannelStatus {
    /// Valid moves along `Disconnected -> Connecting -> Connected -> Closing -> Disconnected`.
    /// A lost transport may drop a live or pending connection straight to `Disconnected`.
    pub fn can_transition_to(self, next: ChannelStatus) -> bool {
        use ChannelStatus::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Closing)
                | (Connecting, Disconnected)
                | (Connected, Closing)
                | (Connected, Disconnected)
                | (Closing, Disconnected)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Connecting => "connecting",
            ChannelStatus::Connected => "connected",
            ChannelStatus::Closing => "closing",
            ChannelStatus::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why we asked the transport to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Requested,
    IdleTimeout,
}

/// One logical remote-shell connection.
pub struct Channel {
    key: ChannelKey,
    status: ChannelStatus,
    is_active: bool,
    surface: Option<Weak<dyn Surface>>,
    credentials: String,
    connection: Option<Box<dyn Connection>>,
    pub(crate) last_activity_at: Instant,
    pub(crate) reconnect_attempts: u32,
    pub(crate) heartbeat: Option<TimerId>,
    pub(crate) pending_timers: Vec<TimerId>,
    pub(crate) close_reason: Option<CloseReason>,
    pub(crate) last_error: Option<String>,
    /// A send failed on the current connection; it must be dropped and retried.
    pub(crate) send_failed: bool,
}

impl Channel {
    pub(crate) fn new(key: ChannelKey, credentials: String) -> Self {
        Self {
            key,
            status: ChannelStatus::Disconnected,
            is_active: false,
            surface: None,
            credentials,
            connection: None,
            last_activity_at: Instant::now(),
            reconnect_attempts: 0,
            heartbeat: None,
            pending_timers: Vec::new(),
            close_reason: None,
            last_error: None,
            send_failed: false,
        }
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn last_activity_at(&self) -> Instant {
        self.last_activity_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub(crate) fn credentials(&self) -> &str {
        &self.credentials
    }

    pub(crate) fn set_credentials(&mut self, credentials: String) {
        self.credentials = credentials;
    }

    pub(crate) fn transition(&mut self, next: ChannelStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(MuxError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        tracing::debug!("Channel {} {} -> {}", self.key, self.status, next);
        self.status = next;
        Ok(())
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity_at = Instant::now();
    }

    pub(crate) fn connection_id(&self) -> Option<ConnectionId> {
        self.connection.as_ref().map(|c| c.id())
    }

    pub(crate) fn attach_connection(&mut self, connection: Box<dyn Connection>) {
        if let Some(mut previous) = self.connection.replace(connection) {
            previous.close(crate::core::CLOSE_NORMAL, "superseded");
        }
    }

    pub(crate) fn drop_connection(&mut self) {
        self.connection = None;
        self.send_failed = false;
    }

    /// Close the transport, if any, and forget it.
    pub(crate) fn close_connection(&mut self, code: u16, reason: &str) {
        if let Some(mut connection) = self.connection.take() {
            connection.close(code, reason);
        }
        self.send_failed = false;
    }

    /// Ask the transport to close but keep it until the closure event arrives.
    pub(crate) fn request_close(&mut self, code: u16, reason: &str) {
        if let Some(connection) = self.connection.as_mut() {
            connection.close(code, reason);
        }
    }

    /// Send a message if the channel is connected. Returns false when nothing was sent.
    /// Probes are not counted as activity. A failure marks the connection as
    /// broken for the multiplexer to reap.
    pub(crate) fn send(&mut self, message: &WireMessage) -> Result<bool> {
        if self.status != ChannelStatus::Connected || self.send_failed {
            return Ok(false);
        }
        let Some(connection) = self.connection.as_mut() else {
            return Ok(false);
        };
        if let Err(e) = connection.send(message) {
            self.last_error = Some(e.to_string());
            self.send_failed = true;
            return Err(e);
        }
        if !message.is_control() {
            self.touch();
        }
        Ok(true)
    }

    pub(crate) fn bind_surface(&mut self, surface: &Arc<dyn Surface>) {
        self.is_active = true;
        self.surface = Some(Arc::downgrade(surface));
    }

    /// Detach the local-input listener and forget the surface.
    pub(crate) fn unbind_surface(&mut self) {
        if let Some(surface) = self.surface() {
            surface.on_local_input(None);
        }
        self.is_active = false;
        self.surface = None;
    }

    pub(crate) fn surface(&self) -> Option<Arc<dyn Surface>> {
        self.surface.as_ref().and_then(Weak::upgrade)
    }

    /// Write an advisory line to the bound surface, if there is one.
    pub(crate) fn advise(&self, text: &str) {
        if !self.is_active {
            return;
        }
        if let Some(surface) = self.surface() {
            surface.write(format!("\r\n{}\r\n", text).as_bytes());
        }
    }

    pub(crate) fn timer_ids(&self) -> impl Iterator<Item = TimerId> + '_ {
        self.heartbeat.iter().chain(self.pending_timers.iter()).copied()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("key", &self.key)
            .field("status", &self.status)
            .field("is_active", &self.is_active)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("connection", &self.connection_id())
            .finish()
    }
}
