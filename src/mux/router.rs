use std::sync::Arc;

use tokio::sync::mpsc;

use super::channel::{Channel, ChannelKey, ChannelStatus};
use super::registry::ChannelRegistry;
use super::surface::{InputSink, Surface};
use super::MuxEvent;
use crate::core::WireMessage;

/// Switch to the alternate screen, clear it and home the cursor.
pub const ALTERNATE_SCREEN_RESET: &[u8] = b"\x1b[?1049h\x1b[2J\x1b[H";

/// Spots output that means a full-screen program just took over the terminal.
///
/// This is a plain substring match over each inbound payload: it misses a
/// marker split across two frames and fires on any program that happens to
/// print the marker text. A structured control message from the shell
/// endpoint would remove the guesswork.
#[derive(Debug, Clone, Default)]
pub struct ModeSwitchDetector {
    markers: Vec<Vec<u8>>,
}

impl ModeSwitchDetector {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.as_ref().as_bytes().to_vec())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn detect(&self, data: &[u8]) -> bool {
        self.markers.iter().any(|marker| {
            data.len() >= marker.len()
                && data.windows(marker.len()).any(|w| w == marker.as_slice())
        })
    }
}

/// Tracks the foreground channel and gates data in both directions on it.
pub struct ActiveSessionRouter {
    active: Option<ChannelKey>,
    detector: ModeSwitchDetector,
    events_tx: mpsc::UnboundedSender<MuxEvent>,
}

impl ActiveSessionRouter {
    pub fn new(detector: ModeSwitchDetector, events_tx: mpsc::UnboundedSender<MuxEvent>) -> Self {
        Self {
            active: None,
            detector,
            events_tx,
        }
    }

    pub fn active(&self) -> Option<&ChannelKey> {
        self.active.as_ref()
    }

    pub fn is_active(&self, key: &ChannelKey) -> bool {
        self.active.as_ref() == Some(key)
    }

    /// Make `key` the foreground channel on `surface`. Returns false, changing
    /// nothing, when the channel does not exist.
    pub fn activate(
        &mut self,
        registry: &mut ChannelRegistry,
        key: &ChannelKey,
        surface: Arc<dyn Surface>,
    ) -> bool {
        if !registry.contains(key) {
            tracing::debug!("Activate ignored: channel {} does not exist", key);
            return false;
        }

        self.deactivate(registry);

        let Some(channel) = registry.get_mut(key) else {
            return false;
        };
        channel.bind_surface(&surface);
        surface.on_local_input(Some(InputSink::new(key.clone(), self.events_tx.clone())));
        self.active = Some(key.clone());
        tracing::info!("Channel {} is now active", key);

        self.send_dimensions(channel, surface.as_ref());
        surface.focus();
        true
    }

    pub fn deactivate(&mut self, registry: &mut ChannelRegistry) {
        if let Some(previous) = self.active.take() {
            if let Some(channel) = registry.get_mut(&previous) {
                channel.unbind_surface();
            }
            tracing::debug!("Channel {} deactivated", previous);
        }
    }

    /// Forget the active channel if it is `key`, e.g. after removal.
    pub fn forget(&mut self, key: &ChannelKey) {
        if self.active.as_ref() == Some(key) {
            self.active = None;
        }
    }

    /// Resend the surface dimensions for the active channel.
    pub fn sync_dimensions(&self, registry: &mut ChannelRegistry) {
        let Some(key) = self.active.as_ref() else {
            return;
        };
        if let Some(channel) = registry.get_mut(key) {
            if let Some(surface) = channel.surface() {
                self.send_dimensions(channel, surface.as_ref());
            }
        }
    }

    pub(crate) fn send_dimensions(&self, channel: &mut Channel, surface: &dyn Surface) {
        if channel.status() != ChannelStatus::Connected {
            return;
        }
        let size = surface.size();
        let message = WireMessage::Resize {
            cols: size.cols,
            rows: size.rows,
        };
        match channel.send(&message) {
            Ok(_) => tracing::debug!(
                "Sent resize {}x{} to {}",
                size.cols,
                size.rows,
                channel.key()
            ),
            Err(e) => tracing::warn!("Failed to send resize to {}: {}", channel.key(), e),
        }
    }

    /// Write terminal output to the surface if `channel` is in the foreground.
    pub fn route_inbound(&self, channel: &Channel, data: &[u8]) -> bool {
        if !self.is_active(channel.key()) || !channel.is_active() {
            tracing::trace!(
                "Discarding {} bytes from background channel {}",
                data.len(),
                channel.key()
            );
            return false;
        }
        let Some(surface) = channel.surface() else {
            return false;
        };

        if self.detector.detect(data) {
            tracing::debug!(
                "Mode switch marker seen on {}, resetting surface",
                channel.key()
            );
            surface.hard_reset();
            surface.write(ALTERNATE_SCREEN_RESET);
            surface.write(data);
            surface.focus();
        } else {
            surface.write(data);
        }
        true
    }

    /// Forward local keystrokes to the channel they were typed for, if it is
    /// still the active one.
    pub fn route_local_input(
        &self,
        registry: &mut ChannelRegistry,
        key: &ChannelKey,
        data: &[u8],
    ) -> bool {
        if !self.is_active(key) {
            tracing::debug!(
                "Dropping {} bytes of input for inactive channel {}",
                data.len(),
                key
            );
            return false;
        }
        let Some(channel) = registry.get_mut(key) else {
            return false;
        };
        match channel.send(&WireMessage::input(data)) {
            Ok(sent) => sent,
            Err(e) => {
                tracing::warn!("Failed to send input to {}: {}", key, e);
                false
            }
        }
    }
}
