use tokio::sync::mpsc;

use super::channel::ChannelKey;
use super::MuxEvent;

/// Terminal dimensions reported by a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for SurfaceSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// The visual terminal a channel's output is written to. Owned by the UI layer.
pub trait Surface: Send + Sync {
    fn write(&self, data: &[u8]);

    /// Install or remove the listener for locally typed input.
    fn on_local_input(&self, listener: Option<InputSink>);

    fn focus(&self);

    fn size(&self) -> SurfaceSize;

    /// Drop scrollback and parser state before a rendering-mode change.
    fn hard_reset(&self);
}

/// Listener handed to a surface while its channel is active. Input is tagged
/// with the channel it was attached for, so anything typed after a switch can
/// be recognised and dropped.
#[derive(Debug, Clone)]
pub struct InputSink {
    key: ChannelKey,
    events_tx: mpsc::UnboundedSender<MuxEvent>,
}

impl InputSink {
    pub(crate) fn new(key: ChannelKey, events_tx: mpsc::UnboundedSender<MuxEvent>) -> Self {
        Self { key, events_tx }
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Forward keystroke bytes. Returns false once the multiplexer is gone.
    pub fn send(&self, data: impl Into<Vec<u8>>) -> bool {
        self.events_tx
            .send(MuxEvent::LocalInput {
                key: self.key.clone(),
                data: data.into(),
            })
            .is_ok()
    }
}
