use tokio::sync::mpsc;

use super::channel::ChannelKey;
use super::error::Result;
use super::MuxEvent;
use crate::core::WireMessage;

/// Identifies one network connection of a channel. A reconnect gets a new id,
/// so late events from the old socket can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

/// A frame received from the remote shell.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    Opened,
    Frame(InboundFrame),
    /// Connect, send or receive failure. Always followed by `Closed`.
    Error(String),
    Closed { code: u16, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub key: ChannelKey,
    pub connection: ConnectionId,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    pub fn new(key: ChannelKey, connection: ConnectionId, kind: TransportEventKind) -> Self {
        Self {
            key,
            connection,
            kind,
        }
    }
}

/// Everything a connector needs to open one connection.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub key: ChannelKey,
    pub credentials: String,
    pub connection: ConnectionId,
    pub events_tx: mpsc::UnboundedSender<MuxEvent>,
}

impl ConnectRequest {
    /// Post a transport event for this connection. Errors mean the
    /// multiplexer is gone and are ignored.
    pub fn emit(&self, kind: TransportEventKind) {
        let _ = self.events_tx.send(MuxEvent::Transport(TransportEvent::new(
            self.key.clone(),
            self.connection,
            kind,
        )));
    }
}

/// Opens connections without blocking; progress is reported as `MuxEvent::Transport`.
pub trait Connector: Send {
    fn open(&mut self, request: ConnectRequest) -> Box<dyn Connection>;
}

pub trait Connection: Send {
    fn id(&self) -> ConnectionId;

    /// Queue a message. An error means the connection is unusable: the
    /// multiplexer drops it without waiting for `Closed` and reconnects.
    fn send(&mut self, message: &WireMessage) -> Result<()>;

    /// Start closing. The connector reports `Closed` with `code` once done.
    fn close(&mut self, code: u16, reason: &str);
}
