//! Session channel multiplexer.
//!
//! One [`Channel`] per (project, environment) shell, kept alive in the
//! background while another one owns the terminal. All state lives in a
//! [`Multiplexer`] that is driven from a single task: network progress, timer
//! fires and local keystrokes all arrive as [`MuxEvent`]s and are applied one
//! at a time.

pub mod channel;
pub mod error;
pub mod handle;
pub mod heartbeat;
pub mod multiplexer;
pub mod reconnect;
pub mod registry;
pub mod router;
pub mod surface;
pub mod timers;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{Channel, ChannelKey, ChannelStatus};
pub use error::{MuxError, Result};
pub use handle::MultiplexerHandle;
pub use multiplexer::{Multiplexer, MuxConfig, StatusChange};
pub use registry::ChannelSummary;
pub use surface::{InputSink, Surface, SurfaceSize};
pub use timers::{Scheduler, TimerId, TimerKind, TokioScheduler};
pub use transport::{
    ConnectRequest, Connection, ConnectionId, Connector, InboundFrame, TransportEvent,
    TransportEventKind,
};

/// Everything that can wake the multiplexer besides a direct call.
#[derive(Debug, Clone)]
pub enum MuxEvent {
    Transport(TransportEvent),
    TimerFired { timer: TimerId },
    LocalInput { key: ChannelKey, data: Vec<u8> },
}
