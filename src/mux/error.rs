use thiserror::Error;

use super::channel::{ChannelKey, ChannelStatus};

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("no credentials supplied for channel {0}")]
    MissingCredentials(ChannelKey),
    #[error("channel {0} is not registered")]
    UnknownChannel(ChannelKey),
    #[error("invalid status transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ChannelStatus,
        to: ChannelStatus,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid shell endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("multiplexer task is not running")]
    ActorStopped,
}

pub type Result<T> = std::result::Result<T, MuxError>;
