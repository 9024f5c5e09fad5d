// Shellmux Library
// Session channel multiplexer for remote environment shells

pub mod cli;
pub mod client;
pub mod core;
pub mod mux;
pub mod server;

// Re-export commonly used types
pub use core::Config;
pub use mux::{ChannelKey, ChannelStatus, MultiplexerHandle, MuxConfig, MuxError};

// Error handling
pub use anyhow::{Error, Result};
