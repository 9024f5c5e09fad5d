pub mod config;
pub mod websocket;

pub use config::Config;
pub use websocket::{classify, now_millis, Inbound, WireMessage, CLOSE_ABNORMAL, CLOSE_NORMAL};
