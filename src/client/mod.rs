pub mod terminal;
pub mod ws;

pub use terminal::{run_terminal, TerminalSurface};
pub use ws::WsConnector;
