pub mod shell;

pub use shell::{start_shell_server, AppState};
