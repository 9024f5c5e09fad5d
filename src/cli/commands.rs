use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "shellmux")]
#[command(about = "Keep several remote shells open and switch between them", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Open one shell per environment and attach the terminal to the first
    ///
    /// Press Ctrl-] then n/p to cycle, 1-9 to pick, s for status, q to quit.
    Connect {
        /// Project the environments belong to
        #[arg(short, long)]
        project: String,
        /// Environment to open (repeat for more)
        #[arg(short, long = "env", required = true)]
        envs: Vec<String>,
        /// Access token for the shell endpoint
        #[arg(short, long, env = "SHELLMUX_TOKEN", hide_env_values = true)]
        token: String,
        /// Server URL, overrides the config file
        #[arg(short, long)]
        server: Option<String>,
        /// Path to write logs to (logs are discarded otherwise)
        #[arg(long)]
        logfile: Option<PathBuf>,
    },
    /// Run the shell endpoint, bridging each connection to a local PTY
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Shell to spawn per connection
        #[arg(long)]
        shell: Option<String>,
        /// Token clients must present
        #[arg(long, env = "SHELLMUX_SERVER_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// Show the config file location and effective settings
    Status {
        /// Write the default config file if none exists
        #[arg(long)]
        init: bool,
    },
}
