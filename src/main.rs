use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use shellmux::cli::handlers::{self, ConnectParams};
use shellmux::cli::{Cli, Commands};
use shellmux::{Config, Result};

fn env_filter() -> Result<EnvFilter> {
    Ok(EnvFilter::from_default_env().add_directive("shellmux=info".parse()?))
}

fn init_tracing(command: &Commands) -> Result<()> {
    match command {
        // The terminal is in raw mode, so logs go to a file or nowhere
        Commands::Connect { logfile, .. } => match logfile {
            Some(path) => init_file_tracing(path)?,
            None => tracing_subscriber::fmt()
                .with_env_filter(env_filter()?)
                .with_writer(std::io::sink)
                .init(),
        },
        _ => tracing_subscriber::fmt().with_env_filter(env_filter()?).init(),
    }
    Ok(())
}

fn init_file_tracing(path: &Path) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter()?)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.command)?;
    let config = Config::load()?;

    match cli.command {
        Commands::Connect {
            project,
            envs,
            token,
            server,
            logfile: _, // Handled by the tracing setup above
        } => {
            handlers::connect(ConnectParams {
                config,
                project,
                envs,
                token,
                server,
            })
            .await
        }
        Commands::Serve { port, shell, token } => handlers::serve(config, port, shell, token).await,
        Commands::Status { init } => handlers::status(&config, init),
    }
}
