use crate::client::run_terminal;
use crate::mux::MultiplexerHandle;
use crate::server::{start_shell_server, AppState};
use crate::{Config, Result};

pub struct ConnectParams {
    pub config: Config,
    pub project: String,
    pub envs: Vec<String>,
    pub token: String,
    pub server: Option<String>,
}

pub async fn connect(params: ConnectParams) -> Result<()> {
    let ConnectParams {
        config,
        project,
        envs,
        token,
        server,
    } = params;

    let mut mux_config = config.client.mux_config();
    if let Some(server) = server {
        mux_config.server_url = server;
    }
    tracing::info!(
        "Connecting {} environment(s) of {} via {}",
        envs.len(),
        project,
        mux_config.server_url
    );

    let handle = MultiplexerHandle::spawn(mux_config)?;
    let result = run_terminal(handle.clone(), &project, &envs, &token).await;
    if let Err(e) = handle.shutdown().await {
        tracing::debug!("Multiplexer already stopped: {}", e);
    }
    result
}

pub async fn serve(
    config: Config,
    port: Option<u16>,
    shell: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let port = port.unwrap_or(config.server.port);
    let state = AppState {
        shell: shell.unwrap_or_else(|| config.shell()),
        token: token.or_else(|| config.server.token.clone()),
    };
    if state.token.is_none() {
        tracing::warn!("No server token configured, any non-empty token is accepted");
    }
    start_shell_server(port, state).await
}

pub fn status(config: &Config, init: bool) -> Result<()> {
    let path = Config::path();
    match &path {
        Some(path) if init && !path.exists() => {
            config.save()?;
            println!("Wrote default config to {}", path.display());
        }
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: <no config directory on this platform>"),
    }
    println!();
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
