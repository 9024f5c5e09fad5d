use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::mux::MuxConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub client: ClientConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the shell endpoint, e.g. `ws://localhost:8000`
    pub server_url: String,
    pub heartbeat_interval_secs: u64,
    pub idle_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
    pub max_reconnect_attempts: u32,
    /// Output fragments that announce a full-screen program taking over the terminal
    pub mode_switch_markers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Shell to spawn per connection; falls back to `$SHELL`, then `/bin/sh`
    pub shell: Option<String>,
    /// Token clients must present; any non-empty token is accepted when unset
    pub token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server_url: format!("ws://localhost:{}", default_server_port()),
            heartbeat_interval_secs: 30,
            idle_timeout_secs: 600,
            reconnect_delay_secs: 5,
            max_reconnect_attempts: 3,
            mode_switch_markers: vec!["Welcome to Claude Code".to_string()],
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: default_server_port(),
            shell: None,
            token: None,
        }
    }
}

/// Get the default server port based on build type
pub fn default_server_port() -> u16 {
    if cfg!(debug_assertions) {
        18000
    } else {
        8000
    }
}

impl Config {
    pub fn path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "shellmux", "shellmux")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        if let Some(config_file) = Self::path() {
            if config_file.exists() {
                let content = std::fs::read_to_string(&config_file)?;
                let config = Self::parse(&content)?;
                tracing::debug!("Loaded config from {}", config_file.display());
                return Ok(config);
            }
        }
        Ok(Config::default())
    }

    /// Parse a config file and reject values the multiplexer cannot run with.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.client.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(config_file) = Self::path() {
            if let Some(dir) = config_file.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let content = toml::to_string_pretty(self)?;
            std::fs::write(config_file, content)?;
        }
        Ok(())
    }

    pub fn shell(&self) -> String {
        self.server
            .shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/sh".to_string())
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_secs == 0 {
            bail!("client.heartbeat_interval_secs must be at least 1");
        }
        if self.idle_timeout_secs == 0 {
            bail!("client.idle_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn mux_config(&self) -> MuxConfig {
        MuxConfig {
            server_url: self.server_url.clone(),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            max_reconnect_attempts: self.max_reconnect_attempts,
            mode_switch_markers: self.mode_switch_markers.clone(),
        }
    }
}
