use std::io::{Read, Write};

use anyhow::{anyhow, Result};
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use portable_pty::{
    Child, ChildKiller, CommandBuilder, MasterPty, NativePtySystem, PtySize, PtySystem,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::core::{WireMessage, CLOSE_NORMAL};
use crate::mux::{ChannelKey, SurfaceSize};

/// Server error, sent when the shell cannot be started.
const CLOSE_INTERNAL_ERROR: u16 = 1011;

#[derive(Clone)]
pub struct AppState {
    pub shell: String,
    /// When unset any non-empty token is accepted.
    pub token: Option<String>,
}

impl AppState {
    fn authorized(&self, token: Option<&str>) -> bool {
        match (token.map(str::trim), self.token.as_deref()) {
            (None, _) | (Some(""), _) => false,
            (Some(given), Some(expected)) => given == expected,
            (Some(_), None) => true,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ShellQuery {
    token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/shell/:project/:env", get(shell_handler))
        .with_state(state)
}

pub async fn start_shell_server(port: u16, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!("Shell server listening on ws://0.0.0.0:{}", port);
    serve(listener, state).await
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn shell_handler(
    Path((project, env)): Path<(String, String)>,
    Query(query): Query<ShellQuery>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    let key = ChannelKey::new(project, env);
    if !state.authorized(query.token.as_deref()) {
        tracing::warn!("Rejected shell connection for {}: bad token", key);
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, key, state))
}

struct ShellProcess {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    output_rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ShellProcess {
    fn spawn(shell: &str, key: &ChannelKey, size: SurfaceSize) -> Result<Self> {
        let pty_system = NativePtySystem::default();
        let pair = pty_system
            .openpty(pty_size(size))
            .map_err(|e| anyhow!("Failed to open PTY: {}", e))?;

        let mut cmd = CommandBuilder::new(shell);
        if let Some(home) = std::env::var_os("HOME") {
            cmd.cwd(home);
        }
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        cmd.env("SHELLMUX_PROJECT", &key.project);
        cmd.env("SHELLMUX_ENV", &key.env);

        tracing::info!("Spawning {} for {}", shell, key);
        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| anyhow!("Failed to spawn {}: {}", shell, e))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| anyhow!("Failed to clone PTY reader: {}", e))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| anyhow!("Failed to take PTY writer: {}", e))?;

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let reader_key = key.clone();
        tokio::task::spawn_blocking(move || {
            let mut buffer = [0u8; 4096];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        if output_tx.send(buffer[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("PTY read for {} ended: {}", reader_key, e);
                        break;
                    }
                }
            }
            tracing::debug!("PTY reader for {} finished", reader_key);
        });

        Ok(Self {
            master: pair.master,
            writer,
            child,
            output_rx,
        })
    }

    fn apply(&mut self, message: WireMessage) -> Option<WireMessage> {
        match message {
            WireMessage::Input { data } => {
                if let Err(e) = self
                    .writer
                    .write_all(data.as_bytes())
                    .and_then(|_| self.writer.flush())
                {
                    tracing::warn!("Failed to write to PTY: {}", e);
                }
                None
            }
            WireMessage::Resize { cols, rows } => {
                if cols == 0 || rows == 0 {
                    return None;
                }
                match self.master.resize(pty_size(SurfaceSize { cols, rows })) {
                    Ok(()) => tracing::debug!("Resized PTY to {}x{}", cols, rows),
                    Err(e) => tracing::error!("Failed to resize PTY to {}x{}: {}", cols, rows, e),
                }
                None
            }
            WireMessage::Ping { .. } => Some(WireMessage::pong()),
            WireMessage::Pong { .. } | WireMessage::Heartbeat => None,
        }
    }
}

impl Drop for ShellProcess {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            tracing::trace!("Shell already gone: {}", e);
        }
    }
}

fn pty_size(size: SurfaceSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}

async fn handle_socket(mut socket: WebSocket, key: ChannelKey, state: AppState) {
    tracing::info!("Shell connection established for {}", key);

    let mut shell = match ShellProcess::spawn(&state.shell, &key, SurfaceSize::default()) {
        Ok(shell) => shell,
        Err(e) => {
            tracing::error!("{}", e);
            let _ = socket
                .send(Message::Text(format!("[Error] {}\r\n", e)))
                .await;
            let _ = socket
                .send(close_message(CLOSE_INTERNAL_ERROR, "shell unavailable"))
                .await;
            return;
        }
    };
    let mut pending = Vec::new();

    loop {
        tokio::select! {
            output = shell.output_rx.recv() => match output {
                Some(data) => {
                    pending.extend_from_slice(&data);
                    let text = take_utf8(&mut pending);
                    if text.is_empty() {
                        continue;
                    }
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                None => {
                    tracing::info!("Shell for {} exited", key);
                    let _ = socket.send(close_message(CLOSE_NORMAL, "shell exited")).await;
                    break;
                }
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let message = match serde_json::from_str::<WireMessage>(&text) {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::debug!("Ignoring malformed message from {}: {}", key, e);
                            continue;
                        }
                    };
                    if let Some(reply) = shell.apply(message) {
                        if let Ok(json) = reply.to_json() {
                            if socket.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("Client closed shell connection for {}", key);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("WebSocket error for {}: {}", key, e);
                    break;
                }
            },
        }
    }
}

/// Drain the longest valid UTF-8 prefix from `buffer`, keeping an incomplete
/// trailing sequence for the next read. Invalid bytes are replaced.
fn take_utf8(buffer: &mut Vec<u8>) -> String {
    let mut text = String::new();
    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                text.push_str(valid);
                buffer.clear();
                return text;
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&buffer[..valid_up_to]));
                match e.error_len() {
                    None => {
                        buffer.drain(..valid_up_to);
                        return text;
                    }
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        buffer.drain(..valid_up_to + len);
                    }
                }
            }
        }
    }
}
