use std::io::{stdout, Write};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use crossterm::{
    cursor::MoveTo,
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, size, Clear, ClearType, SetTitle},
};
use futures_util::StreamExt;
use tokio::sync::broadcast::error::RecvError;

use crate::mux::{
    ChannelKey, ChannelStatus, ChannelSummary, InputSink, MultiplexerHandle, Surface, SurfaceSize,
};

/// The local terminal, shared by every channel; only the active one writes to it.
#[derive(Default)]
pub struct TerminalSurface {
    listener: Mutex<Option<InputSink>>,
}

impl TerminalSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand typed bytes to whichever channel is listening.
    pub fn forward(&self, data: Vec<u8>) -> bool {
        let listener = match self.listener.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return false,
        };
        match listener {
            Some(sink) => sink.send(data),
            None => false,
        }
    }
}

impl Surface for TerminalSurface {
    fn write(&self, data: &[u8]) {
        let mut out = stdout().lock();
        if let Err(e) = out.write_all(data).and_then(|_| out.flush()) {
            tracing::warn!("Failed to write to terminal: {}", e);
        }
    }

    fn on_local_input(&self, listener: Option<InputSink>) {
        if let Ok(mut guard) = self.listener.lock() {
            *guard = listener;
        }
    }

    fn focus(&self) {
        let _ = stdout().flush();
    }

    fn size(&self) -> SurfaceSize {
        match size() {
            Ok((cols, rows)) => SurfaceSize { cols, rows },
            Err(_) => SurfaceSize::default(),
        }
    }

    fn hard_reset(&self) {
        if let Err(e) = execute!(
            stdout(),
            Clear(ClearType::Purge),
            Clear(ClearType::All),
            MoveTo(0, 0)
        ) {
            tracing::debug!("Terminal reset failed: {}", e);
        }
    }
}

/// Raw mode for the lifetime of the guard.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    Forward(Vec<u8>),
    Next,
    Previous,
    /// Zero-based channel index.
    Select(usize),
    ShowStatus,
    Quit,
    Ignore,
}

/// Splits keystrokes into shell input and `Ctrl-]` prefixed client commands.
#[derive(Debug, Default)]
pub struct PrefixKeys {
    armed: bool,
}

impl PrefixKeys {
    pub fn handle(&mut self, key: &KeyEvent) -> KeyAction {
        let is_prefix =
            key.code == KeyCode::Char(']') && key.modifiers.contains(KeyModifiers::CONTROL);

        if !self.armed {
            if is_prefix {
                self.armed = true;
                return KeyAction::Ignore;
            }
            return match key_to_bytes(key) {
                Some(bytes) => KeyAction::Forward(bytes),
                None => KeyAction::Ignore,
            };
        }

        self.armed = false;
        if is_prefix {
            // Pressed twice: send it through
            return KeyAction::Forward(vec![0x1d]);
        }
        match key.code {
            KeyCode::Char('n') => KeyAction::Next,
            KeyCode::Char('p') => KeyAction::Previous,
            KeyCode::Char('s') => KeyAction::ShowStatus,
            KeyCode::Char('q') => KeyAction::Quit,
            KeyCode::Char(c @ '1'..='9') => KeyAction::Select(c as usize - '1' as usize),
            _ => KeyAction::Ignore,
        }
    }
}

// Convert crossterm KeyEvent to bytes for shell input
pub fn key_to_bytes(key: &KeyEvent) -> Option<Vec<u8>> {
    let bytes: &[u8] = match key.code {
        KeyCode::Enter => b"\r",
        KeyCode::Tab if key.modifiers.contains(KeyModifiers::SHIFT) => b"\x1b[Z",
        KeyCode::Tab => b"\t",
        KeyCode::BackTab => b"\x1b[Z",
        KeyCode::Backspace => b"\x7f",
        KeyCode::Delete => b"\x1b[3~",
        KeyCode::Insert => b"\x1b[2~",
        KeyCode::Left => pick(key.modifiers, b"\x1b[1;2D", b"\x1b[1;3D", b"\x1b[1;5D", b"\x1b[D"),
        KeyCode::Right => pick(key.modifiers, b"\x1b[1;2C", b"\x1b[1;3C", b"\x1b[1;5C", b"\x1b[C"),
        KeyCode::Up => pick(key.modifiers, b"\x1b[1;2A", b"\x1b[1;3A", b"\x1b[1;5A", b"\x1b[A"),
        KeyCode::Down => pick(key.modifiers, b"\x1b[1;2B", b"\x1b[1;3B", b"\x1b[1;5B", b"\x1b[B"),
        KeyCode::Home => pick(key.modifiers, b"\x1b[1;2H", b"\x1b[H", b"\x1b[1;5H", b"\x1b[H"),
        KeyCode::End => pick(key.modifiers, b"\x1b[1;2F", b"\x1b[F", b"\x1b[1;5F", b"\x1b[F"),
        KeyCode::PageUp => pick(key.modifiers, b"\x1b[5;2~", b"\x1b[5~", b"\x1b[5;5~", b"\x1b[5~"),
        KeyCode::PageDown => pick(
            key.modifiers,
            b"\x1b[6;2~",
            b"\x1b[6~",
            b"\x1b[6;5~",
            b"\x1b[6~",
        ),
        KeyCode::Esc => b"\x1b",
        KeyCode::F(n) => match n {
            1 => b"\x1bOP",
            2 => b"\x1bOQ",
            3 => b"\x1bOR",
            4 => b"\x1bOS",
            5 => b"\x1b[15~",
            6 => b"\x1b[17~",
            7 => b"\x1b[18~",
            8 => b"\x1b[19~",
            9 => b"\x1b[20~",
            10 => b"\x1b[21~",
            11 => b"\x1b[23~",
            12 => b"\x1b[24~",
            _ => return None,
        },
        KeyCode::Char(c) => return char_to_bytes(c, key.modifiers),
        _ => return None,
    };
    Some(bytes.to_vec())
}

fn pick(
    modifiers: KeyModifiers,
    shift: &'static [u8],
    alt: &'static [u8],
    ctrl: &'static [u8],
    plain: &'static [u8],
) -> &'static [u8] {
    if modifiers.contains(KeyModifiers::SHIFT) {
        shift
    } else if modifiers.contains(KeyModifiers::ALT) {
        alt
    } else if modifiers.contains(KeyModifiers::CONTROL) {
        ctrl
    } else {
        plain
    }
}

fn char_to_bytes(c: char, modifiers: KeyModifiers) -> Option<Vec<u8>> {
    if modifiers.contains(KeyModifiers::CONTROL) {
        return match c {
            'a'..='z' => Some(vec![c as u8 - b'a' + 1]),
            'A'..='Z' => Some(vec![c.to_ascii_lowercase() as u8 - b'a' + 1]),
            '[' | '\\' | ']' | '^' | '_' => Some(vec![c as u8 & 0x1f]),
            ' ' | '@' => Some(vec![0]),
            _ => None,
        };
    }

    let mut buf = [0u8; 4];
    let encoded = c.encode_utf8(&mut buf).as_bytes();
    if modifiers.contains(KeyModifiers::ALT) {
        let mut bytes = vec![0x1b];
        bytes.extend_from_slice(encoded);
        Some(bytes)
    } else {
        Some(encoded.to_vec())
    }
}

/// One-line summary of every channel, active one marked with `*`.
pub fn format_status(channels: &[ChannelSummary]) -> String {
    if channels.is_empty() {
        return "[shellmux] no channels".to_string();
    }
    let parts: Vec<String> = channels
        .iter()
        .map(|c| {
            let marker = if c.is_active { "*" } else { "" };
            let retries = if c.reconnect_attempts > 0 {
                format!(" retry {}", c.reconnect_attempts)
            } else {
                String::new()
            };
            format!("{}{} {}{}", marker, c.key, c.status, retries)
        })
        .collect();
    format!("[shellmux] {}", parts.join(" | "))
}

fn set_title(key: &ChannelKey, status: ChannelStatus) {
    let _ = execute!(stdout(), SetTitle(format!("shellmux {} [{}]", key, status)));
}

/// Interactive client: one channel per env of `project`, the local terminal as
/// the shared surface, `Ctrl-]` prefixed keys to switch between them.
pub async fn run_terminal(
    handle: MultiplexerHandle,
    project: &str,
    envs: &[String],
    token: &str,
) -> Result<()> {
    if envs.is_empty() {
        anyhow::bail!("At least one --env is required");
    }
    for env in envs {
        handle.get_or_create(project, env, token).await?;
    }

    let surface = Arc::new(TerminalSurface::new());
    let _raw_mode = RawModeGuard::enable()?;
    let mut status_rx = handle.subscribe();
    let mut events = EventStream::new();
    let mut keys = PrefixKeys::default();

    let mut current = 0;
    handle
        .activate(project, &envs[current], surface.clone())
        .await?;
    set_title(
        &ChannelKey::new(project, envs[current].as_str()),
        handle.status(project, &envs[current]).await,
    );

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!("Terminal event error: {}", e);
                        break;
                    }
                };
                let target = match event {
                    Event::Key(key) if key.kind != KeyEventKind::Release => {
                        match keys.handle(&key) {
                            KeyAction::Forward(bytes) => {
                                surface.forward(bytes);
                                None
                            }
                            KeyAction::Next => Some((current + 1) % envs.len()),
                            KeyAction::Previous => Some((current + envs.len() - 1) % envs.len()),
                            KeyAction::Select(index) if index < envs.len() => Some(index),
                            KeyAction::ShowStatus => {
                                let line = format_status(&handle.snapshot().await);
                                surface.write(format!("\r\n{}\r\n", line).as_bytes());
                                None
                            }
                            KeyAction::Quit => break,
                            KeyAction::Select(_) | KeyAction::Ignore => None,
                        }
                    }
                    Event::Paste(text) => {
                        surface.forward(text.into_bytes());
                        None
                    }
                    Event::Resize(_, _) => {
                        handle.sync_dimensions()?;
                        None
                    }
                    _ => None,
                };

                if let Some(index) = target {
                    if index != current {
                        current = index;
                        let env = &envs[current];
                        let status = handle.get_or_create(project, env, token).await?.status;
                        handle.activate(project, env, surface.clone()).await?;
                        set_title(&ChannelKey::new(project, env.as_str()), status);
                        tracing::info!("Switched to {}/{}", project, env);
                    }
                }
            }
            change = status_rx.recv() => match change {
                Ok(change) => {
                    if change.key.env == envs[current] && change.key.project == project {
                        set_title(&change.key, change.status);
                    }
                    if change.removed && handle.snapshot().await.is_empty() {
                        tracing::info!("All channels closed");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Missed {} status updates", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    Ok(())
}
