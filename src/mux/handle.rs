use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use super::channel::ChannelStatus;
use super::error::{MuxError, Result};
use super::multiplexer::{Multiplexer, MuxConfig, StatusChange};
use super::registry::ChannelSummary;
use super::surface::Surface;
use super::timers::TokioScheduler;
use super::transport::Connector;
use super::MuxEvent;
use crate::client::ws::WsConnector;

// Commands that can be sent to the multiplexer actor
enum MuxCommand {
    GetOrCreate {
        project: String,
        env: String,
        credentials: String,
        response_tx: oneshot::Sender<Result<ChannelSummary>>,
    },
    Activate {
        project: String,
        env: String,
        surface: Arc<dyn Surface>,
        response_tx: oneshot::Sender<bool>,
    },
    Deactivate,
    SyncDimensions,
    Remove {
        project: String,
        env: String,
        response_tx: oneshot::Sender<bool>,
    },
    Status {
        project: String,
        env: String,
        response_tx: oneshot::Sender<ChannelStatus>,
    },
    Snapshot {
        response_tx: oneshot::Sender<Vec<ChannelSummary>>,
    },
    Shutdown {
        response_tx: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a multiplexer running in its own task.
#[derive(Clone)]
pub struct MultiplexerHandle {
    command_tx: mpsc::UnboundedSender<MuxCommand>,
    status_tx: broadcast::Sender<StatusChange>,
}

struct MultiplexerActor {
    mux: Multiplexer,
    command_rx: mpsc::UnboundedReceiver<MuxCommand>,
    events_rx: mpsc::UnboundedReceiver<MuxEvent>,
}

impl MultiplexerHandle {
    /// Spawn a multiplexer that talks WebSocket to `config.server_url`.
    pub fn spawn(config: MuxConfig) -> Result<Self> {
        let connector = WsConnector::new(&config.server_url)?;
        Ok(Self::spawn_with(config, Box::new(connector)))
    }

    pub fn spawn_with(config: MuxConfig, connector: Box<dyn Connector>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let scheduler = TokioScheduler::new(events_tx.clone());
        let mux = Multiplexer::new(config, connector, Box::new(scheduler), events_tx);
        let status_tx = mux.status_sender();

        let actor = MultiplexerActor {
            mux,
            command_rx,
            events_rx,
        };
        tokio::spawn(actor.run());

        Self {
            command_tx,
            status_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.status_tx.subscribe()
    }

    pub async fn get_or_create(
        &self,
        project: &str,
        env: &str,
        credentials: &str,
    ) -> Result<ChannelSummary> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(MuxCommand::GetOrCreate {
            project: project.to_string(),
            env: env.to_string(),
            credentials: credentials.to_string(),
            response_tx,
        })?;
        response_rx.await.map_err(|_| MuxError::ActorStopped)?
    }

    pub async fn activate(
        &self,
        project: &str,
        env: &str,
        surface: Arc<dyn Surface>,
    ) -> Result<bool> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(MuxCommand::Activate {
            project: project.to_string(),
            env: env.to_string(),
            surface,
            response_tx,
        })?;
        response_rx.await.map_err(|_| MuxError::ActorStopped)
    }

    pub fn deactivate(&self) -> Result<()> {
        self.send(MuxCommand::Deactivate)
    }

    pub fn sync_dimensions(&self) -> Result<()> {
        self.send(MuxCommand::SyncDimensions)
    }

    pub async fn remove(&self, project: &str, env: &str) -> Result<bool> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(MuxCommand::Remove {
            project: project.to_string(),
            env: env.to_string(),
            response_tx,
        })?;
        response_rx.await.map_err(|_| MuxError::ActorStopped)
    }

    pub async fn status(&self, project: &str, env: &str) -> ChannelStatus {
        let (response_tx, response_rx) = oneshot::channel();
        let command = MuxCommand::Status {
            project: project.to_string(),
            env: env.to_string(),
            response_tx,
        };
        if self.send(command).is_err() {
            return ChannelStatus::Disconnected;
        }
        response_rx.await.unwrap_or(ChannelStatus::Disconnected)
    }

    pub async fn snapshot(&self) -> Vec<ChannelSummary> {
        let (response_tx, response_rx) = oneshot::channel();
        if self.send(MuxCommand::Snapshot { response_tx }).is_err() {
            return vec![];
        }
        response_rx.await.unwrap_or_else(|_| vec![])
    }

    /// Close every channel and cancel every timer.
    pub async fn shutdown(&self) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(MuxCommand::Shutdown { response_tx })?;
        response_rx.await.map_err(|_| MuxError::ActorStopped)
    }

    fn send(&self, command: MuxCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| MuxError::ActorStopped)
    }
}

impl MultiplexerActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // Every handle is gone
                    None => break,
                },
                Some(event) = self.events_rx.recv() => {
                    self.mux.handle_event(event);
                }
            }
        }
        self.mux.shutdown();
        tracing::info!("Multiplexer shutting down");
    }

    fn handle_command(&mut self, command: MuxCommand) {
        match command {
            MuxCommand::GetOrCreate {
                project,
                env,
                credentials,
                response_tx,
            } => {
                let result = self
                    .mux
                    .get_or_create(&project, &env, &credentials)
                    .map(ChannelSummary::from);
                let _ = response_tx.send(result);
            }
            MuxCommand::Activate {
                project,
                env,
                surface,
                response_tx,
            } => {
                let _ = response_tx.send(self.mux.activate(&project, &env, surface));
            }
            MuxCommand::Deactivate => self.mux.deactivate(),
            MuxCommand::SyncDimensions => self.mux.sync_dimensions(),
            MuxCommand::Remove {
                project,
                env,
                response_tx,
            } => {
                let _ = response_tx.send(self.mux.remove(&project, &env));
            }
            MuxCommand::Status {
                project,
                env,
                response_tx,
            } => {
                let _ = response_tx.send(self.mux.status(&project, &env));
            }
            MuxCommand::Snapshot { response_tx } => {
                let _ = response_tx.send(self.mux.snapshot());
            }
            MuxCommand::Shutdown { response_tx } => {
                self.mux.shutdown();
                let _ = response_tx.send(());
            }
        }
    }
}
