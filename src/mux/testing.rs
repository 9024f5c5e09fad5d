//! In-memory stand-ins for the transport, timers and surface.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use super::channel::ChannelKey;
use super::error::{MuxError, Result};
use super::surface::{InputSink, Surface, SurfaceSize};
use super::timers::{Scheduler, TimerId, TimerKind};
use super::transport::{ConnectRequest, Connection, ConnectionId, Connector};
use super::{Multiplexer, MuxConfig, MuxEvent};
use crate::core::WireMessage;

#[derive(Debug, Default)]
pub struct ConnectionLog {
    pub sent: Vec<WireMessage>,
    pub closed: Option<(u16, String)>,
}

#[derive(Default)]
struct NetState {
    opened: Vec<ConnectRequest>,
    logs: BTreeMap<ConnectionId, Arc<Mutex<ConnectionLog>>>,
    fail_sends: bool,
}

/// Records every connection it is asked to open; nothing touches the network.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<NetState>>,
}

impl FakeConnector {
    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened.len()
    }

    pub fn opened_for(&self, key: &ChannelKey) -> usize {
        self.state
            .lock()
            .unwrap()
            .opened
            .iter()
            .filter(|r| &r.key == key)
            .count()
    }

    /// The most recent connection opened for `key`.
    pub fn latest(&self, key: &ChannelKey) -> ConnectionId {
        self.state
            .lock()
            .unwrap()
            .opened
            .iter()
            .rev()
            .find(|r| &r.key == key)
            .map(|r| r.connection)
            .expect("no connection opened for key")
    }

    pub fn credentials(&self, connection: ConnectionId) -> String {
        self.state
            .lock()
            .unwrap()
            .opened
            .iter()
            .find(|r| r.connection == connection)
            .map(|r| r.credentials.clone())
            .expect("unknown connection")
    }

    pub fn sent(&self, connection: ConnectionId) -> Vec<WireMessage> {
        self.log(connection).lock().unwrap().sent.clone()
    }

    pub fn closed(&self, connection: ConnectionId) -> Option<(u16, String)> {
        self.log(connection).lock().unwrap().closed.clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    fn log(&self, connection: ConnectionId) -> Arc<Mutex<ConnectionLog>> {
        self.state
            .lock()
            .unwrap()
            .logs
            .get(&connection)
            .cloned()
            .expect("unknown connection")
    }
}

impl Connector for FakeConnector {
    fn open(&mut self, request: ConnectRequest) -> Box<dyn Connection> {
        let log = Arc::new(Mutex::new(ConnectionLog::default()));
        let id = request.connection;
        let mut state = self.state.lock().unwrap();
        state.logs.insert(id, Arc::clone(&log));
        state.opened.push(request);
        Box::new(FakeConnection {
            id,
            log,
            state: Arc::clone(&self.state),
        })
    }
}

struct FakeConnection {
    id: ConnectionId,
    log: Arc<Mutex<ConnectionLog>>,
    state: Arc<Mutex<NetState>>,
}

impl Connection for FakeConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&mut self, message: &WireMessage) -> Result<()> {
        if self.state.lock().unwrap().fail_sends {
            return Err(MuxError::Transport("connection reset".to_string()));
        }
        self.log.lock().unwrap().sent.push(message.clone());
        Ok(())
    }

    fn close(&mut self, code: u16, reason: &str) {
        self.log.lock().unwrap().closed = Some((code, reason.to_string()));
    }
}

#[derive(Debug, Clone)]
pub struct ManualTimer {
    pub key: ChannelKey,
    pub kind: TimerKind,
    pub delay: Duration,
    pub repeating: bool,
}

#[derive(Default)]
struct TimerState {
    next_id: u64,
    timers: BTreeMap<TimerId, ManualTimer>,
}

/// Scheduler whose timers only fire when a test says so.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<TimerState>>,
}

impl ManualScheduler {
    pub fn find(&self, key: &ChannelKey, kind: TimerKind) -> Option<TimerId> {
        self.state
            .lock()
            .unwrap()
            .timers
            .iter()
            .find(|(_, t)| &t.key == key && t.kind == kind)
            .map(|(id, _)| *id)
    }

    pub fn timer(&self, id: TimerId) -> Option<ManualTimer> {
        self.state.lock().unwrap().timers.get(&id).cloned()
    }

    pub fn count(&self, kind: TimerKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .timers
            .values()
            .filter(|t| t.kind == kind)
            .count()
    }

    fn insert(
        &mut self,
        key: &ChannelKey,
        kind: TimerKind,
        delay: Duration,
        repeating: bool,
    ) -> TimerId {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = TimerId(state.next_id);
        state.timers.insert(
            id,
            ManualTimer {
                key: key.clone(),
                kind,
                delay,
                repeating,
            },
        );
        id
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&mut self, key: &ChannelKey, kind: TimerKind, delay: Duration) -> TimerId {
        self.insert(key, kind, delay, false)
    }

    fn schedule_repeating(
        &mut self,
        key: &ChannelKey,
        kind: TimerKind,
        period: Duration,
    ) -> TimerId {
        self.insert(key, kind, period, true)
    }

    fn cancel(&mut self, id: TimerId) {
        self.state.lock().unwrap().timers.remove(&id);
    }

    fn acknowledge(&mut self, id: TimerId) -> Option<(ChannelKey, TimerKind)> {
        let mut state = self.state.lock().unwrap();
        let timer = state.timers.get(&id)?.clone();
        if !timer.repeating {
            state.timers.remove(&id);
        }
        Some((timer.key, timer.kind))
    }

    fn pending(&self) -> usize {
        self.state.lock().unwrap().timers.len()
    }
}

#[derive(Default)]
struct SurfaceState {
    written: Vec<u8>,
    listener: Option<InputSink>,
    focus_count: usize,
    reset_count: usize,
}

/// Surface that remembers everything written to it.
pub struct RecordingSurface {
    size: SurfaceSize,
    state: Mutex<SurfaceState>,
}

impl RecordingSurface {
    pub fn new(cols: u16, rows: u16) -> Arc<Self> {
        Arc::new(Self {
            size: SurfaceSize { cols, rows },
            state: Mutex::new(SurfaceState::default()),
        })
    }

    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().unwrap().written).into_owned()
    }

    pub fn listener(&self) -> Option<InputSink> {
        self.state.lock().unwrap().listener.clone()
    }

    pub fn focus_count(&self) -> usize {
        self.state.lock().unwrap().focus_count
    }

    pub fn reset_count(&self) -> usize {
        self.state.lock().unwrap().reset_count
    }

    /// Simulate the user typing while this surface has focus.
    pub fn type_input(&self, data: &str) -> bool {
        match self.listener() {
            Some(sink) => sink.send(data.as_bytes()),
            None => false,
        }
    }
}

impl Surface for RecordingSurface {
    fn write(&self, data: &[u8]) {
        self.state.lock().unwrap().written.extend_from_slice(data);
    }

    fn on_local_input(&self, listener: Option<InputSink>) {
        self.state.lock().unwrap().listener = listener;
    }

    fn focus(&self) {
        self.state.lock().unwrap().focus_count += 1;
    }

    fn size(&self) -> SurfaceSize {
        self.size
    }

    fn hard_reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.written.clear();
        state.reset_count += 1;
    }
}

/// A multiplexer wired to fakes, plus the handles a test needs to drive it.
pub struct Harness {
    pub mux: Multiplexer,
    pub net: FakeConnector,
    pub timers: ManualScheduler,
    pub events_rx: mpsc::UnboundedReceiver<MuxEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(MuxConfig::default())
    }

    pub fn with_config(config: MuxConfig) -> Self {
        let net = FakeConnector::default();
        let timers = ManualScheduler::default();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mux = Multiplexer::new(
            config,
            Box::new(net.clone()),
            Box::new(timers.clone()),
            events_tx,
        );
        Self {
            mux,
            net,
            timers,
            events_rx,
        }
    }

    /// Apply every queued event (local input, mostly).
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.mux.handle_event(event);
            applied += 1;
        }
        applied
    }
}
