use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

use super::channel::ChannelKey;
use super::MuxEvent;

/// Shortest period a repeating timer runs at.
const MIN_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Heartbeat,
    Reconnect,
}

/// Timer service used by the multiplexer. A fired timer is delivered as
/// `MuxEvent::TimerFired` and must be claimed with `acknowledge` before it
/// is acted on.
pub trait Scheduler: Send {
    fn schedule_once(&mut self, key: &ChannelKey, kind: TimerKind, delay: Duration) -> TimerId;

    fn schedule_repeating(
        &mut self,
        key: &ChannelKey,
        kind: TimerKind,
        period: Duration,
    ) -> TimerId;

    fn cancel(&mut self, id: TimerId);

    /// Returns `None` for cancelled or unknown timers. One-shot timers are
    /// forgotten once acknowledged.
    fn acknowledge(&mut self, id: TimerId) -> Option<(ChannelKey, TimerKind)>;

    /// Number of timers still scheduled.
    fn pending(&self) -> usize;
}

struct ScheduledTimer {
    key: ChannelKey,
    kind: TimerKind,
    repeating: bool,
    task: JoinHandle<()>,
}

/// Arms tokio sleeps that post fire events back into the multiplexer queue.
pub struct TokioScheduler {
    next_id: u64,
    timers: HashMap<TimerId, ScheduledTimer>,
    events_tx: mpsc::UnboundedSender<MuxEvent>,
}

impl TokioScheduler {
    pub fn new(events_tx: mpsc::UnboundedSender<MuxEvent>) -> Self {
        Self {
            next_id: 0,
            timers: HashMap::new(),
            events_tx,
        }
    }

    fn allocate(&mut self) -> TimerId {
        self.next_id += 1;
        TimerId(self.next_id)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&mut self, key: &ChannelKey, kind: TimerKind, delay: Duration) -> TimerId {
        let id = self.allocate();
        let events_tx = self.events_tx.clone();
        let task = tokio::spawn(async move {
            sleep(delay).await;
            let _ = events_tx.send(MuxEvent::TimerFired { timer: id });
        });
        self.timers.insert(
            id,
            ScheduledTimer {
                key: key.clone(),
                kind,
                repeating: false,
                task,
            },
        );
        tracing::trace!("Scheduled {:?} timer {:?} for {} in {:?}", kind, id, key, delay);
        id
    }

    fn schedule_repeating(
        &mut self,
        key: &ChannelKey,
        kind: TimerKind,
        period: Duration,
    ) -> TimerId {
        let id = self.allocate();
        let events_tx = self.events_tx.clone();
        // interval_at panics on a zero period
        let period = period.max(MIN_PERIOD);
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if events_tx.send(MuxEvent::TimerFired { timer: id }).is_err() {
                    break;
                }
            }
        });
        self.timers.insert(
            id,
            ScheduledTimer {
                key: key.clone(),
                kind,
                repeating: true,
                task,
            },
        );
        tracing::trace!(
            "Scheduled repeating {:?} timer {:?} for {} every {:?}",
            kind,
            id,
            key,
            period
        );
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(timer) = self.timers.remove(&id) {
            timer.task.abort();
        }
    }

    fn acknowledge(&mut self, id: TimerId) -> Option<(ChannelKey, TimerKind)> {
        let timer = self.timers.get(&id)?;
        let claimed = (timer.key.clone(), timer.kind);
        if !timer.repeating {
            self.timers.remove(&id);
        }
        Some(claimed)
    }

    fn pending(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.task.abort();
        }
    }
}
