use std::time::Duration;

use tokio::time::Instant;

use super::channel::{Channel, ChannelStatus, CloseReason};
use super::timers::{Scheduler, TimerKind};
use crate::core::{WireMessage, CLOSE_NORMAL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// A ping went out.
    Probe,
    /// The channel sat idle past the ceiling and is being closed.
    Evict { idle: Duration },
    /// The channel is no longer connected; the probe was stopped.
    Stopped,
}

/// Periodic liveness probe for connected channels. Absence of a reply is not
/// an error; only the idle ceiling closes a channel.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval: Duration,
    idle_timeout: Duration,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, idle_timeout: Duration) -> Self {
        Self {
            interval,
            idle_timeout,
        }
    }

    pub fn start(&self, channel: &mut Channel, scheduler: &mut dyn Scheduler) {
        self.stop(channel, scheduler);
        let id = scheduler.schedule_repeating(channel.key(), TimerKind::Heartbeat, self.interval);
        channel.heartbeat = Some(id);
    }

    pub fn stop(&self, channel: &mut Channel, scheduler: &mut dyn Scheduler) {
        if let Some(id) = channel.heartbeat.take() {
            scheduler.cancel(id);
        }
    }

    pub fn tick(&self, channel: &mut Channel, scheduler: &mut dyn Scheduler) -> HeartbeatAction {
        if channel.status() != ChannelStatus::Connected {
            self.stop(channel, scheduler);
            return HeartbeatAction::Stopped;
        }

        let idle = Instant::now().saturating_duration_since(channel.last_activity_at());
        if idle > self.idle_timeout {
            tracing::info!(
                "Channel {} idle for {}s, closing",
                channel.key(),
                idle.as_secs()
            );
            self.stop(channel, scheduler);
            channel.close_reason = Some(CloseReason::IdleTimeout);
            if let Err(e) = channel.transition(ChannelStatus::Closing) {
                tracing::warn!("Idle close of {}: {}", channel.key(), e);
            }
            channel.advise(&format!(
                "[Idle Timeout] No activity for {} minutes, closing",
                idle.as_secs() / 60
            ));
            channel.request_close(CLOSE_NORMAL, "idle timeout");
            return HeartbeatAction::Evict { idle };
        }

        if let Err(e) = channel.send(&WireMessage::ping()) {
            tracing::debug!("Heartbeat ping for {} not sent: {}", channel.key(), e);
        }
        HeartbeatAction::Probe
    }
}
