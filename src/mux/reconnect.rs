use std::time::Duration;

use super::channel::{Channel, ChannelStatus};
use super::timers::{Scheduler, TimerId, TimerKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// A retry is pending; `attempt` is the number it will carry.
    Scheduled { attempt: u32 },
    /// The retry budget is spent; the channel stays disconnected.
    Exhausted,
}

/// Fixed-delay, bounded retry policy for abnormally closed channels.
#[derive(Debug, Clone)]
pub struct Reconnector {
    delay: Duration,
    max_attempts: u32,
}

impl Reconnector {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Called with the channel already `Disconnected` after an abnormal closure.
    pub fn on_abnormal_close(
        &self,
        channel: &mut Channel,
        scheduler: &mut dyn Scheduler,
    ) -> ReconnectDecision {
        if channel.reconnect_attempts >= self.max_attempts {
            tracing::error!(
                "Max reconnection attempts reached for channel {}",
                channel.key()
            );
            channel.advise(&format!(
                "[Reconnect Failed] Gave up after {} attempts",
                self.max_attempts
            ));
            return ReconnectDecision::Exhausted;
        }

        if let Err(e) = channel.transition(ChannelStatus::Connecting) {
            tracing::warn!("Cannot reconnect {}: {}", channel.key(), e);
            return ReconnectDecision::Exhausted;
        }

        let attempt = channel.reconnect_attempts + 1;
        let id = scheduler.schedule_once(channel.key(), TimerKind::Reconnect, self.delay);
        channel.pending_timers.push(id);

        tracing::warn!(
            "Channel {} disconnected. Reconnecting in {:.1}s (attempt {}/{})",
            channel.key(),
            self.delay.as_secs_f64(),
            attempt,
            self.max_attempts
        );
        channel.advise(&format!(
            "[Reconnecting...] Attempt {}/{}",
            attempt, self.max_attempts
        ));
        ReconnectDecision::Scheduled { attempt }
    }

    /// Claim a fired retry timer. Returns the attempt number, or `None` if the
    /// timer no longer belongs to this channel.
    pub fn begin_attempt(&self, channel: &mut Channel, timer: TimerId) -> Option<u32> {
        let position = channel.pending_timers.iter().position(|t| *t == timer)?;
        channel.pending_timers.remove(position);
        if channel.status() != ChannelStatus::Connecting {
            return None;
        }
        channel.reconnect_attempts += 1;
        tracing::info!(
            "Reconnecting channel {} (attempt {}/{})",
            channel.key(),
            channel.reconnect_attempts,
            self.max_attempts
        );
        Some(channel.reconnect_attempts)
    }

    pub fn on_connected(&self, channel: &mut Channel) {
        if channel.reconnect_attempts > 0 {
            tracing::info!(
                "Channel {} reconnected after {} attempt(s)",
                channel.key(),
                channel.reconnect_attempts
            );
            channel.advise("[Reconnected]");
        }
        channel.reconnect_attempts = 0;
    }
}
