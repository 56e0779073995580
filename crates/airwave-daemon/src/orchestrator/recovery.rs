use airwave_proto::config::PlaybackConfig;
use std::time::Duration;
use tokio::task::AbortHandle;

/// Backoff for resuming after an involuntary loss of output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u8,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_millis(3000),
            max_attempts: 3,
        }
    }
}

impl RecoveryPolicy {
    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self {
            base: Duration::from_millis(config.recovery_base_ms),
            cap: Duration::from_millis(config.recovery_cap_ms),
            max_attempts: config.recovery_max_attempts,
        }
    }

    /// `min(base * attempt, cap)`; attempts are numbered from 1.
    pub fn delay_for(&self, attempt: u8) -> Duration {
        (self.base * u32::from(attempt)).min(self.cap)
    }
}

/// Timer firing for a scheduled recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryDue {
    pub(crate) cycle: u64,
    pub(crate) attempt: u8,
}

impl RecoveryDue {
    pub fn attempt(&self) -> u8 {
        self.attempt
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecoveryState {
    retry_count: u8,
    /// Bumped on every reset; timers from an older cycle are stale.
    cycle: u64,
    /// A restart was issued and has not reached playing yet.
    attempt_in_flight: bool,
    pending: Vec<AbortHandle>,
}

impl RecoveryState {
    pub(crate) fn reset(&mut self) {
        self.cancel_pending();
        self.retry_count = 0;
        self.cycle += 1;
        self.attempt_in_flight = false;
    }

    pub(crate) fn begin_attempt(&mut self) {
        self.attempt_in_flight = true;
    }

    pub(crate) fn attempt_in_flight(&self) -> bool {
        self.attempt_in_flight
    }

    pub(crate) fn retry_count(&self) -> u8 {
        self.retry_count
    }

    pub(crate) fn cycle(&self) -> u64 {
        self.cycle
    }

    pub(crate) fn is_current(&self, due: &RecoveryDue) -> bool {
        due.cycle == self.cycle
    }

    /// Claim the next attempt number, or `None` once the budget is spent.
    pub(crate) fn next_attempt(&mut self, policy: &RecoveryPolicy) -> Option<(u8, Duration)> {
        if self.retry_count >= policy.max_attempts {
            return None;
        }
        self.retry_count += 1;
        self.attempt_in_flight = false;
        Some((self.retry_count, policy.delay_for(self.retry_count)))
    }

    pub(crate) fn track(&mut self, handle: AbortHandle) {
        self.pending.retain(|h| !h.is_finished());
        self.pending.push(handle);
    }

    pub(crate) fn cancel_pending(&mut self) {
        for handle in self.pending.drain(..) {
            handle.abort();
        }
    }
}
