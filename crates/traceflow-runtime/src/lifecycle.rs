use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Phase of the current user turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Accepting payloads, timers allowed
    Armed,
    /// A final response arrived: one-shot timers cancelled, trace data kept
    Freezing,
    /// Everything cancelled until the next reset
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Delay between "final message rendered" and the full stop
    pub grace_period_ms: u64,
    /// Longest a freeze may last before a forced stop
    pub freeze_ceiling_ms: u64,
    /// Armed with no activity for this long stops the turn
    pub idle_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Polling stops this long after the last observed change
    pub poll_ceiling_ms: u64,
    pub sweep_interval_ms: u64,
    pub max_timers: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 100,
            freeze_ceiling_ms: 10_000,
            idle_timeout_ms: 5 * 60 * 1000,
            poll_interval_ms: 500,
            poll_ceiling_ms: 30_000,
            sweep_interval_ms: 60_000,
            max_timers: 64,
        }
    }
}

impl LifecycleConfig {
    pub fn grace_period(&self) -> Duration {
        millis(self.grace_period_ms)
    }

    pub fn freeze_ceiling(&self) -> Duration {
        millis(self.freeze_ceiling_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        millis(self.idle_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        millis(self.poll_interval_ms)
    }

    pub fn poll_ceiling(&self) -> Duration {
        millis(self.poll_ceiling_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        millis(self.sweep_interval_ms)
    }
}

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

/// Two-phase kill switch: `Armed → Freezing → Stopped`, back to `Armed` on
/// reset.
///
/// Each method reports whether it changed state, so callers run side
/// effects exactly once however often a transition is requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillSwitch {
    state: LifecycleState,
    frozen_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self {
            state: LifecycleState::Armed,
            frozen_at: None,
            stopped_at: None,
        }
    }
}

impl KillSwitch {
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state == LifecycleState::Armed
    }

    pub fn is_processing_complete(&self) -> bool {
        self.state == LifecycleState::Stopped
    }

    pub fn frozen_at(&self) -> Option<DateTime<Utc>> {
        self.frozen_at
    }

    pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
        self.stopped_at
    }

    /// `Armed → Freezing`. No-op in any other state.
    pub fn freeze(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != LifecycleState::Armed {
            return false;
        }
        self.state = LifecycleState::Freezing;
        self.frozen_at = Some(now);
        true
    }

    /// `Armed | Freezing → Stopped`. No-op once stopped.
    pub fn stop(&mut self, now: DateTime<Utc>) -> bool {
        if self.state == LifecycleState::Stopped {
            return false;
        }
        self.state = LifecycleState::Stopped;
        self.stopped_at = Some(now);
        true
    }

    /// Back to `Armed`. Returns whether the switch had left `Armed`.
    pub fn reset(&mut self) -> bool {
        let changed = self.state != LifecycleState::Armed;
        *self = Self::default();
        changed
    }
}
