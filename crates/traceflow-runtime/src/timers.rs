use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

pub type TimerId = u64;

/// What a timer does when it fires. Timers carry no callbacks; the process
/// context maps each action to its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerAction {
    /// Grace delay between "final message rendered" and the full stop
    StopAfterGrace,
    /// Forced stop when a freeze lasts too long
    HardStop,
    /// No activity for the idle timeout
    IdleStop,
    /// Compare the store's change hash with the last one seen
    PollChanges,
    /// Drop expired traces from every tier
    Sweep,
}

#[derive(Debug, Clone)]
struct Timer {
    action: TimerAction,
    due: DateTime<Utc>,
    every: Option<Duration>,
}

/// Every pending timer and interval of a process.
///
/// Creation is refused while locked and above `max_timers`, so a runaway
/// caller cannot grow the set without bound.
#[derive(Debug, Clone)]
pub struct TimerRegistry {
    timers: BTreeMap<TimerId, Timer>,
    next_id: TimerId,
    max_timers: usize,
    locked: bool,
}

impl TimerRegistry {
    pub fn new(max_timers: usize) -> Self {
        Self {
            timers: BTreeMap::new(),
            next_id: 1,
            max_timers,
            locked: false,
        }
    }

    pub fn schedule_once(
        &mut self,
        action: TimerAction,
        now: DateTime<Utc>,
        delay: Duration,
    ) -> Option<TimerId> {
        self.insert(action, now + delay, None)
    }

    pub fn schedule_every(
        &mut self,
        action: TimerAction,
        now: DateTime<Utc>,
        period: Duration,
    ) -> Option<TimerId> {
        let period = period.max(Duration::milliseconds(1));
        self.insert(action, now + period, Some(period))
    }

    fn insert(
        &mut self,
        action: TimerAction,
        due: DateTime<Utc>,
        every: Option<Duration>,
    ) -> Option<TimerId> {
        if self.locked {
            tracing::debug!(?action, "timer creation refused, processing complete");
            return None;
        }
        if self.timers.len() >= self.max_timers {
            tracing::warn!(?action, limit = self.max_timers, "timer limit reached");
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.timers.insert(id, Timer { action, due, every });
        Some(id)
    }

    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    /// Cancel every timer running `action`. Returns how many were cancelled.
    pub fn cancel_action(&mut self, action: TimerAction) -> usize {
        let before = self.timers.len();
        self.timers.retain(|_, t| t.action != action);
        before - self.timers.len()
    }

    /// Cancel one-shot timers, leaving intervals running.
    pub fn cancel_once(&mut self) -> usize {
        let before = self.timers.len();
        self.timers.retain(|_, t| t.every.is_some());
        before - self.timers.len()
    }

    pub fn cancel_all(&mut self) -> usize {
        let count = self.timers.len();
        self.timers.clear();
        count
    }

    /// Actions due at `now`, earliest first.
    ///
    /// One-shot timers are removed; intervals fire once per call however
    /// many periods were missed, then move to `now + period`.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<TimerAction> {
        let mut fired: Vec<(DateTime<Utc>, TimerId, TimerAction)> = self
            .timers
            .iter()
            .filter(|(_, t)| t.due <= now)
            .map(|(id, t)| (t.due, *id, t.action))
            .collect();
        fired.sort_by_key(|(due, id, _)| (*due, *id));

        for (_, id, _) in &fired {
            let reschedule = self.timers.get(id).and_then(|t| t.every);
            match reschedule {
                Some(period) => {
                    if let Some(timer) = self.timers.get_mut(id) {
                        timer.due = now + period;
                    }
                }
                None => {
                    self.timers.remove(id);
                }
            }
        }
        fired.into_iter().map(|(_, _, action)| action).collect()
    }

    pub fn is_scheduled(&self, action: TimerAction) -> bool {
        self.timers.values().any(|t| t.action == action)
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
