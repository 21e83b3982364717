/// Consecutive-failure counter guarding a durable tier.
///
/// `record_failure` reports `Open` once `threshold` writes in a row have
/// failed; the caller then runs its recovery and either records a success or
/// calls `reset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreaker {
    threshold: u32,
    consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
}

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) -> BreakerState {
        self.consecutive_failures += 1;
        self.state()
    }

    pub fn state(&self) -> BreakerState {
        if self.consecutive_failures >= self.threshold {
            BreakerState::Open
        } else {
            BreakerState::Closed
        }
    }

    pub fn failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }
}
