//! Poll interval backoff.

use std::time::Duration;

/// Sleep policy between ticks.
///
/// Rate limiting doubles the wait up to `ceiling` and the doubled value
/// persists across ticks until a success. Transport failures add a one-off
/// fixed penalty without touching the exponential state.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    current: Duration,
    unavailable: Duration,
    penalty: Option<Duration>,
}

impl Backoff {
    pub fn new(base: Duration, ceiling: Duration, unavailable: Duration) -> Self {
        Self {
            base,
            ceiling: ceiling.max(base),
            current: base,
            unavailable,
            penalty: None,
        }
    }

    pub fn on_success(&mut self) {
        self.current = self.base;
    }

    pub fn on_rate_limited(&mut self) {
        self.current = (self.current * 2).min(self.ceiling);
    }

    pub fn on_unavailable(&mut self) {
        self.penalty = Some(self.unavailable);
    }

    /// Interval without consuming a pending penalty.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn is_backed_off(&self) -> bool {
        self.current > self.base
    }

    /// Wait before the next tick. A pending transport penalty is used once.
    pub fn next_delay(&mut self) -> Duration {
        match self.penalty.take() {
            Some(penalty) => penalty.max(self.current),
            None => self.current,
        }
    }
}
