//! Exponential retry delays.
//!
//! `delay = base * 2^(failures - 1)`, capped at `max`. The counter resets on
//! the next success.

use std::time::Duration;

/// Maximum exponent to prevent overflow.
const MAX_EXPONENT: u32 = 16;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: 0,
        }
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.current()
    }

    /// Delay for the current failure count, zero when there were none.
    pub fn current(&self) -> Duration {
        if self.failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (self.failures - 1).min(MAX_EXPONENT);
        self.base.saturating_mul(1 << exponent).min(self.max)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_up_to_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(30), Duration::from_secs(480));
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![30, 60, 120, 240, 480, 480, 480]);
        assert_eq!(backoff.failures(), 7);
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut backoff = Backoff::new(Duration::from_secs(30), Duration::from_secs(480));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.current(), Duration::ZERO);
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_many_failures_do_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_secs(30), Duration::from_secs(480));
        for _ in 0..100 {
            backoff.next_delay();
        }
        assert_eq!(backoff.current(), Duration::from_secs(480));
    }

    #[test]
    fn test_cap_below_base_is_raised() {
        let mut backoff = Backoff::new(Duration::from_secs(30), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
    }
}
