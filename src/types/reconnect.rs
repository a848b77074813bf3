//! Bounded exponential backoff for reconnects

use std::time::Duration;

/// Reconnect bookkeeping for one connection chain.
///
/// The n-th scheduled reconnect (0-based `attempt`) waits
/// `base_delay * multiplier^attempt`. The attempt counter resets on a
/// successful open and is pinned to `max_attempts` by an intentional
/// disconnect so no scheduled reconnect can fire afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    attempt: u32,
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
}

impl ReconnectPolicy {
    /// Create a policy with the attempt counter at zero.
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self { attempt: 0, max_attempts, base_delay, multiplier }
    }

    /// Number of reconnects scheduled since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Maximum number of reconnects before the chain gives up.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns true if another reconnect may be scheduled.
    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Delay before the reconnect with the given 0-based index.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let nanos = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !nanos.is_finite() || nanos >= u64::MAX as f64 {
            return Duration::MAX;
        }
        Duration::from_nanos(nanos.round() as u64)
    }

    /// Consume one attempt.
    ///
    /// Returns the 1-based attempt number and the delay to wait before it,
    /// or `None` when the chain is exhausted.
    pub fn advance(&mut self) -> Option<(u32, Duration)> {
        if !self.can_retry() {
            return None;
        }
        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        Some((self.attempt, delay))
    }

    /// Reset after a successful open.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Pin the counter at the maximum so no reconnect can be scheduled.
    pub fn suppress(&mut self) {
        self.attempt = self.max_attempts;
    }
}
