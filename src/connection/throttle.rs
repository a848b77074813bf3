//! Outbound send-rate throttling

use std::time::Duration;
use tokio::time::Instant;

/// Drop-not-queue send throttle.
///
/// A send is admitted only if at least `min_interval` has elapsed since the
/// last transmitted frame. Rejected sends leave `last_sent_at` untouched, so
/// freshness wins over completeness: the stream never builds a backlog.
#[derive(Debug, Clone)]
pub struct SendThrottle {
    last_sent_at: Option<Instant>,
    min_interval: Duration,
}

impl SendThrottle {
    /// Create a throttle that has never sent.
    pub fn new(min_interval: Duration) -> Self {
        Self { last_sent_at: None, min_interval }
    }

    /// Minimum interval between transmissions.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Time of the last transmission, if any.
    pub fn last_sent_at(&self) -> Option<Instant> {
        self.last_sent_at
    }

    /// Returns true if a frame may be transmitted at `now`.
    pub fn is_ready(&self, now: Instant) -> bool {
        match self.last_sent_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
        }
    }

    /// Record a transmission at `now`.
    pub fn record(&mut self, now: Instant) {
        self.last_sent_at = Some(now);
    }
}
