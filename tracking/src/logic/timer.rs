//! SPDX-License-Identifier: GPL-3.0-or-later

use std::time::Duration;
use tokio::time::Instant;

/// Lets one tick through per `interval`; everything in between is a no-op.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last_tick: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_tick: None,
        }
    }

    /// Returns true and records `now` if a tick is due.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.last_tick {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_tick = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last_tick = None;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_is_due_then_rate_limited() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new(Duration::from_millis(1000));

        assert!(limiter.try_acquire(start));
        assert!(!limiter.try_acquire(start + Duration::from_millis(16)));
        assert!(!limiter.try_acquire(start + Duration::from_millis(999)));
        assert!(limiter.try_acquire(start + Duration::from_millis(1000)));
    }

    #[test]
    fn reset_makes_the_next_tick_due() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new(Duration::from_secs(1));
        assert!(limiter.try_acquire(start));
        limiter.reset();
        assert!(limiter.try_acquire(start + Duration::from_millis(1)));
    }
}
