//! Fixed-window rate limiter.
//!
//! The first acquisition opens a window of `intervalMs`; each acquisition
//! inside the window consumes one of `limit` tokens. A limit of zero denies
//! every call.

use std::time::Duration;

use tokio::time::Instant;

use plotline_types::plot::RateLimitPolicy;

#[derive(Debug, Clone)]
pub struct FixedWindowLimiter {
    limit: u32,
    interval: Duration,
    window_start: Option<Instant>,
    consumed: u32,
}

impl FixedWindowLimiter {
    pub fn new(policy: &RateLimitPolicy) -> Self {
        Self {
            limit: policy.limit,
            interval: Duration::from_millis(policy.interval_ms),
            window_start: None,
            consumed: 0,
        }
    }

    /// Adopt `limit`/`intervalMs` from the most recent policy using this key.
    pub fn configure(&mut self, policy: &RateLimitPolicy) {
        self.limit = policy.limit;
        self.interval = Duration::from_millis(policy.interval_ms);
    }

    /// Take a token at `now`, if one is left in the current window.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if self.limit == 0 {
            return false;
        }
        let expired = match self.window_start {
            None => true,
            Some(start) => now.saturating_duration_since(start) >= self.interval,
        };
        if expired {
            self.window_start = Some(now);
            self.consumed = 0;
        }
        if self.consumed < self.limit {
            self.consumed += 1;
            true
        } else {
            false
        }
    }

    /// Tokens left in the current window (the full limit if none is open).
    #[cfg(test)]
    pub fn remaining(&self, now: Instant) -> u32 {
        match self.window_start {
            Some(start) if now.saturating_duration_since(start) < self.interval => {
                self.limit.saturating_sub(self.consumed)
            }
            _ => self.limit,
        }
    }
}
