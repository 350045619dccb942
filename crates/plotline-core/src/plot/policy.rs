//! Shared breaker and rate-limiter state, keyed by breaker key and
//! `rateLimit.key`.
//!
//! One `PolicyState` belongs to an `Engine` and outlives individual runs.
//! Every transition happens inside a `DashMap` entry guard that is dropped
//! before the caller awaits anything.

use dashmap::DashMap;
use tokio::time::Instant;

use plotline_types::plot::{BreakerPolicy, RateLimitPolicy};

use super::breaker::{BreakerSnapshot, CircuitBreaker};
use super::rate_limit::FixedWindowLimiter;

#[derive(Debug, Default)]
pub struct PolicyState {
    breakers: DashMap<String, CircuitBreaker>,
    limiters: DashMap<String, FixedWindowLimiter>,
}

impl PolicyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the breaker under `key` whether a call may proceed.
    pub fn breaker_admit(&self, key: &str, policy: &BreakerPolicy, now: Instant) -> bool {
        let mut breaker = self
            .breakers
            .entry(key.to_string())
            .or_insert_with(|| CircuitBreaker::new(policy));
        breaker.configure(policy);
        breaker.try_acquire(now)
    }

    /// Return a trial slot taken by an admitted call that never ran.
    pub fn breaker_release(&self, key: &str) {
        if let Some(mut breaker) = self.breakers.get_mut(key) {
            breaker.release();
        }
    }

    pub fn breaker_success(&self, key: &str) {
        if let Some(mut breaker) = self.breakers.get_mut(key) {
            breaker.record_success();
        }
    }

    pub fn breaker_failure(&self, key: &str, now: Instant) {
        if let Some(mut breaker) = self.breakers.get_mut(key) {
            breaker.record_failure(now);
        }
    }

    pub fn breaker_snapshot(&self, key: &str) -> Option<BreakerSnapshot> {
        self.breakers.get(key).map(|b| b.snapshot())
    }

    /// Take one token from the limiter under `policy.key`.
    pub fn acquire_token(&self, policy: &RateLimitPolicy, now: Instant) -> bool {
        let mut limiter = self
            .limiters
            .entry(policy.key.clone())
            .or_insert_with(|| FixedWindowLimiter::new(policy));
        limiter.configure(policy);
        limiter.try_acquire(now)
    }
}
