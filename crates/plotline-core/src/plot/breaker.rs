//! Circuit breaker guarding a step (or a group of steps sharing a key).
//!
//! Closed -> Open after `failThreshold` consecutive failures. Open ->
//! HalfOpen once `cooldownMs` has elapsed, admitting up to `halfOpenMax`
//! trial calls. HalfOpen -> Closed after `halfOpenMax` consecutive trial
//! successes; any trial failure reopens and restarts the cooldown.
//!
//! Time is passed in rather than read, so callers decide which clock to use.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use plotline_types::plot::BreakerPolicy;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation. Tracks consecutive failures toward the threshold.
    Closed { consecutive_failures: u32 },
    /// Calls are rejected until the cooldown elapses.
    Open { opened_at: Instant },
    /// Trial calls admitted so far, and how many of them succeeded.
    HalfOpen { trials: u32, successes: u32 },
}

impl CircuitState {
    pub fn name(&self) -> &'static str {
        match self {
            CircuitState::Closed { .. } => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen { .. } => "half-open",
        }
    }
}

/// Point-in-time view of a breaker, for logs and inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: &'static str,
    pub consecutive_failures: u32,
    pub half_open_trials: u32,
    pub opens: u64,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    fail_threshold: u32,
    cooldown: Duration,
    half_open_max: u32,
    state: CircuitState,
    /// Times the circuit has opened.
    opens: u64,
}

impl CircuitBreaker {
    pub fn new(policy: &BreakerPolicy) -> Self {
        let mut breaker = Self {
            fail_threshold: 1,
            cooldown: Duration::from_millis(1),
            half_open_max: 1,
            state: CircuitState::Closed {
                consecutive_failures: 0,
            },
            opens: 0,
        };
        breaker.configure(policy);
        breaker
    }

    /// Adopt the thresholds of `policy` (clamped to at least 1) without
    /// touching the current state.
    pub fn configure(&mut self, policy: &BreakerPolicy) {
        let policy = policy.normalized();
        self.fail_threshold = policy.fail_threshold;
        self.cooldown = Duration::from_millis(policy.cooldown_ms);
        self.half_open_max = policy.half_open_max;
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether a call may proceed at `now`. Moves Open -> HalfOpen when the
    /// cooldown has elapsed and counts admitted half-open trials.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed { .. } => true,
            CircuitState::Open { opened_at } => {
                if now.saturating_duration_since(opened_at) >= self.cooldown {
                    self.state = CircuitState::HalfOpen {
                        trials: 1,
                        successes: 0,
                    };
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen { trials, successes } => {
                if trials < self.half_open_max {
                    self.state = CircuitState::HalfOpen {
                        trials: trials + 1,
                        successes,
                    };
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Give back a half-open trial slot that was admitted but never reached
    /// the handler.
    pub fn release(&mut self) {
        if let CircuitState::HalfOpen { trials, successes } = self.state {
            self.state = CircuitState::HalfOpen {
                trials: trials.saturating_sub(1),
                successes,
            };
        }
    }

    pub fn record_success(&mut self) {
        self.state = match self.state {
            CircuitState::HalfOpen { trials, successes } => {
                let successes = successes + 1;
                if successes >= self.half_open_max {
                    CircuitState::Closed {
                        consecutive_failures: 0,
                    }
                } else {
                    CircuitState::HalfOpen { trials, successes }
                }
            }
            CircuitState::Closed { .. } | CircuitState::Open { .. } => CircuitState::Closed {
                consecutive_failures: 0,
            },
        };
    }

    pub fn record_failure(&mut self, now: Instant) {
        match self.state {
            CircuitState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.fail_threshold {
                    self.open(now);
                } else {
                    self.state = CircuitState::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            CircuitState::HalfOpen { .. } => self.open(now),
            CircuitState::Open { .. } => {}
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let (consecutive_failures, half_open_trials) = match self.state {
            CircuitState::Closed {
                consecutive_failures,
            } => (consecutive_failures, 0),
            CircuitState::Open { .. } => (self.fail_threshold, 0),
            CircuitState::HalfOpen { trials, .. } => (0, trials),
        };
        BreakerSnapshot {
            state: self.state.name(),
            consecutive_failures,
            half_open_trials,
            opens: self.opens,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open { opened_at: now };
        self.opens += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_opens_after_threshold() {
        let t0 = Instant::now();
        let mut b = CircuitBreaker::new(&BreakerPolicy::new(2, 50, 1));
        assert!(b.try_acquire(t0));
        b.record_failure(t0);
        assert_eq!(b.state().name(), "closed");
        b.record_failure(t0);
        assert_eq!(b.state().name(), "open");
        assert!(!b.try_acquire(t0 + ms(49)));
        assert_eq!(b.snapshot().opens, 1);
    }

    #[test]
    fn test_success_resets_failures() {
        let t0 = Instant::now();
        let mut b = CircuitBreaker::new(&BreakerPolicy::new(2, 50, 1));
        b.record_failure(t0);
        b.record_success();
        b.record_failure(t0);
        assert_eq!(
            b.state(),
            CircuitState::Closed {
                consecutive_failures: 1
            }
        );
    }

    #[test]
    fn test_half_open_admits_limited_trials() {
        let t0 = Instant::now();
        let mut b = CircuitBreaker::new(&BreakerPolicy::new(1, 50, 2));
        b.record_failure(t0);
        let later = t0 + ms(50);
        assert!(b.try_acquire(later));
        assert!(b.try_acquire(later));
        assert!(!b.try_acquire(later));
        assert_eq!(b.snapshot().half_open_trials, 2);

        b.record_success();
        assert_eq!(b.state().name(), "half-open");
        b.record_success();
        assert_eq!(b.state().name(), "closed");
    }

    #[test]
    fn test_half_open_failure_reopens_with_fresh_cooldown() {
        let t0 = Instant::now();
        let mut b = CircuitBreaker::new(&BreakerPolicy::new(1, 50, 1));
        b.record_failure(t0);
        let probe = t0 + ms(60);
        assert!(b.try_acquire(probe));
        b.record_failure(probe);
        assert_eq!(b.state(), CircuitState::Open { opened_at: probe });
        assert!(!b.try_acquire(probe + ms(49)));
        assert!(b.try_acquire(probe + ms(50)));
        assert_eq!(b.snapshot().opens, 2);
    }

    #[test]
    fn test_release_returns_trial_slot() {
        let t0 = Instant::now();
        let mut b = CircuitBreaker::new(&BreakerPolicy::new(1, 10, 1));
        b.record_failure(t0);
        assert!(b.try_acquire(t0 + ms(10)));
        assert!(!b.try_acquire(t0 + ms(10)));
        b.release();
        assert!(b.try_acquire(t0 + ms(10)));
    }

    #[test]
    fn test_zero_policy_is_clamped() {
        let t0 = Instant::now();
        let mut b = CircuitBreaker::new(&BreakerPolicy::new(0, 0, 0));
        b.record_failure(t0);
        assert_eq!(b.state().name(), "open");
        assert!(b.try_acquire(t0 + ms(1)));
    }
}
