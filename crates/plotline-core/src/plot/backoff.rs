//! Retry delay schedule and deterministic jitter.
//!
//! Jitter does not use an RNG: the factor is FNV-1a over the seed parts fed
//! through one xorshift32 round, so replaying a run under the same trace id
//! reproduces its delays.

use std::time::Duration;

use plotline_types::plot::{BackoffStrategy, RetryPolicy};

/// Delay before the retry that follows failed attempt `attempt` (1-based),
/// before jitter.
pub fn base_delay_ms(policy: &RetryPolicy, attempt: u32) -> u64 {
    let Some(&first) = policy.backoff_ms.first() else {
        return 0;
    };
    let index = attempt.saturating_sub(1);
    match policy.strategy {
        BackoffStrategy::Fixed => {
            let last = policy.backoff_ms.len() - 1;
            policy.backoff_ms[(index as usize).min(last)]
        }
        BackoffStrategy::Exponential => {
            let factor = 1u64.checked_shl(index).unwrap_or(u64::MAX);
            let delay = first.saturating_mul(factor);
            match policy.max_backoff_ms {
                Some(cap) => delay.min(cap),
                None => delay,
            }
        }
    }
}

/// Delay to sleep after failed attempt `attempt`, jitter applied when the
/// policy asks for it.
pub fn retry_delay(policy: &RetryPolicy, attempt: u32, seed: &[&str]) -> Duration {
    let base = base_delay_ms(policy, attempt);
    let ms = if policy.jitter && base > 0 {
        (base as f64 * jitter_factor(seed)).floor() as u64
    } else {
        base
    };
    Duration::from_millis(ms)
}

/// Factor in [0, 1) derived from `seed.join("|")`.
pub fn jitter_factor(seed: &[&str]) -> f64 {
    let hash = fnv1a(seed.join("|").as_bytes());
    f64::from(xorshift32(hash)) / 4_294_967_296.0
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

fn xorshift32(seed: u32) -> u32 {
    // Zero is a fixed point of xorshift.
    let mut x = if seed == 0 { 0x9e37_79b9 } else { seed };
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(backoff_ms: Vec<u64>) -> RetryPolicy {
        RetryPolicy {
            max: 3,
            backoff_ms,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_fixed_schedule_clamps_to_last() {
        let p = policy(vec![10, 20]);
        assert_eq!(base_delay_ms(&p, 1), 10);
        assert_eq!(base_delay_ms(&p, 2), 20);
        assert_eq!(base_delay_ms(&p, 5), 20);
        assert_eq!(base_delay_ms(&policy(vec![]), 1), 0);
    }

    #[test]
    fn test_exponential_schedule() {
        let mut p = policy(vec![10]);
        p.strategy = BackoffStrategy::Exponential;
        assert_eq!(base_delay_ms(&p, 1), 10);
        assert_eq!(base_delay_ms(&p, 2), 20);
        assert_eq!(base_delay_ms(&p, 4), 80);

        p.max_backoff_ms = Some(50);
        assert_eq!(base_delay_ms(&p, 4), 50);
        assert_eq!(base_delay_ms(&p, 200), 50);
    }

    #[test]
    fn test_jitter_is_deterministic_and_bounded() {
        let seed = ["trace-1", "u1", "1"];
        let a = jitter_factor(&seed);
        let b = jitter_factor(&seed);
        assert_eq!(a, b);
        assert!((0.0..1.0).contains(&a));

        let distinct: std::collections::HashSet<u64> = (0..32)
            .map(|i| jitter_factor(&["trace-1", "u1", &i.to_string()]).to_bits())
            .collect();
        assert!(distinct.len() > 1);
    }

    #[test]
    fn test_retry_delay_with_jitter_never_exceeds_base() {
        let mut p = policy(vec![100]);
        p.jitter = true;
        for attempt in 1..=10 {
            let attempt_label = attempt.to_string();
            let delay = retry_delay(&p, attempt, &["t", "s", &attempt_label]);
            assert!(delay <= Duration::from_millis(100));
        }
        p.jitter = false;
        assert_eq!(retry_delay(&p, 1, &["t"]), Duration::from_millis(100));
    }
}
