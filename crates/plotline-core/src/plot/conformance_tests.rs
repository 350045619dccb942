//! Seeded property checks over randomly generated plots.
//!
//! All runs use paused tokio time, so durations are exact sums of the
//! sleeps and backoff delays involved.

use serde_json::{json, Map, Value};

use plotline_types::plot::Plot;
use plotline_types::run::{FailureReason, RunReport, StepStatus};

use super::engine::{Engine, RunOptions};
use super::test_support::test_registry;

/// 64-bit LCG (Knuth's MMIX constants).
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed ^ 0x9E37_79B9_7F4A_7C15)
    }

    fn next(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) as u32
    }

    fn below(&mut self, n: u32) -> u32 {
        self.next() % n.max(1)
    }

    fn chance(&mut self, percent: u32) -> bool {
        self.below(100) < percent
    }
}

const SEEDS: u64 = 64;

fn build_plot(steps: Vec<Value>) -> Plot {
    serde_json::from_value(json!({ "id": "fuzz", "steps": steps })).unwrap()
}

fn random_step(rng: &mut Lcg, index: usize, count: usize) -> Value {
    let id = format!("s{index}");
    let mut step = match rng.below(5) {
        0 => json!({ "id": id, "type": "transform", "inputs": { "assign": { (format!("t{index}")): index } } }),
        1 => json!({ "id": id, "type": "calc", "inputs": {
            "assignTo": format!("c{index}"),
            "expr": (["1 + 2 * 3", "clamp(n, 0, 10)", "n / 0", "max(n, 4) - 1"][rng.below(4) as usize])
        } }),
        2 => json!({ "id": id, "type": "unstable", "inputs": { "failTimes": rng.below(4) } }),
        3 => json!({ "id": id, "type": "sleep", "inputs": { "ms": rng.below(20) } }),
        _ => {
            let mut gate = json!({ "id": id, "type": "gate", "inputs": {
                "path": "n", "op": ([">", "<", "===", "!=="][rng.below(4) as usize]),
                "value": rng.below(10)
            } });
            // Forward targets only: a gate looping onto itself never advances paused time.
            if index + 1 < count {
                let target = format!("s{}", (index + 1 + rng.below(2) as usize).min(count - 1));
                gate["inputs"]["onTrue"] = json!(target);
            }
            gate
        }
    };

    let fields = step.as_object_mut().unwrap();
    if rng.chance(50) {
        let backoff: Vec<u32> = (0..rng.below(3)).map(|_| rng.below(10)).collect();
        fields.insert(
            "retry".into(),
            json!({ "max": rng.below(3), "backoffMs": backoff, "jitter": rng.chance(30) }),
        );
    }
    if rng.chance(25) {
        fields.insert(
            "breaker".into(),
            json!({ "failThreshold": 1 + rng.below(2), "cooldownMs": 5 + rng.below(20), "key": "shared" }),
        );
    }
    if rng.chance(15) {
        fields.insert(
            "rateLimit".into(),
            json!({ "key": "rl", "limit": rng.below(3), "intervalMs": 10 }),
        );
    }
    if rng.chance(15) {
        fields.insert("timeoutMs".into(), json!(rng.below(15)));
    }
    if index + 2 < count && rng.chance(20) {
        fields.insert("next".into(), json!(format!("s{}", index + 2)));
    }
    step
}

fn random_plot(rng: &mut Lcg) -> Plot {
    let count = 1 + rng.below(6) as usize;
    build_plot((0..count).map(|i| random_step(rng, i, count)).collect())
}

fn input(rng: &mut Lcg) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("n".into(), json!(rng.below(12)));
    map
}

fn assert_run_invariants(report: &RunReport) {
    let stats = &report.stats;
    let steps = &report.record.steps;
    assert_eq!(stats.ok + stats.failed, stats.steps);
    assert_eq!(stats.steps as usize, steps.len());

    let mut retries = 0;
    for rec in steps {
        match rec.status {
            StepStatus::Ok => {
                assert!(rec.attempts >= 1, "{rec:?}");
                assert!(rec.reason.is_none(), "{rec:?}");
            }
            StepStatus::Fail => {
                let reason = rec.reason.expect("failed step carries a reason");
                assert!(FailureReason::ALL.contains(&reason));
                if rec.attempts == 0 {
                    assert!(
                        matches!(reason, FailureReason::Timeout | FailureReason::BudgetExceeded),
                        "{rec:?}"
                    );
                }
            }
        }
        retries += rec.attempts.saturating_sub(1);
    }
    assert!(stats.retries >= retries);
}

#[tokio::test(start_paused = true)]
async fn test_random_plots_keep_run_invariants() {
    for seed in 0..SEEDS {
        let mut rng = Lcg::new(seed);
        let plot = random_plot(&mut rng);
        let engine = Engine::new(test_registry());
        let options = RunOptions::new()
            .with_input(input(&mut rng))
            .with_max_duration_ms(10 + u64::from(rng.below(80)));
        let report = engine.run_plot(&plot, options).await.unwrap();
        assert_run_invariants(&report);
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_monotonicity() {
    for seed in 0..SEEDS {
        let mut rng = Lcg::new(seed);
        let retries = 1 + rng.below(3);
        let fail_times = rng.below(retries + 2);
        let backoff: Vec<u64> = (0..1 + rng.below(3)).map(|_| u64::from(rng.below(20))).collect();
        let strategy = if rng.chance(50) { "fixed" } else { "exponential" };
        let mut bumped = backoff.clone();
        let slot = rng.below(bumped.len() as u32) as usize;
        bumped[slot] += 1 + u64::from(rng.below(15));

        let plot_with = |backoff: &[u64]| {
            build_plot(vec![json!({
                "id": "u", "type": "unstable", "inputs": { "failTimes": fail_times },
                "retry": { "max": retries, "backoffMs": backoff, "strategy": strategy, "maxBackoffMs": 60 }
            })])
        };

        let mut durations = Vec::new();
        for schedule in [&backoff, &bumped] {
            let report = Engine::new(test_registry())
                .run_plot(&plot_with(schedule), RunOptions::new())
                .await
                .unwrap();
            durations.push(report.step("u").unwrap().duration_ms);
        }
        assert!(
            durations[1] >= durations[0],
            "seed {seed}: {backoff:?} -> {bumped:?} gave {durations:?}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_breaker_strictness() {
    for seed in 0..SEEDS {
        let mut rng = Lcg::new(seed);
        let count = 1 + rng.below(4) as usize;
        let retries = rng.below(4);
        let fail_times: Vec<u32> = (0..count).map(|_| rng.below(5)).collect();
        let strict = 1 + rng.below(3);
        let loose = strict + 1 + rng.below(3);

        let plot_with = |threshold: u32| {
            build_plot(
                (0..count)
                    .map(|i| {
                        json!({
                            "id": format!("s{i}"), "type": "unstable",
                            "inputs": { "failTimes": fail_times[i] },
                            "retry": { "max": retries, "backoffMs": [0] },
                            "breaker": { "failThreshold": threshold, "cooldownMs": 60_000, "key": "shared" }
                        })
                    })
                    .collect(),
            )
        };

        let mut totals = Vec::new();
        for threshold in [strict, loose] {
            let report = Engine::new(test_registry())
                .run_plot(&plot_with(threshold), RunOptions::new())
                .await
                .unwrap();
            totals.push(report.record.steps.iter().map(|s| s.attempts).sum::<u32>());
        }
        assert!(
            totals[0] <= totals[1],
            "seed {seed}: thresholds {strict}/{loose} gave {totals:?}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_deadline_monotonicity() {
    for seed in 0..SEEDS {
        let mut rng = Lcg::new(seed);
        let count = 1 + rng.below(8) as usize;
        let plot = build_plot(
            (0..count)
                .map(|i| json!({ "id": format!("s{i}"), "type": "sleep", "inputs": { "ms": rng.below(25) } }))
                .collect(),
        );
        let max_ms = 1 + u64::from(rng.below(120));

        let mut executed = Vec::new();
        for budget in [max_ms, max_ms / 2] {
            let report = Engine::new(test_registry())
                .run_plot(&plot, RunOptions::new().with_max_duration_ms(budget))
                .await
                .unwrap();
            executed.push(report.record.steps.iter().filter(|s| s.attempts > 0).count());
        }
        assert!(
            executed[1] <= executed[0],
            "seed {seed}: {max_ms}ms ran {} steps, {}ms ran {}",
            executed[0],
            max_ms / 2,
            executed[1]
        );
    }
}
