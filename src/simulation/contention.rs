//! Pessimistic vs optimistic comparison under concurrent load.
//!
//! Worker threads repeatedly pick an eligible note (received, unpaid) and
//! settle it through one strategy. Outcome counters are atomics and per
//! operation latencies come back over a channel, so workers share no other
//! mutable state.

use super::scenario::{generate_scenario, Scenario, ScenarioConfig};
use crate::config::EngineConfig;
use crate::settlement::service::{SettlementService, Strategy};
use crate::store::MemoryStore;
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Shape of the concurrent load.
#[derive(Debug, Clone)]
pub struct ContentionConfig {
    pub threads: usize,
    pub operations_per_thread: usize,
    /// Workers stop picking up new operations after this long.
    pub timeout: Duration,
}

impl Default for ContentionConfig {
    fn default() -> Self {
        Self {
            threads: 2,
            operations_per_thread: 100,
            timeout: Duration::from_secs(300),
        }
    }
}

/// Outcome of one strategy run.
#[derive(Debug, Clone, Serialize)]
pub struct ContentionReport {
    pub strategy: Strategy,
    pub total_operations: usize,
    pub successes: usize,
    pub failures: usize,
    pub retries: u64,
    pub elapsed_ms: f64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    /// Successful settlements per second.
    pub throughput: f64,
    pub timed_out: bool,
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn percentile(sorted: &[Duration], q: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64 * q) as usize).min(sorted.len() - 1);
    sorted[idx]
}

impl ContentionReport {
    fn build(
        strategy: Strategy,
        total_operations: usize,
        successes: usize,
        failures: usize,
        retries: u64,
        elapsed: Duration,
        mut latencies: Vec<Duration>,
        timed_out: bool,
    ) -> Self {
        latencies.sort_unstable();
        let sum: Duration = latencies.iter().sum();
        let avg = if latencies.is_empty() {
            Duration::ZERO
        } else {
            sum / latencies.len() as u32
        };
        let secs = elapsed.as_secs_f64();
        Self {
            strategy,
            total_operations,
            successes,
            failures,
            retries,
            elapsed_ms: millis(elapsed),
            avg_latency_ms: millis(avg),
            min_latency_ms: millis(latencies.first().copied().unwrap_or_default()),
            max_latency_ms: millis(latencies.last().copied().unwrap_or_default()),
            p50_latency_ms: millis(percentile(&latencies, 0.50)),
            p95_latency_ms: millis(percentile(&latencies, 0.95)),
            p99_latency_ms: millis(percentile(&latencies, 0.99)),
            throughput: if secs > 0.0 { successes as f64 / secs } else { 0.0 },
            timed_out,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }
        self.successes as f64 / self.total_operations as f64 * 100.0
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }
        self.failures as f64 / self.total_operations as f64 * 100.0
    }
}

impl fmt::Display for ContentionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} Lock ===", self.strategy)?;
        writeln!(f, "Total operations: {}", self.total_operations)?;
        writeln!(f, "Success:          {} ({:.2}%)", self.successes, self.success_rate())?;
        writeln!(f, "Failure:          {} ({:.2}%)", self.failures, self.failure_rate())?;
        writeln!(f, "Retries:          {}", self.retries)?;
        writeln!(f, "Total time:       {:.0} ms", self.elapsed_ms)?;
        writeln!(
            f,
            "Latency:          avg {:.1} / min {:.1} / max {:.1} ms",
            self.avg_latency_ms, self.min_latency_ms, self.max_latency_ms
        )?;
        writeln!(
            f,
            "Percentiles:      p50 {:.1} / p95 {:.1} / p99 {:.1} ms",
            self.p50_latency_ms, self.p95_latency_ms, self.p99_latency_ms
        )?;
        writeln!(f, "Throughput (TPS): {:.2}", self.throughput)?;
        if self.timed_out {
            writeln!(f, "(stopped early: timeout reached)")?;
        }
        Ok(())
    }
}

/// Run one strategy against `store` under concurrent load.
pub fn run_contention(
    store: &MemoryStore,
    engine: &EngineConfig,
    strategy: Strategy,
    config: &ContentionConfig,
) -> ContentionReport {
    let service = SettlementService::new(store.clone(), engine);
    let successes = AtomicUsize::new(0);
    let failures = AtomicUsize::new(0);
    let retries = AtomicU64::new(0);
    let timed_out = AtomicBool::new(false);
    let gate = Barrier::new(config.threads + 1);
    let (latency_tx, latency_rx) = mpsc::channel::<Duration>();

    info!(
        "{strategy}: {} threads x {} operations",
        config.threads, config.operations_per_thread
    );

    let started = thread::scope(|scope| {
        for worker in 0..config.threads {
            let latency_tx = latency_tx.clone();
            let (service, gate) = (&service, &gate);
            let (successes, failures, retries, timed_out) =
                (&successes, &failures, &retries, &timed_out);
            scope.spawn(move || {
                gate.wait();
                let deadline = Instant::now() + config.timeout;
                for op in 0..config.operations_per_thread {
                    if Instant::now() >= deadline {
                        timed_out.store(true, Ordering::Relaxed);
                        break;
                    }
                    let begun = Instant::now();
                    let pending = store.pending_notes();
                    if pending.is_empty() {
                        warn!("worker {worker}: no eligible notes left, counting as failure");
                        failures.fetch_add(1, Ordering::Relaxed);
                    } else {
                        let note = &pending[op % pending.len()];
                        match service.transfer(strategy, &note.to_request()) {
                            Ok(used) => {
                                successes.fetch_add(1, Ordering::Relaxed);
                                retries.fetch_add(u64::from(used), Ordering::Relaxed);
                            }
                            Err(e) => {
                                failures.fetch_add(1, Ordering::Relaxed);
                                debug!("worker {worker}: operation {op} failed: {e}");
                            }
                        }
                    }
                    // receiver outlives the scope
                    let _ = latency_tx.send(begun.elapsed());
                }
            });
        }
        gate.wait();
        Instant::now()
    });
    let elapsed = started.elapsed();
    drop(latency_tx);
    let latencies: Vec<Duration> = latency_rx.iter().collect();

    ContentionReport::build(
        strategy,
        config.threads * config.operations_per_thread,
        successes.into_inner(),
        failures.into_inner(),
        retries.into_inner(),
        elapsed,
        latencies,
        timed_out.into_inner(),
    )
}

/// What the comparison suggests for the observed workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// Optimistic retries more than doubled the pessimistic ones.
    Pessimistic,
    /// Optimistic throughput more than 20% higher.
    Optimistic,
    /// No significant difference.
    Either,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::Pessimistic => {
                write!(f, "High conflict environment detected. Pessimistic locking is recommended.")
            }
            Recommendation::Optimistic => {
                write!(f, "Low conflict environment detected. Optimistic locking is recommended.")
            }
            Recommendation::Either => write!(
                f,
                "Performance difference is not significant. Choose based on system characteristics."
            ),
        }
    }
}

/// Side-by-side results of both strategies.
#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub pessimistic: ContentionReport,
    pub optimistic: ContentionReport,
}

impl Comparison {
    /// Optimistic throughput relative to pessimistic, in percent.
    pub fn throughput_diff_percent(&self) -> f64 {
        if self.pessimistic.throughput <= 0.0 {
            return 0.0;
        }
        (self.optimistic.throughput - self.pessimistic.throughput) / self.pessimistic.throughput
            * 100.0
    }

    /// Positive when the optimistic average latency is lower.
    pub fn latency_diff_percent(&self) -> f64 {
        if self.pessimistic.avg_latency_ms <= 0.0 {
            return 0.0;
        }
        (self.pessimistic.avg_latency_ms - self.optimistic.avg_latency_ms)
            / self.pessimistic.avg_latency_ms
            * 100.0
    }

    pub fn recommendation(&self) -> Recommendation {
        if self.optimistic.retries > self.pessimistic.retries.saturating_mul(2) {
            Recommendation::Pessimistic
        } else if self.throughput_diff_percent() > 20.0 {
            Recommendation::Optimistic
        } else {
            Recommendation::Either
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let faster = |diff: f64| {
            if diff > 0.0 {
                "(Optimistic is faster)"
            } else {
                "(Pessimistic is faster)"
            }
        };
        writeln!(f, "{}", self.pessimistic)?;
        writeln!(f, "{}", self.optimistic)?;
        writeln!(f, "=== Comparison ===")?;
        let throughput = self.throughput_diff_percent();
        writeln!(f, "Throughput difference:       {:.2}% {}", throughput, faster(throughput))?;
        let latency = self.latency_diff_percent();
        writeln!(f, "Avg latency difference:      {:.2}% {}", latency, faster(latency))?;
        writeln!(
            f,
            "Retries:                     {} (Pessimistic) vs {} (Optimistic)",
            self.pessimistic.retries, self.optimistic.retries
        )?;
        writeln!(f, "\nRecommendation: {}", self.recommendation())
    }
}

/// Two identical scenarios, one per strategy. Without a configured seed a
/// random one is drawn and shared by both.
pub fn paired_scenarios(config: &ScenarioConfig) -> (Scenario, Scenario) {
    let seed = config.seed.unwrap_or_else(rand::random);
    debug!("scenario seed {seed}");
    let seeded = ScenarioConfig {
        seed: Some(seed),
        ..config.clone()
    };
    (generate_scenario(&seeded), generate_scenario(&seeded))
}

/// Run both strategies against the same generated load.
pub fn compare(
    scenario: &ScenarioConfig,
    engine: &EngineConfig,
    contention: &ContentionConfig,
) -> Comparison {
    let (for_pessimistic, for_optimistic) = paired_scenarios(scenario);
    let pessimistic = run_contention(
        &for_pessimistic.store,
        engine,
        Strategy::Pessimistic,
        contention,
    );
    let optimistic = run_contention(
        &for_optimistic.store,
        engine,
        Strategy::Optimistic,
        contention,
    );
    Comparison {
        pessimistic,
        optimistic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fast_engine() -> EngineConfig {
        EngineConfig {
            base_delay_ms: 1,
            ..Default::default()
        }
    }

    fn report(strategy: Strategy, retries: u64, throughput: f64) -> ContentionReport {
        ContentionReport {
            strategy,
            total_operations: 10,
            successes: 8,
            failures: 2,
            retries,
            elapsed_ms: 1000.0,
            avg_latency_ms: 10.0,
            min_latency_ms: 1.0,
            max_latency_ms: 50.0,
            p50_latency_ms: 8.0,
            p95_latency_ms: 40.0,
            p99_latency_ms: 50.0,
            throughput,
            timed_out: false,
        }
    }

    #[test]
    fn test_build_computes_percentiles() {
        let latencies = (1..=100).map(Duration::from_millis).collect();
        let report = ContentionReport::build(
            Strategy::Optimistic,
            100,
            100,
            0,
            5,
            Duration::from_secs(2),
            latencies,
            false,
        );
        assert_relative_eq!(report.min_latency_ms, 1.0);
        assert_relative_eq!(report.max_latency_ms, 100.0);
        assert_relative_eq!(report.p50_latency_ms, 51.0);
        assert_relative_eq!(report.p99_latency_ms, 100.0);
        assert_relative_eq!(report.avg_latency_ms, 50.5);
        assert_relative_eq!(report.throughput, 50.0);
    }

    #[test]
    fn test_rates() {
        let r = report(Strategy::Pessimistic, 0, 8.0);
        assert_relative_eq!(r.success_rate(), 80.0);
        assert_relative_eq!(r.failure_rate(), 20.0);
    }

    #[test]
    fn test_recommendations() {
        let heavy_retries = Comparison {
            pessimistic: report(Strategy::Pessimistic, 3, 10.0),
            optimistic: report(Strategy::Optimistic, 7, 20.0),
        };
        assert_eq!(heavy_retries.recommendation(), Recommendation::Pessimistic);

        let faster = Comparison {
            pessimistic: report(Strategy::Pessimistic, 3, 10.0),
            optimistic: report(Strategy::Optimistic, 4, 13.0),
        };
        assert_relative_eq!(faster.throughput_diff_percent(), 30.0, epsilon = 1e-9);
        assert_eq!(faster.recommendation(), Recommendation::Optimistic);

        let close = Comparison {
            pessimistic: report(Strategy::Pessimistic, 3, 10.0),
            optimistic: report(Strategy::Optimistic, 3, 11.0),
        };
        assert_eq!(close.recommendation(), Recommendation::Either);
    }

    #[test]
    fn test_run_settles_every_operation_or_counts_it() {
        let scenario = generate_scenario(&ScenarioConfig {
            member_count: 3,
            expense_count: 10,
            ..Default::default()
        });
        let before = scenario.store.total_balance();
        let config = ContentionConfig {
            threads: 2,
            operations_per_thread: 5,
            ..Default::default()
        };
        let report = run_contention(&scenario.store, &fast_engine(), Strategy::Optimistic, &config);

        assert_eq!(report.successes + report.failures, 10);
        assert!(report.successes >= 1);
        assert!(!report.timed_out);
        assert_eq!(scenario.store.total_balance(), before);
    }

    #[test]
    fn test_both_strategies_get_the_same_load() {
        let (first, second) = paired_scenarios(&ScenarioConfig::default());
        assert_eq!(first.expenses, second.expenses);
        assert_eq!(first.note_count(), second.note_count());
        for &expense in &first.expenses {
            assert_eq!(first.store.expense(expense), second.store.expense(expense));
            assert_eq!(first.store.notes(expense), second.store.notes(expense));
        }
        assert_eq!(first.store.pending_notes(), second.store.pending_notes());
    }

    #[test]
    fn test_comparison_display_mentions_both() {
        let comparison = Comparison {
            pessimistic: report(Strategy::Pessimistic, 0, 10.0),
            optimistic: report(Strategy::Optimistic, 0, 10.0),
        };
        let text = comparison.to_string();
        assert!(text.contains("Pessimistic Lock"));
        assert!(text.contains("Optimistic Lock"));
        assert!(text.contains("Recommendation"));
    }
}
