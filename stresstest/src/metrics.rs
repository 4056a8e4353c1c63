//! A registry of named counters and timers shared by all workers.
//!
//! Workers look up their [`Counter`]s and [`Timer`]s once when they start and then update them
//! without touching the registry again. Counters are plain atomics. Timers keep an atomic count and
//! a [`DDSketch`] of latencies whose lock is only held to insert a single value.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use sketches_ddsketch::DDSketch;

/// Latency of successful insert calls.
pub const INSERT_LATENCY: &str = "insert.latency";
/// Samples written by successful insert calls.
pub const INSERT_SAMPLES: &str = "insert.samples";
/// Failed insert calls.
pub const INSERT_FAILURES: &str = "insert.failures";
/// Latency of successful select calls.
pub const SELECT_LATENCY: &str = "select.latency";
/// Samples returned by select calls.
pub const SELECT_SAMPLES: &str = "select.samples";
/// Failed select calls.
pub const SELECT_FAILURES: &str = "select.failures";
/// Consecutive samples of a select result further apart than the heartbeat.
pub const SELECT_GAPS: &str = "select.gaps";
/// Workers that terminated with a panic.
pub const WORKER_PANICS: &str = "worker.panics";

/// A monotonically increasing count.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Increments the counter by one.
    pub fn inc(&self) {
        self.add(1);
    }

    /// Increments the counter by `n`.
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Returns the current count.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Records the distribution of operation latencies.
#[derive(Default)]
pub struct Timer {
    count: AtomicU64,
    sketch: Mutex<DDSketch>,
}

impl Timer {
    /// Records one operation that took `elapsed`.
    pub fn record(&self, elapsed: Duration) {
        self.sketch.lock().unwrap().add(elapsed.as_secs_f64());
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of recorded operations.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn snapshot(&self, elapsed: Duration) -> TimerSnapshot {
        let sketch = self.sketch.lock().unwrap();
        let count = sketch.count() as u64;

        let quantile = |q| {
            let secs = sketch.quantile(q).ok().flatten().unwrap_or_default();
            Duration::from_secs_f64(secs.max(0.0))
        };
        let mean = match sketch.sum() {
            Some(sum) if count > 0 => Duration::from_secs_f64((sum / count as f64).max(0.0)),
            _ => Duration::ZERO,
        };

        TimerSnapshot {
            count,
            rate: rate(count, elapsed),
            mean,
            p50: quantile(0.5),
            p90: quantile(0.9),
            p99: quantile(0.99),
            max: Duration::from_secs_f64(sketch.max().unwrap_or_default().max(0.0)),
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

/// The state of a counter at the time of a [`Snapshot`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CounterSnapshot {
    /// Total count.
    pub count: u64,
    /// Mean rate per second since the registry was created.
    pub rate: f64,
}

/// The state of a timer at the time of a [`Snapshot`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimerSnapshot {
    /// Number of recorded operations.
    pub count: u64,
    /// Mean operations per second since the registry was created.
    pub rate: f64,
    /// Average latency.
    pub mean: Duration,
    /// Median latency.
    pub p50: Duration,
    /// 90th percentile latency.
    pub p90: Duration,
    /// 99th percentile latency.
    pub p99: Duration,
    /// Maximum latency.
    pub max: Duration,
}

/// A coherent read of all metrics in a [`MetricsRegistry`].
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// Time since the registry was created.
    pub elapsed: Duration,
    /// All counters, ordered by name.
    pub counters: Vec<(String, CounterSnapshot)>,
    /// All timers, ordered by name.
    pub timers: Vec<(String, TimerSnapshot)>,
}

impl Snapshot {
    /// Returns the counter with the given name.
    pub fn counter(&self, name: &str) -> Option<&CounterSnapshot> {
        self.counters.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Returns the timer with the given name.
    pub fn timer(&self, name: &str) -> Option<&TimerSnapshot> {
        self.timers.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

#[derive(Debug, Default)]
struct Metrics {
    counters: BTreeMap<String, Arc<Counter>>,
    timers: BTreeMap<String, Arc<Timer>>,
}

/// Process-wide counters and timers of a run.
#[derive(Debug)]
pub struct MetricsRegistry {
    created: Instant,
    metrics: RwLock<Metrics>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Creates an empty registry. Rates are measured from this point on.
    pub fn new() -> Self {
        Self {
            created: Instant::now(),
            metrics: RwLock::new(Metrics::default()),
        }
    }

    /// Returns the counter with the given name, registering it if needed.
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        if let Some(counter) = self.metrics.read().unwrap().counters.get(name) {
            return Arc::clone(counter);
        }

        let mut metrics = self.metrics.write().unwrap();
        Arc::clone(metrics.counters.entry(name.to_owned()).or_default())
    }

    /// Returns the timer with the given name, registering it if needed.
    pub fn timer(&self, name: &str) -> Arc<Timer> {
        if let Some(timer) = self.metrics.read().unwrap().timers.get(name) {
            return Arc::clone(timer);
        }

        let mut metrics = self.metrics.write().unwrap();
        Arc::clone(metrics.timers.entry(name.to_owned()).or_default())
    }

    /// Reads all registered metrics at once.
    ///
    /// Workers keep updating while the snapshot is taken, so values are best-effort consistent
    /// with each other. Registration of new metrics waits until the snapshot completes.
    pub fn snapshot(&self) -> Snapshot {
        let metrics = self.metrics.read().unwrap();
        let elapsed = self.created.elapsed();

        let counters = metrics
            .counters
            .iter()
            .map(|(name, counter)| {
                let count = counter.get();
                let snapshot = CounterSnapshot {
                    count,
                    rate: rate(count, elapsed),
                };
                (name.clone(), snapshot)
            })
            .collect();

        let timers = metrics
            .timers
            .iter()
            .map(|(name, timer)| (name.clone(), timer.snapshot(elapsed)))
            .collect();

        Snapshot {
            elapsed,
            counters,
            timers,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn handles_are_shared_by_name() {
        let registry = MetricsRegistry::new();

        registry.counter(INSERT_FAILURES).inc();
        registry.counter(INSERT_FAILURES).add(2);
        registry.counter(SELECT_FAILURES).inc();

        assert_eq!(registry.counter(INSERT_FAILURES).get(), 3);
        assert_eq!(registry.counter(SELECT_FAILURES).get(), 1);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let registry = MetricsRegistry::new();

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let samples = registry.counter(INSERT_SAMPLES);
                    let latency = registry.timer(INSERT_LATENCY);
                    for i in 0..1000 {
                        samples.add(10);
                        latency.record(Duration::from_micros(100 + i));
                    }
                });
            }
        });

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.counter(INSERT_SAMPLES).unwrap().count, 80_000);
        assert_eq!(snapshot.timer(INSERT_LATENCY).unwrap().count, 8000);
        assert_eq!(registry.timer(INSERT_LATENCY).count(), 8000);
    }

    #[test]
    fn timer_distribution() {
        let registry = MetricsRegistry::new();
        let timer = registry.timer(SELECT_LATENCY);
        for ms in 1..=100 {
            timer.record(Duration::from_millis(ms));
        }

        let snapshot = registry.snapshot();
        let latency = snapshot.timer(SELECT_LATENCY).unwrap();
        assert_eq!(latency.count, 100);
        assert!(latency.rate > 0.0);

        // Quantiles are approximate, with a relative error of about 1%.
        let close = |actual: Duration, expected_ms: f64| {
            let actual = actual.as_secs_f64() * 1000.0;
            (actual - expected_ms).abs() <= expected_ms * 0.05
        };
        assert!(close(latency.mean, 50.5), "{:?}", latency.mean);
        assert!(close(latency.p50, 50.0), "{:?}", latency.p50);
        assert!(close(latency.p99, 99.0), "{:?}", latency.p99);
        assert!(close(latency.max, 100.0), "{:?}", latency.max);
        assert!(latency.p50 <= latency.p90 && latency.p90 <= latency.p99);
    }

    #[test]
    fn empty_timer_snapshot() {
        let registry = MetricsRegistry::new();
        registry.timer(INSERT_LATENCY);

        let snapshot = registry.snapshot();
        let latency = snapshot.timer(INSERT_LATENCY).unwrap();
        assert_eq!(latency.count, 0);
        assert_eq!(latency.mean, Duration::ZERO);
        assert_eq!(latency.p99, Duration::ZERO);
    }

    #[test]
    fn snapshot_is_ordered_by_name() {
        let registry = MetricsRegistry::new();
        registry.counter(SELECT_SAMPLES);
        registry.counter(INSERT_SAMPLES);
        registry.counter(INSERT_FAILURES);

        let names: Vec<_> = registry
            .snapshot()
            .counters
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, [INSERT_FAILURES, INSERT_SAMPLES, SELECT_SAMPLES]);
    }
}
