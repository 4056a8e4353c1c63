//! Workers performing insert or select operations on their share of the grid.
//!
//! A worker checks its stop signal before every store call and never interrupts a call in flight,
//! so after being signalled it completes at most the operation it is currently waiting on.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tsload_store::{Measurement, Sample, SharedStore, TimeRange};

use crate::config::Command;
use crate::grid::{Partition, Timestamps};
use crate::metrics::{self, Counter, MetricsRegistry, Timer};

/// Everything a worker needs besides its partition.
#[derive(Clone, Debug)]
pub struct WorkerContext {
    /// The store under test.
    pub store: SharedStore,
    /// The registry receiving all measurements.
    pub registry: Arc<MetricsRegistry>,
    /// Metric names of every resource.
    pub metrics: Arc<[String]>,
    /// Timestamps of every series.
    pub timestamps: Timestamps,
    /// The time range queried by select workers.
    pub range: TimeRange,
    /// Staleness threshold between two samples of a series.
    pub heartbeat: Duration,
    /// Retention of written samples.
    pub ttl: Duration,
    /// Number of samples per insert call.
    pub batch_size: usize,
}

/// What a worker did before it terminated.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WorkerSummary {
    /// Index of the worker.
    pub index: usize,
    /// Store calls issued, successful or not.
    pub operations: u64,
    /// Store calls that failed.
    pub failures: u64,
    /// Samples written or read by successful calls.
    pub samples: u64,
    /// Whether the worker terminated because it was signalled to stop.
    pub stopped: bool,
}

/// A running worker.
#[derive(Debug)]
pub struct Worker {
    index: usize,
    stop: CancellationToken,
    handle: JoinHandle<WorkerSummary>,
}

impl Worker {
    /// Spawns a worker running the loop of `command` over `partition`.
    ///
    /// The worker stops when `stop` or any of its parents is cancelled.
    pub fn spawn(
        command: Command,
        partition: Partition,
        context: WorkerContext,
        stop: CancellationToken,
        tracker: &TaskTracker,
    ) -> Self {
        let index = partition.index;
        let token = stop.clone();
        let handle = match command {
            Command::Insert => tracker.spawn(run_insert(partition, context, token)),
            Command::Select => tracker.spawn(run_select(partition, context, token)),
        };

        Self {
            index,
            stop,
            handle,
        }
    }

    /// Index of the worker in its pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Signals the worker to stop after its current operation. Does not wait.
    pub fn shutdown(&self) {
        self.stop.cancel();
    }

    /// Returns `true` once the worker has terminated.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// A handle to forcibly abandon the worker.
    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.abort_handle()
    }

    /// Waits until the worker has terminated.
    pub async fn join(self) -> Result<WorkerSummary, JoinError> {
        self.handle.await
    }
}

/// Bookkeeping shared by both worker loops.
struct Recorder {
    latency: Arc<Timer>,
    samples: Arc<Counter>,
    failures: Arc<Counter>,
    summary: WorkerSummary,
}

impl Recorder {
    fn new(index: usize, registry: &MetricsRegistry, command: Command) -> Self {
        let (latency, samples, failures) = match command {
            Command::Insert => (
                metrics::INSERT_LATENCY,
                metrics::INSERT_SAMPLES,
                metrics::INSERT_FAILURES,
            ),
            Command::Select => (
                metrics::SELECT_LATENCY,
                metrics::SELECT_SAMPLES,
                metrics::SELECT_FAILURES,
            ),
        };

        Self {
            latency: registry.timer(latency),
            samples: registry.counter(samples),
            failures: registry.counter(failures),
            summary: WorkerSummary {
                index,
                ..Default::default()
            },
        }
    }

    fn success(&mut self, elapsed: Duration, samples: usize) {
        self.latency.record(elapsed);
        self.samples.add(samples as u64);
        self.summary.operations += 1;
        self.summary.samples += samples as u64;
    }

    fn failure(&mut self) {
        self.failures.inc();
        self.summary.operations += 1;
        self.summary.failures += 1;
    }

    fn finish(mut self, stopped: bool) -> WorkerSummary {
        self.summary.stopped = stopped;
        tracing::debug!(
            worker = self.summary.index,
            operations = self.summary.operations,
            failures = self.summary.failures,
            samples = self.summary.samples,
            stopped,
            "worker finished"
        );
        self.summary
    }
}

/// Writes every sample of the partition once.
///
/// For each resource and metric, the full timestamp sequence is submitted in batches of
/// `batch_size`. Returns early once `stop` is observed.
pub async fn run_insert(
    partition: Partition,
    context: WorkerContext,
    stop: CancellationToken,
) -> WorkerSummary {
    let mut recorder = Recorder::new(partition.index, &context.registry, Command::Insert);
    let mut rng = SmallRng::seed_from_u64(partition.index as u64);
    let mut batch = Vec::with_capacity(context.batch_size);

    let flow = 'sweep: {
        for resource in &partition.resources {
            for metric in context.metrics.iter() {
                let mut value: f64 = rng.random_range(0.0..100.0);
                for timestamp in context.timestamps.clone() {
                    value = (value + rng.random_range(-1.0..1.0)).clamp(0.0, 100.0);
                    batch.push(Sample {
                        resource: resource.clone(),
                        metric: metric.clone(),
                        timestamp,
                        value,
                    });

                    if batch.len() >= context.batch_size {
                        let samples = std::mem::take(&mut batch);
                        if submit(&context, samples, &stop, &mut recorder).await.is_break() {
                            break 'sweep ControlFlow::Break(());
                        }
                    }
                }

                if !batch.is_empty() {
                    let samples = std::mem::take(&mut batch);
                    if submit(&context, samples, &stop, &mut recorder).await.is_break() {
                        break 'sweep ControlFlow::Break(());
                    }
                }

                // Let the runtime schedule others, even if the store never suspends.
                tokio::task::yield_now().await;
            }
        }
        ControlFlow::Continue(())
    };

    recorder.finish(flow.is_break())
}

async fn submit(
    context: &WorkerContext,
    samples: Vec<Sample>,
    stop: &CancellationToken,
    recorder: &mut Recorder,
) -> ControlFlow<()> {
    if stop.is_cancelled() {
        return ControlFlow::Break(());
    }

    let count = samples.len();
    let start = Instant::now();
    match context.store.insert(samples, context.ttl).await {
        Ok(()) => recorder.success(start.elapsed(), count),
        Err(error) => {
            tracing::debug!(
                error = &error as &dyn std::error::Error,
                worker = recorder.summary.index,
                "insert failed"
            );
            recorder.failure();
        }
    }

    ControlFlow::Continue(())
}

/// Queries every series of the partition over the configured range, over and over.
///
/// Select workloads do not mutate the store, so sweeps repeat until `stop` is observed. A worker
/// with an empty partition has nothing to query and just waits to be stopped.
pub async fn run_select(
    partition: Partition,
    context: WorkerContext,
    stop: CancellationToken,
) -> WorkerSummary {
    let mut recorder = Recorder::new(partition.index, &context.registry, Command::Select);
    let gaps = context.registry.counter(metrics::SELECT_GAPS);

    if partition.is_empty() {
        stop.cancelled().await;
        return recorder.finish(true);
    }

    'sweep: loop {
        for resource in &partition.resources {
            for metric in context.metrics.iter() {
                if stop.is_cancelled() {
                    break 'sweep;
                }

                let start = Instant::now();
                match context.store.select(resource, metric, context.range).await {
                    Ok(measurements) => {
                        recorder.success(start.elapsed(), measurements.len());
                        gaps.add(count_gaps(&measurements, context.heartbeat));
                    }
                    Err(error) => {
                        tracing::debug!(
                            error = &error as &dyn std::error::Error,
                            worker = partition.index,
                            "select failed"
                        );
                        recorder.failure();
                    }
                }
            }
        }

        tokio::task::yield_now().await;
    }

    recorder.finish(true)
}

/// Counts consecutive measurements that are further apart than `heartbeat`.
fn count_gaps(measurements: &[Measurement], heartbeat: Duration) -> u64 {
    measurements
        .windows(2)
        .filter(|pair| {
            pair[1]
                .timestamp
                .duration_since(pair[0].timestamp)
                .is_ok_and(|distance| distance > heartbeat)
        })
        .count() as u64
}
