//! Lifecycle of a run: partitioning, worker pool, reporting and shutdown.

use std::io;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tsload_store::SharedStore;

use crate::config::Config;
use crate::error::{DispatchError, ShutdownError};
use crate::grid::WorkloadGrid;
use crate::metrics::{self, MetricsRegistry};
use crate::report::{REPORT_INTERVAL, ReportWriter, Reporter};
use crate::worker::{Worker, WorkerContext};

#[derive(Debug)]
enum State {
    Idle,
    Running(Vec<Worker>),
    Stopped,
}

/// Owns the worker pool of a run and the periodic reporter.
///
/// A dispatcher goes through three states: idle after construction, running after
/// [`start`](Self::start), and stopped after [`shutdown`](Self::shutdown). Dropping it in any state
/// signals all workers and the reporter to stop.
#[derive(Debug)]
pub struct Dispatcher {
    config: Config,
    store: SharedStore,
    registry: Arc<MetricsRegistry>,
    writer: ReportWriter,
    reporter: Option<Reporter>,
    root: CancellationToken,
    tracker: TaskTracker,
    state: State,
}

impl Dispatcher {
    /// Creates a dispatcher reporting to standard output.
    ///
    /// Must be called from within a Tokio runtime, since the periodic reporter starts right away.
    pub fn new(config: Config, store: SharedStore) -> Self {
        Self::with_writer(config, store, ReportWriter::stdout())
    }

    /// Creates a dispatcher writing all reports to `writer`.
    pub fn with_writer(config: Config, store: SharedStore, writer: ReportWriter) -> Self {
        let registry = Arc::new(MetricsRegistry::new());
        let reporter = Reporter::spawn(Arc::clone(&registry), writer.clone(), REPORT_INTERVAL);

        // Nothing but `start` spawns onto the tracker, so `finished` only waits for workers.
        let tracker = TaskTracker::new();
        tracker.close();

        Self {
            config,
            store,
            registry,
            writer,
            reporter: Some(reporter),
            root: CancellationToken::new(),
            tracker,
            state: State::Idle,
        }
    }

    /// The registry all workers of this dispatcher report to.
    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    /// Partitions the grid and spawns one worker per partition. Returns without waiting.
    pub fn start(&mut self) -> Result<(), DispatchError> {
        match self.state {
            State::Idle => (),
            State::Running(_) => return Err(DispatchError::AlreadyStarted),
            State::Stopped => return Err(DispatchError::Stopped),
        }

        let command = self.config.command();
        let grid = WorkloadGrid::new(&self.config);
        let context = WorkerContext {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            metrics: grid.metrics().into(),
            timestamps: grid.timestamps(),
            range: self.config.time_range(),
            heartbeat: self.config.heartbeat(),
            ttl: self.config.ttl(),
            batch_size: self.config.batch_size(),
        };

        tracing::info!(
            %command,
            workers = self.config.concurrency(),
            resources = grid.resources().len(),
            metrics = grid.metrics().len(),
            points = grid.points(),
            "starting workers"
        );

        let workers = grid
            .partitions(self.config.concurrency())
            .into_iter()
            .map(|partition| {
                tracing::debug!(
                    worker = partition.index,
                    resources = partition.len(),
                    "spawning worker"
                );
                Worker::spawn(
                    command,
                    partition,
                    context.clone(),
                    self.root.child_token(),
                    &self.tracker,
                )
            })
            .collect();

        self.state = State::Running(workers);
        Ok(())
    }

    /// Resolves once every worker has terminated.
    ///
    /// Insert workers terminate on their own after writing their partition. Select workers only
    /// terminate when stopped. Resolves immediately if no workers are running.
    pub async fn finished(&self) {
        self.tracker.wait().await;
    }

    /// Stops all workers and waits for them, then stops the reporter.
    ///
    /// All workers are signalled before the first one is joined, so they wind down in parallel.
    /// Workers are then joined in index order. Workers that do not terminate within the shutdown
    /// timeout are abandoned and reported in [`ShutdownError::StuckWorkers`].
    ///
    /// Calling this again after it returned is a no-op.
    pub async fn shutdown(&mut self) -> Result<(), ShutdownError> {
        let workers = match std::mem::replace(&mut self.state, State::Stopped) {
            State::Running(workers) => workers,
            State::Idle => Vec::new(),
            State::Stopped => return Ok(()),
        };

        tracing::info!(workers = workers.len(), "stopping workers");
        for worker in &workers {
            worker.shutdown();
        }

        let timeout = self.config.shutdown_timeout();
        let deadline = Instant::now() + timeout;
        let mut stuck = Vec::new();

        for worker in workers {
            let index = worker.index();
            let abort = worker.abort_handle();

            match tokio::time::timeout_at(deadline, worker.join()).await {
                Ok(Ok(summary)) => tracing::debug!(?summary, "joined worker"),
                Ok(Err(error)) if error.is_panic() => {
                    tracing::error!(
                        error = &error as &dyn std::error::Error,
                        worker = index,
                        "worker panicked"
                    );
                    self.registry.counter(metrics::WORKER_PANICS).inc();
                }
                Ok(Err(error)) => {
                    tracing::warn!(
                        error = &error as &dyn std::error::Error,
                        worker = index,
                        "worker was cancelled"
                    );
                }
                Err(_) => {
                    tracing::warn!(worker = index, "worker did not stop in time, abandoning");
                    abort.abort();
                    stuck.push(index);
                }
            }
        }

        self.root.cancel();
        if let Some(reporter) = self.reporter.take() {
            reporter.stop().await;
        }

        if stuck.is_empty() {
            tracing::info!("all workers stopped");
            Ok(())
        } else {
            Err(ShutdownError::StuckWorkers {
                workers: stuck,
                timeout,
            })
        }
    }

    /// Writes a report of the current metrics right away.
    pub fn print_report(&self) -> io::Result<()> {
        self.writer.report(&self.registry)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.root.cancel();
        if let Some(reporter) = &self.reporter {
            reporter.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use tsload_store::InMemoryStore;
    use tsload_test::stores::GatedStore;

    use crate::config::{Command, Settings};

    use super::*;

    fn config(command: Command) -> Config {
        let settings = Settings {
            concurrency: 2,
            num_resources: 4,
            num_metrics: 2,
            start: SystemTime::UNIX_EPOCH,
            end: SystemTime::UNIX_EPOCH + Duration::from_secs(100),
            interval: Duration::from_secs(10),
            ..Default::default()
        };
        Config::from_settings(command, settings).unwrap()
    }

    #[tokio::test]
    async fn start_only_once() {
        let store = Arc::new(InMemoryStore::new());
        let mut dispatcher = Dispatcher::with_writer(
            config(Command::Insert),
            store,
            ReportWriter::new(io::sink()),
        );

        dispatcher.start().unwrap();
        assert_eq!(dispatcher.start(), Err(DispatchError::AlreadyStarted));

        dispatcher.finished().await;
        dispatcher.shutdown().await.unwrap();
        assert_eq!(dispatcher.start(), Err(DispatchError::Stopped));
    }

    #[tokio::test]
    async fn shutdown_without_start() {
        let store = Arc::new(InMemoryStore::new());
        let mut dispatcher = Dispatcher::with_writer(
            config(Command::Select),
            store,
            ReportWriter::new(io::sink()),
        );

        dispatcher.finished().await;
        dispatcher.shutdown().await.unwrap();
        dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn drop_stops_workers() {
        let store = Arc::new(GatedStore::new());
        let mut dispatcher = Dispatcher::with_writer(
            config(Command::Select),
            store.clone(),
            ReportWriter::new(io::sink()),
        );
        dispatcher.start().unwrap();
        let tracker = dispatcher.tracker.clone();

        store.entered().await;
        drop(dispatcher);
        store.release(2);

        tracker.wait().await;
        assert!(store.calls() <= 2, "{}", store.calls());
    }
}
