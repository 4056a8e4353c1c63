use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use stresstest::config::Settings;
use stresstest::metrics::{
    INSERT_FAILURES, INSERT_LATENCY, INSERT_SAMPLES, SELECT_GAPS, SELECT_LATENCY, SELECT_SAMPLES,
    WORKER_PANICS,
};
use stresstest::report::ReportWriter;
use stresstest::{Command, Config, Dispatcher, ShutdownError};
use tsload_store::{InMemoryStore, SharedStore};
use tsload_test::stores::{FailingStore, GatedStore, HangingStore, PanickingStore};

#[derive(Clone, Default)]
struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Buffer {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 10 timestamps per series, 10 seconds apart.
fn config(command: Command, concurrency: usize, resources: usize, metrics: usize) -> Config {
    let settings = Settings {
        concurrency,
        num_resources: resources,
        num_metrics: metrics,
        start: SystemTime::UNIX_EPOCH,
        end: SystemTime::UNIX_EPOCH + Duration::from_secs(100),
        interval: Duration::from_secs(10),
        shutdown_timeout: Duration::from_secs(1),
        ..Default::default()
    };
    Config::from_settings(command, settings).unwrap()
}

fn new_dispatcher(config: Config, store: SharedStore) -> (Dispatcher, Buffer) {
    let buffer = Buffer::default();
    let dispatcher = Dispatcher::with_writer(config, store, ReportWriter::new(buffer.clone()));
    (dispatcher, buffer)
}

#[tokio::test]
async fn insert_writes_the_full_grid() {
    tsload_test::tracing::init();

    let store = InMemoryStore::new();
    let (mut dispatcher, buffer) = new_dispatcher(
        config(Command::Insert, 2, 4, 2),
        Arc::new(store.clone()),
    );

    dispatcher.start().unwrap();
    dispatcher.finished().await;
    dispatcher.shutdown().await.unwrap();
    dispatcher.print_report().unwrap();

    assert_eq!(store.resource_count(), 4);
    assert_eq!(store.sample_count(), 80);

    let snapshot = dispatcher.registry().snapshot();
    assert_eq!(snapshot.counter(INSERT_SAMPLES).unwrap().count, 80);
    assert_eq!(snapshot.counter(INSERT_FAILURES).unwrap().count, 0);
    // One call per series, since a series fits into a single batch.
    assert_eq!(snapshot.timer(INSERT_LATENCY).unwrap().count, 8);

    let report = buffer.contents();
    assert!(report.contains(INSERT_SAMPLES), "{report}");
    assert!(report.contains(INSERT_LATENCY), "{report}");
}

#[tokio::test]
async fn idle_workers_when_resources_run_out() {
    tsload_test::tracing::init();

    let store = InMemoryStore::new();
    let (mut dispatcher, _) = new_dispatcher(
        config(Command::Insert, 5, 2, 2),
        Arc::new(store.clone()),
    );

    dispatcher.start().unwrap();
    dispatcher.finished().await;
    dispatcher.shutdown().await.unwrap();

    assert_eq!(store.sample_count(), 40);
}

#[tokio::test]
async fn failures_are_counted_not_fatal() {
    tsload_test::tracing::init();

    let store = Arc::new(FailingStore::new());
    let (mut dispatcher, _) = new_dispatcher(config(Command::Insert, 2, 4, 2), store.clone());

    dispatcher.start().unwrap();
    dispatcher.finished().await;
    dispatcher.shutdown().await.unwrap();

    let snapshot = dispatcher.registry().snapshot();
    assert_eq!(store.inserts(), 8);
    assert_eq!(snapshot.counter(INSERT_FAILURES).unwrap().count, 8);
    assert_eq!(snapshot.counter(INSERT_SAMPLES).unwrap().count, 0);
    assert_eq!(snapshot.timer(INSERT_LATENCY).unwrap().count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn select_runs_until_shutdown() {
    tsload_test::tracing::init();

    let store = InMemoryStore::new();
    let (mut inserter, _) = new_dispatcher(
        config(Command::Insert, 2, 4, 2),
        Arc::new(store.clone()),
    );
    inserter.start().unwrap();
    inserter.finished().await;
    inserter.shutdown().await.unwrap();

    let (mut dispatcher, _) = new_dispatcher(
        config(Command::Select, 2, 4, 2),
        Arc::new(store.clone()),
    );
    dispatcher.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    dispatcher.shutdown().await.unwrap();

    let registry = Arc::clone(dispatcher.registry());
    let snapshot = registry.snapshot();
    let selects = snapshot.timer(SELECT_LATENCY).unwrap().count;
    assert!(selects > 8, "{selects}");
    assert_eq!(
        snapshot.counter(SELECT_SAMPLES).unwrap().count,
        selects * 10
    );
    // Samples are exactly one interval apart, well within the heartbeat.
    assert_eq!(snapshot.counter(SELECT_GAPS).unwrap().count, 0);

    // Nothing runs after shutdown returned.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(registry.timer(SELECT_LATENCY).count(), selects);
}

#[tokio::test]
async fn shutdown_waits_for_operations_in_flight() {
    tsload_test::tracing::init();

    let store = Arc::new(GatedStore::new());
    let (mut dispatcher, _) = new_dispatcher(config(Command::Select, 2, 4, 2), store.clone());

    dispatcher.start().unwrap();
    while store.calls() < 2 {
        tokio::task::yield_now().await;
    }

    // Runs once shutdown has signalled both workers and waits for the first join.
    let gate = Arc::clone(&store);
    tokio::spawn(async move { gate.release(2) });
    dispatcher.shutdown().await.unwrap();

    assert_eq!(store.calls(), 2);
    let snapshot = dispatcher.registry().snapshot();
    assert_eq!(snapshot.timer(SELECT_LATENCY).unwrap().count, 2);
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    tsload_test::tracing::init();

    let store = InMemoryStore::new();
    let (mut dispatcher, buffer) = new_dispatcher(
        config(Command::Select, 2, 4, 2),
        Arc::new(store),
    );

    dispatcher.start().unwrap();
    tokio::task::yield_now().await;

    dispatcher.shutdown().await.unwrap();
    dispatcher.shutdown().await.unwrap();
    dispatcher.print_report().unwrap();
    assert_eq!(buffer.contents().matches("# REPORT").count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stuck_workers_are_abandoned() {
    tsload_test::tracing::init();

    let store = Arc::new(HangingStore::new());
    let (mut dispatcher, _) = new_dispatcher(config(Command::Insert, 3, 2, 1), store.clone());

    dispatcher.start().unwrap();
    // Worker 2 owns no resources and terminates right away.
    while store.calls() < 2 {
        tokio::task::yield_now().await;
    }

    // Both stuck workers share one deadline rather than waiting a full timeout each.
    let started = tokio::time::Instant::now();
    let error = dispatcher.shutdown().await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    assert_eq!(
        error,
        ShutdownError::StuckWorkers {
            workers: vec![0, 1],
            timeout: Duration::from_secs(1),
        }
    );

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn panicking_worker_does_not_take_down_the_pool() {
    tsload_test::tracing::init();

    let store = Arc::new(PanickingStore::new("r0"));
    let (mut dispatcher, _) = new_dispatcher(config(Command::Insert, 2, 2, 1), store.clone());

    dispatcher.start().unwrap();
    dispatcher.finished().await;
    dispatcher.shutdown().await.unwrap();

    let snapshot = dispatcher.registry().snapshot();
    assert_eq!(snapshot.counter(WORKER_PANICS).unwrap().count, 1);
    assert_eq!(snapshot.counter(INSERT_SAMPLES).unwrap().count, 10);
    assert_eq!(store.inner().sample_count(), 10);
    assert_eq!(store.inner().resource_count(), 1);
}
