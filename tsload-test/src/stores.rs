//! Scripted [`SampleStore`]s for driving workers into specific situations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tsload_store::{InMemoryStore, Measurement, Result, Sample, SampleStore, StoreError, TimeRange};

/// A store that rejects every operation while counting the attempts.
#[derive(Debug, Default)]
pub struct FailingStore {
    inserts: AtomicUsize,
    selects: AtomicUsize,
}

impl FailingStore {
    /// Creates a new failing store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of insert calls received so far.
    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    /// Number of select calls received so far.
    pub fn selects(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SampleStore for FailingStore {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn insert(&self, _samples: Vec<Sample>, _ttl: Duration) -> Result<()> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn select(&self, _: &str, _: &str, _: TimeRange) -> Result<Vec<Measurement>> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

/// A store that holds every operation until the test releases it.
///
/// Operations are forwarded to an [`InMemoryStore`] once released. Use [`entered`](Self::entered)
/// to wait until a worker is blocked inside the store.
#[derive(Debug)]
pub struct GatedStore {
    inner: InMemoryStore,
    calls: AtomicUsize,
    entered: Notify,
    gate: Semaphore,
}

impl Default for GatedStore {
    fn default() -> Self {
        Self {
            inner: InMemoryStore::new(),
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        }
    }
}

impl GatedStore {
    /// Creates a new store with a closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operations that entered the store so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Waits until an operation has entered the store.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Lets `operations` more operations complete.
    pub fn release(&self, operations: usize) {
        self.gate.add_permits(operations);
    }

    /// The store receiving released operations.
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    async fn pass(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.gate
            .acquire()
            .await
            .map_err(|_| StoreError::Unavailable("gate closed".into()))?
            .forget();
        Ok(())
    }
}

#[async_trait::async_trait]
impl SampleStore for GatedStore {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn insert(&self, samples: Vec<Sample>, ttl: Duration) -> Result<()> {
        self.pass().await?;
        self.inner.insert(samples, ttl).await
    }

    async fn select(
        &self,
        resource: &str,
        metric: &str,
        range: TimeRange,
    ) -> Result<Vec<Measurement>> {
        self.pass().await?;
        self.inner.select(resource, metric, range).await
    }
}

/// A store whose operations never complete.
#[derive(Debug, Default)]
pub struct HangingStore {
    calls: AtomicUsize,
}

impl HangingStore {
    /// Creates a new hanging store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operations that entered the store so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SampleStore for HangingStore {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn insert(&self, _samples: Vec<Sample>, _ttl: Duration) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn select(&self, _: &str, _: &str, _: TimeRange) -> Result<Vec<Measurement>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// A store that panics when asked to touch one particular resource.
///
/// All other operations are forwarded to an [`InMemoryStore`].
#[derive(Debug)]
pub struct PanickingStore {
    inner: InMemoryStore,
    resource: String,
}

impl PanickingStore {
    /// Creates a store panicking on every operation involving `resource`.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            inner: InMemoryStore::new(),
            resource: resource.into(),
        }
    }

    /// The store receiving all other operations.
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }
}

#[async_trait::async_trait]
impl SampleStore for PanickingStore {
    fn name(&self) -> &'static str {
        "panicking"
    }

    async fn insert(&self, samples: Vec<Sample>, ttl: Duration) -> Result<()> {
        if samples.iter().any(|sample| sample.resource == self.resource) {
            panic!("store crashed on {}", self.resource);
        }
        self.inner.insert(samples, ttl).await
    }

    async fn select(
        &self,
        resource: &str,
        metric: &str,
        range: TimeRange,
    ) -> Result<Vec<Measurement>> {
        if resource == self.resource {
            panic!("store crashed on {resource}");
        }
        self.inner.select(resource, metric, range).await
    }
}
