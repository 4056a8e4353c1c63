//! The store layer describes what the load generator talks to.
//!
//! A [`SampleStore`] accepts batches of [`Sample`]s and answers range queries for a single
//! resource/metric pair. The harness only ever goes through this trait, so the actual storage
//! engine stays an external collaborator. Two implementations ship with this crate:
//!
//!  - [`InMemoryStore`]: an in-process store, useful to validate the harness itself and in tests.
//!  - [`HttpStore`]: a JSON-over-HTTP client for a remote sample store.
//!
//! Use [`connect`] to create the store described by a [`StoreConfig`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

mod config;
mod error;
mod http;
mod memory;

pub use config::{Backend, Compression, ConfigSecret, StoreConfig};
pub use error::{Result, StoreError};
pub use http::HttpStore;
pub use memory::InMemoryStore;

/// A single value of a metric, collected for a resource at a point in time.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Identifier of the resource the sample belongs to, such as `r0`.
    pub resource: String,
    /// Name of the metric within the resource, such as `m0`.
    pub metric: String,
    /// The time the sample was collected at.
    pub timestamp: SystemTime,
    /// The gauge value.
    pub value: f64,
}

/// A sample as returned by [`SampleStore::select`], without its resource and metric.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    /// The time the sample was collected at.
    pub timestamp: SystemTime,
    /// The gauge value.
    pub value: f64,
}

/// A half-open range of time, `[start, end)`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeRange {
    /// Inclusive lower bound.
    pub start: SystemTime,
    /// Exclusive upper bound.
    pub end: SystemTime,
}

impl TimeRange {
    /// Creates a new range from `start` up to, but not including, `end`.
    pub fn new(start: SystemTime, end: SystemTime) -> Self {
        Self { start, end }
    }

    /// Returns `true` if the timestamp falls within this range.
    pub fn contains(&self, timestamp: SystemTime) -> bool {
        self.start <= timestamp && timestamp < self.end
    }
}

/// The contract between the load generator and the store under test.
///
/// Implementations must be safe to share between all workers. Calls from different workers must
/// not serialize on each other when they touch different resources.
#[async_trait::async_trait]
pub trait SampleStore: Debug + Send + Sync + 'static {
    /// A short name of the backend used in logs.
    fn name(&self) -> &'static str;

    /// Registers all resources and metrics of a run before any worker starts.
    async fn bootstrap(&self, _resources: &[String], _metrics: &[String]) -> Result<()> {
        Ok(())
    }

    /// Writes a batch of samples which the store should retain for `ttl`.
    ///
    /// A `ttl` of zero retains the samples indefinitely.
    async fn insert(&self, samples: Vec<Sample>, ttl: Duration) -> Result<()>;

    /// Reads all samples of a resource/metric pair within `range`, ordered by timestamp.
    async fn select(&self, resource: &str, metric: &str, range: TimeRange)
    -> Result<Vec<Measurement>>;
}

/// A shared, type-erased [`SampleStore`].
pub type SharedStore = Arc<dyn SampleStore>;

/// Creates the store described by the given configuration.
pub fn connect(config: &StoreConfig) -> Result<SharedStore> {
    let store: SharedStore = match config.backend {
        Backend::Memory => Arc::new(InMemoryStore::new()),
        Backend::Http => Arc::new(HttpStore::new(config)?),
    };

    tracing::debug!(backend = store.name(), "connected to sample store");
    Ok(store)
}
