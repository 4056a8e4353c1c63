//! In-process sample store.
//!
//! This provides a [`SampleStore`] backed by ordered maps, so the harness can be exercised
//! without a remote store. Series are sharded per resource: each resource has its own lock,
//! and the outer map is only write-locked when an unregistered resource shows up. Workers
//! operating on disjoint resources therefore never contend with each other.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime};

use crate::error::Result;
use crate::{Measurement, Sample, SampleStore, TimeRange};

/// All series of a single resource, keyed by metric name.
type Series = HashMap<String, BTreeMap<SystemTime, Entry>>;

#[derive(Clone, Copy, Debug)]
struct Entry {
    value: f64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| now < expires_at)
    }
}

/// A [`SampleStore`] that keeps all samples in memory.
///
/// The store is [`Clone`] so tests can hold a handle for direct inspection while the harness owns
/// a shared copy.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    resources: Arc<RwLock<HashMap<String, Arc<Mutex<Series>>>>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn series(&self, resource: &str) -> Arc<Mutex<Series>> {
        if let Some(series) = self.resources.read().unwrap().get(resource) {
            return Arc::clone(series);
        }

        let mut resources = self.resources.write().unwrap();
        Arc::clone(resources.entry(resource.to_owned()).or_default())
    }

    /// Returns the number of resources known to the store.
    pub fn resource_count(&self) -> usize {
        self.resources.read().unwrap().len()
    }

    /// Returns the number of live samples stored across all series.
    pub fn sample_count(&self) -> usize {
        let now = Instant::now();
        let resources = self.resources.read().unwrap();
        resources
            .values()
            .map(|series| {
                series
                    .lock()
                    .unwrap()
                    .values()
                    .map(|entries| entries.values().filter(|e| e.is_live(now)).count())
                    .sum::<usize>()
            })
            .sum()
    }
}

#[async_trait::async_trait]
impl SampleStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn bootstrap(&self, resources: &[String], metrics: &[String]) -> Result<()> {
        let mut registered = self.resources.write().unwrap();
        for resource in resources {
            let series = registered.entry(resource.clone()).or_default();
            let mut series = series.lock().unwrap();
            for metric in metrics {
                series.entry(metric.clone()).or_default();
            }
        }

        Ok(())
    }

    async fn insert(&self, samples: Vec<Sample>, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let expires_at = if ttl.is_zero() {
            None
        } else {
            now.checked_add(ttl)
        };

        // Batches are usually made up of a single resource, so each run of samples for the same
        // resource is written under one lock.
        for run in samples.chunk_by(|a, b| a.resource == b.resource) {
            let series = self.series(&run[0].resource);
            let mut series = series.lock().unwrap();

            for sample in run {
                let entry = Entry {
                    value: sample.value,
                    expires_at,
                };
                match series.get_mut(&sample.metric) {
                    Some(entries) => {
                        entries.insert(sample.timestamp, entry);
                    }
                    None => {
                        let entries = BTreeMap::from([(sample.timestamp, entry)]);
                        series.insert(sample.metric.clone(), entries);
                    }
                }
            }
        }

        Ok(())
    }

    async fn select(
        &self,
        resource: &str,
        metric: &str,
        range: TimeRange,
    ) -> Result<Vec<Measurement>> {
        let Some(series) = self.resources.read().unwrap().get(resource).cloned() else {
            return Ok(Vec::new());
        };

        let now = Instant::now();
        let mut series = series.lock().unwrap();
        let Some(entries) = series.get_mut(metric) else {
            return Ok(Vec::new());
        };

        if range.end <= range.start {
            return Ok(Vec::new());
        }

        let mut expired = false;
        let measurements = entries
            .range(range.start..range.end)
            .filter(|(_, entry)| {
                let live = entry.is_live(now);
                expired |= !live;
                live
            })
            .map(|(timestamp, entry)| Measurement {
                timestamp: *timestamp,
                value: entry.value,
            })
            .collect();

        // Expired samples are dropped from a series once a query runs into them.
        if expired {
            entries.retain(|_, entry| entry.is_live(now));
        }

        Ok(measurements)
    }
}
