//! The resource × metric × time grid a run operates on.
//!
//! Everything in here is derived from the [`Config`] and deterministic, so two runs with the same
//! configuration touch exactly the same series and timestamps.

use std::iter::FusedIterator;
use std::time::{Duration, SystemTime};

use crate::config::Config;

/// Identifiers `r0` to `r<count-1>`.
pub fn resources(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("r{i}")).collect()
}

/// Names `m0` to `m<count-1>`.
pub fn metrics(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("m{i}")).collect()
}

/// The arithmetic sequence `start, start + interval, ...` of all timestamps before `end`.
#[derive(Clone, Debug)]
pub struct Timestamps {
    next: SystemTime,
    interval: Duration,
    remaining: usize,
}

impl Timestamps {
    /// Creates the sequence for the half-open range `[start, end)`.
    ///
    /// The sequence is empty if `end` is not after `start` or the interval is zero.
    pub fn new(start: SystemTime, end: SystemTime, interval: Duration) -> Self {
        let span = end.duration_since(start).unwrap_or_default();
        let remaining = if interval.is_zero() {
            0
        } else {
            span.as_nanos().div_ceil(interval.as_nanos()) as usize
        };

        Self {
            next: start,
            interval,
            remaining,
        }
    }
}

impl Iterator for Timestamps {
    type Item = SystemTime;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let current = self.next;
        self.remaining -= 1;
        self.next += self.interval;
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Timestamps {}

impl FusedIterator for Timestamps {}

/// A disjoint share of the grid's resources, owned by exactly one worker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Partition {
    /// Index of the worker owning this partition.
    pub index: usize,
    /// Resources assigned to the worker. May be empty if there are more workers than resources.
    pub resources: Vec<String>,
}

impl Partition {
    /// Returns the number of resources in this partition.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns `true` if no resources were assigned to this partition.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Splits `resources` into `parts` contiguous partitions whose sizes differ by at most one.
///
/// Larger partitions come first. There are always exactly `parts` partitions, even if some of them
/// end up empty.
pub fn partition(resources: &[String], parts: usize) -> Vec<Partition> {
    if parts == 0 {
        return Vec::new();
    }

    let base = resources.len() / parts;
    let extra = resources.len() % parts;

    let mut offset = 0;
    (0..parts)
        .map(|index| {
            let len = base + usize::from(index < extra);
            let assigned = resources[offset..offset + len].to_vec();
            offset += len;
            Partition {
                index,
                resources: assigned,
            }
        })
        .collect()
}

/// The full grid of a run.
#[derive(Clone, Debug)]
pub struct WorkloadGrid {
    resources: Vec<String>,
    metrics: Vec<String>,
    start: SystemTime,
    end: SystemTime,
    interval: Duration,
}

impl WorkloadGrid {
    /// Derives the grid from the run configuration.
    pub fn new(config: &Config) -> Self {
        Self {
            resources: config.resources(),
            metrics: config.metrics(),
            start: config.start(),
            end: config.end(),
            interval: config.interval(),
        }
    }

    /// All resource identifiers.
    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    /// All metric names. Every resource has the same metrics.
    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    /// The timestamps of every series.
    pub fn timestamps(&self) -> Timestamps {
        Timestamps::new(self.start, self.end, self.interval)
    }

    /// Total number of samples in the grid, saturating at `u64::MAX`.
    pub fn points(&self) -> u64 {
        (self.resources.len() as u64)
            .saturating_mul(self.metrics.len() as u64)
            .saturating_mul(self.timestamps().len() as u64)
    }

    /// Splits the grid's resources across `workers`.
    pub fn partitions(&self, workers: usize) -> Vec<Partition> {
        partition(&self.resources, workers)
    }
}
