//! This is a load generation library for time-series sample stores.
//!
//! A run works on a grid of `resources × metrics × timestamps`. The resources are split into
//! balanced, disjoint partitions, one per worker, and every worker either writes its share of the
//! grid (`insert`) or keeps querying it (`select`) through a [`SampleStore`](tsload_store::SampleStore).
//!
//! The [`Dispatcher`] owns the worker pool. It starts all workers at once, prints a report of the
//! collected [metrics] every 30 seconds and shuts the pool down in two phases: first all workers
//! are signalled, then each one is joined. Workers only check for the stop signal between store
//! calls, so no call is ever interrupted.
//!
//! ```no_run
//! # async fn example() -> anyhow::Result<()> {
//! use std::sync::Arc;
//!
//! use stresstest::{Command, Config, Dispatcher, Overrides};
//! use tsload_store::InMemoryStore;
//!
//! let config = Config::load(Command::Insert, None, &Overrides::default())?;
//! let mut dispatcher = Dispatcher::new(config, Arc::new(InMemoryStore::new()));
//!
//! dispatcher.start()?;
//! dispatcher.finished().await;
//! dispatcher.shutdown().await?;
//! dispatcher.print_report()?;
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod grid;
pub mod metrics;
pub mod report;
pub mod worker;

mod error;
mod observability;

pub use crate::config::{Command, Config, ConfigError, Overrides};
pub use crate::dispatcher::Dispatcher;
pub use crate::error::{DispatchError, ShutdownError};
pub use crate::grid::WorkloadGrid;
pub use crate::metrics::MetricsRegistry;
