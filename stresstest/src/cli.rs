//! Command line entry point of the `tsload` binary.

use std::future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;

use crate::config::{Command, Config, Overrides, StoreOverrides};
use crate::dispatcher::Dispatcher;
use crate::grid::WorkloadGrid;
use crate::observability;

/// Load generator for time-series sample stores.
///
/// `insert` writes every sample of the configured grid once. `select` queries every series of the
/// grid repeatedly until interrupted or until the configured duration elapses.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// number of concurrent workers
    #[argh(option, short = 'n')]
    concurrency: Option<usize>,

    /// start of the sample time range, as an RFC 3339 timestamp
    #[argh(option, short = 's')]
    start: Option<String>,

    /// end of the sample time range (exclusive), as an RFC 3339 timestamp
    #[argh(option, short = 'e')]
    end: Option<String>,

    /// distance between consecutive samples, such as `5m`
    #[argh(option, short = 'i')]
    interval: Option<String>,

    /// number of resources
    #[argh(option, short = 'r')]
    resources: Option<usize>,

    /// number of metrics per resource
    #[argh(option, short = 'm')]
    metrics: Option<usize>,

    /// number of samples per insert call
    #[argh(option, short = 'B')]
    batch_size: Option<usize>,

    /// stop the run after this long, such as `10m`
    #[argh(option, short = 'D')]
    duration: Option<String>,

    /// host name of the sample store
    #[argh(option, short = 'H')]
    host: Option<String>,

    /// port of the sample store
    #[argh(option, short = 'p')]
    port: Option<u16>,

    /// keyspace to write into and read from
    #[argh(option, short = 'k')]
    keyspace: Option<String>,

    /// name of the local datacenter
    #[argh(option, short = 'd')]
    datacenter: Option<String>,

    /// user name for authentication
    #[argh(option, short = 'U')]
    username: Option<String>,

    /// password for authentication
    #[argh(option, short = 'P')]
    password: Option<String>,

    /// connect to the store using TLS
    #[argh(switch)]
    tls: bool,

    /// operation to perform, either `insert` or `select`
    #[argh(positional)]
    command: String,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            concurrency: self.concurrency,
            start: self.start.clone(),
            end: self.end.clone(),
            interval: self.interval.clone(),
            num_resources: self.resources,
            num_metrics: self.metrics,
            batch_size: self.batch_size,
            duration: self.duration.clone(),
            store: StoreOverrides {
                host: self.host.clone(),
                port: self.port,
                keyspace: self.keyspace.clone(),
                datacenter: self.datacenter.clone(),
                username: self.username.clone(),
                password: self.password.clone(),
                tls: self.tls.then_some(true),
            },
        }
    }
}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    let command: Command = args.command.parse()?;
    let config = Config::load(command, args.config.as_deref(), &args.overrides())?;

    // One thread per worker, plus one for the reporter.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("tsload-rt")
        .enable_all()
        .worker_threads(config.concurrency() + 1)
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(config.logging());
    tracing::debug!(?config);

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let store =
        tsload_store::connect(config.store()).context("failed to connect to the sample store")?;

    let grid = WorkloadGrid::new(&config);
    store
        .bootstrap(grid.resources(), grid.metrics())
        .await
        .context("failed to register resources and metrics")?;

    let duration = config.duration();
    let mut dispatcher = Dispatcher::new(config, store);
    dispatcher.start()?;

    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => future::pending().await,
        }
    };

    tokio::select! {
        _ = dispatcher.finished() => tracing::info!("all workers finished"),
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted, shutting down"),
        _ = deadline => tracing::info!("run duration elapsed, shutting down"),
    }

    let result = dispatcher.shutdown().await;
    dispatcher
        .print_report()
        .context("failed to write the final report")?;
    result?;

    Ok(())
}
