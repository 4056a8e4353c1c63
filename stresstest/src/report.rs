//! Rendering of metric snapshots and the periodic reporter.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use yansi::Paint;

use crate::metrics::{MetricsRegistry, Snapshot, TimerSnapshot};

/// Cadence of the periodic report.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// A shared output sink for reports.
///
/// Whole reports are written under a lock, so periodic and on-demand reports never interleave.
#[derive(Clone)]
pub struct ReportWriter(Arc<Mutex<Box<dyn Write + Send>>>);

impl ReportWriter {
    /// Creates a writer reporting to the given sink.
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(sink))))
    }

    /// Creates a writer reporting to standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Takes a snapshot of the registry and writes it out.
    pub fn report(&self, registry: &MetricsRegistry) -> io::Result<()> {
        let snapshot = registry.snapshot();

        let mut buffer = Vec::new();
        render(&snapshot, SystemTime::now(), &mut buffer)?;

        let mut sink = self.0.lock().unwrap();
        sink.write_all(&buffer)?;
        sink.flush()
    }
}

impl std::fmt::Debug for ReportWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ReportWriter").finish_non_exhaustive()
    }
}

/// Writes a human-readable rendition of the snapshot.
///
/// Every metric is listed with its count and mean rate; timers additionally list their latency
/// distribution.
pub fn render(snapshot: &Snapshot, now: SystemTime, out: &mut impl Write) -> io::Result<()> {
    writeln!(
        out,
        "{} {} (elapsed {:.2?})",
        "# REPORT".bold(),
        humantime::format_rfc3339_seconds(now),
        snapshot.elapsed
    )?;

    if !snapshot.timers.is_empty() {
        writeln!(out)?;
        writeln!(out, "{}", "## TIMERS".bold())?;
        for (name, timer) in &snapshot.timers {
            render_timer(name, timer, out)?;
        }
    }

    if !snapshot.counters.is_empty() {
        writeln!(out)?;
        writeln!(out, "{}", "## COUNTERS".bold())?;
        for (name, counter) in &snapshot.counters {
            let label = if name.ends_with(".failures") && counter.count > 0 {
                name.bold().red().to_string()
            } else {
                name.bold().green().to_string()
            };
            writeln!(
                out,
                "{label}: {} ({:.2}/s)",
                counter.count.bold(),
                counter.rate
            )?;
        }
    }

    writeln!(out)
}

fn render_timer(name: &str, timer: &TimerSnapshot, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "{} ({} ops)", name.bold().green(), timer.count.bold())?;
    writeln!(out, "  {:.2} operations/s", timer.rate.bold())?;
    if timer.count > 0 {
        writeln!(
            out,
            "  avg: {:.2?}; p50: {:.2?}; p90: {:.2?}; p99: {:.2?}; max: {:.2?}",
            timer.mean.bold(),
            timer.p50,
            timer.p90,
            timer.p99,
            timer.max
        )?;
    }
    Ok(())
}

/// A background task reporting the registry at a fixed cadence.
#[derive(Debug)]
pub struct Reporter {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl Reporter {
    /// Spawns the reporter. The first report is written one `period` after spawning.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(registry: Arc<MetricsRegistry>, writer: ReportWriter, period: Duration) -> Self {
        let stop = CancellationToken::new();
        let token = stop.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(error) = writer.report(&registry) {
                            tracing::warn!(error = &error as &dyn std::error::Error, "failed to write report");
                        }
                    }
                }
            }

            tracing::debug!("reporter stopped");
        });

        Self { stop, handle }
    }

    /// Signals the reporter to stop without waiting for it.
    pub fn cancel(&self) {
        self.stop.cancel();
    }

    /// Stops the reporter and waits until it has exited.
    ///
    /// No report is written after this returns.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(error) = self.handle.await {
            tracing::error!(error = &error as &dyn std::error::Error, "reporter task failed");
        }
    }
}
