//! Configuration of a load generation run.
//!
//! A run is configured in layers, with the following precedence (highest to lowest):
//!
//! 1. Command line flags
//! 2. Environment variables (prefixed with `TSLOAD__`)
//! 3. YAML configuration file (specified via `-c` or `--config` flag)
//! 4. Defaults
//!
//! The merged [`Settings`] are then validated into an immutable [`Config`]. Invalid values are
//! rejected with a [`ConfigError`] before any worker is started; nothing is clamped silently.
//!
//! # Environment Variables
//!
//! Environment variables use double underscores (`__`) to denote nested structures:
//!
//! - `TSLOAD__CONCURRENCY=16` sets the number of workers
//! - `TSLOAD__INTERVAL=60s` sets the sample interval
//! - `TSLOAD__STORE__HOST=cassandra.internal` sets the store host
//!
//! # YAML Configuration File
//!
//! ```yaml
//! concurrency: 16
//! interval: 60s
//! num_resources: 1000
//! store:
//!   backend: http
//!   host: cassandra.internal
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tsload_store::{StoreConfig, TimeRange};

use crate::grid;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "TSLOAD__";

/// Default start of the sample time range, in seconds since the epoch.
const DEFAULT_START_SECS: u64 = 900_000_000;

/// Default end of the sample time range, in seconds since the epoch.
const DEFAULT_END_SECS: u64 = 931_536_000;

/// Errors rejecting a configuration before a run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration source could not be read or contained malformed values.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// The command token is neither `insert` nor `select`.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// `concurrency` is zero.
    #[error("concurrency must be at least 1")]
    Concurrency,

    /// `num_resources` is zero.
    #[error("number of resources must be greater than zero")]
    NumResources,

    /// `num_metrics` is zero.
    #[error("number of metrics must be greater than zero")]
    NumMetrics,

    /// `interval` is zero.
    #[error("sample interval must be greater than zero")]
    Interval,

    /// `end` does not come after `start`.
    #[error("end time must be after start time")]
    TimeRange,

    /// `batch_size` is zero.
    #[error("batch size must be at least 1")]
    BatchSize,

    /// `shutdown_timeout` is zero.
    #[error("shutdown timeout must be greater than zero")]
    ShutdownTimeout,

    /// The store port is zero.
    #[error("store port number must be greater than zero")]
    Port,
}

/// The operation a run performs against the store.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Write the full sample grid.
    Insert,
    /// Repeatedly query the full sample grid.
    Select,
}

impl FromStr for Command {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            s if s.eq_ignore_ascii_case("insert") => Ok(Command::Insert),
            s if s.eq_ignore_ascii_case("select") => Ok(Command::Select),
            s => Err(ConfigError::UnknownCommand(s.to_owned())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Insert => f.write_str("insert"),
            Command::Select => f.write_str("select"),
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO  stresstest::dispatcher > starting workers
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2020-12-04T12:10:32Z [stresstest::dispatcher] INFO: starting workers
    /// ```
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// Logging configuration.
///
/// Logs are always written to stderr, so they never interleave with reports on stdout.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable provides more granular control per module if needed.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `TSLOAD__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `Auto` (pretty for TTY, simplified otherwise)
    ///
    /// # Environment Variable
    ///
    /// `TSLOAD__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Raw run parameters as merged from all configuration sources.
///
/// These are not validated yet; use [`Config::from_settings`] to turn them into a [`Config`].
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Number of concurrent workers.
    ///
    /// # Default
    ///
    /// `4`
    pub concurrency: usize,

    /// Timestamp of the first sample, as an RFC 3339 timestamp.
    ///
    /// # Default
    ///
    /// `1998-07-09T16:00:00Z`
    #[serde(with = "humantime_serde")]
    pub start: SystemTime,

    /// Exclusive end of the sample time range, as an RFC 3339 timestamp.
    ///
    /// # Default
    ///
    /// `1999-07-09T16:00:00Z`
    #[serde(with = "humantime_serde")]
    pub end: SystemTime,

    /// Time between two successive samples of a series.
    ///
    /// # Default
    ///
    /// `5m`
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Number of resources in the grid.
    ///
    /// # Default
    ///
    /// `1`
    pub num_resources: usize,

    /// Number of metrics per resource.
    ///
    /// # Default
    ///
    /// `1`
    pub num_metrics: usize,

    /// Retention of written samples. Zero keeps samples forever.
    ///
    /// # Default
    ///
    /// `1day`
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Number of samples submitted with a single insert call.
    ///
    /// # Default
    ///
    /// `100`
    pub batch_size: usize,

    /// Wall-clock limit of the run. Select runs go on until interrupted when unset.
    ///
    /// # Default
    ///
    /// Unlimited
    #[serde(
        with = "humantime_serde",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<Duration>,

    /// Total time shutdown waits for all workers to finish their current operations.
    ///
    /// # Default
    ///
    /// `30s`
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Connection parameters of the store under test.
    pub store: StoreConfig,

    /// Logging configuration.
    pub logging: Logging,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            start: SystemTime::UNIX_EPOCH + Duration::from_secs(DEFAULT_START_SECS),
            end: SystemTime::UNIX_EPOCH + Duration::from_secs(DEFAULT_END_SECS),
            interval: Duration::from_secs(300),
            num_resources: 1,
            num_metrics: 1,
            ttl: Duration::from_secs(86400),
            batch_size: 100,
            duration: None,
            shutdown_timeout: Duration::from_secs(30),
            store: StoreConfig::default(),
            logging: Logging::default(),
        }
    }
}

/// Values given on the command line, taking precedence over all other sources.
///
/// Timestamps and durations are kept as text and parsed along with the other sources.
#[derive(Debug, Default, Serialize)]
pub struct Overrides {
    /// See [`Settings::concurrency`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    /// See [`Settings::start`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// See [`Settings::end`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    /// See [`Settings::interval`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// See [`Settings::num_resources`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_resources: Option<usize>,
    /// See [`Settings::num_metrics`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_metrics: Option<usize>,
    /// See [`Settings::batch_size`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// See [`Settings::duration`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    /// Store connection values.
    pub store: StoreOverrides,
}

/// Store connection values given on the command line.
#[derive(Debug, Default, Serialize)]
pub struct StoreOverrides {
    /// See [`StoreConfig::host`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// See [`StoreConfig::port`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// See [`StoreConfig::keyspace`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyspace: Option<String>,
    /// See [`StoreConfig::datacenter`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,
    /// See [`StoreConfig::username`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// See [`StoreConfig::password`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// See [`StoreConfig::tls`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<bool>,
}

/// Validated, immutable parameters of a run.
#[derive(Clone, Debug)]
pub struct Config {
    command: Command,
    concurrency: usize,
    start: SystemTime,
    end: SystemTime,
    interval: Duration,
    num_resources: usize,
    num_metrics: usize,
    ttl: Duration,
    batch_size: usize,
    duration: Option<Duration>,
    shutdown_timeout: Duration,
    store: StoreConfig,
    logging: Logging,
}

impl Config {
    /// Loads and validates the configuration of a run.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if `path` is given)
    /// 3. Environment variables (prefixed with `TSLOAD__`)
    /// 4. Command line `overrides`
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The YAML configuration file cannot be read or parsed
    /// - Environment variables or overrides contain malformed values
    /// - Any value fails validation, see [`Config::from_settings`]
    pub fn load(
        command: Command,
        path: Option<&Path>,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let settings = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()
            .map_err(Box::new)?;

        Self::from_settings(command, settings)
    }

    /// Validates raw settings into a configuration for the given command.
    pub fn from_settings(command: Command, settings: Settings) -> Result<Self, ConfigError> {
        if settings.concurrency < 1 {
            return Err(ConfigError::Concurrency);
        }
        if settings.num_resources < 1 {
            return Err(ConfigError::NumResources);
        }
        if settings.num_metrics < 1 {
            return Err(ConfigError::NumMetrics);
        }
        if settings.interval.is_zero() {
            return Err(ConfigError::Interval);
        }
        if settings.end <= settings.start {
            return Err(ConfigError::TimeRange);
        }
        if settings.batch_size < 1 {
            return Err(ConfigError::BatchSize);
        }
        if settings.shutdown_timeout.is_zero() {
            return Err(ConfigError::ShutdownTimeout);
        }
        if settings.store.port == 0 {
            return Err(ConfigError::Port);
        }

        Ok(Self {
            command,
            concurrency: settings.concurrency,
            start: settings.start,
            end: settings.end,
            interval: settings.interval,
            num_resources: settings.num_resources,
            num_metrics: settings.num_metrics,
            ttl: settings.ttl,
            batch_size: settings.batch_size,
            duration: settings.duration,
            shutdown_timeout: settings.shutdown_timeout,
            store: settings.store,
            logging: settings.logging,
        })
    }

    /// The operation this run performs.
    pub fn command(&self) -> Command {
        self.command
    }

    /// Number of workers.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Timestamp of the first sample.
    pub fn start(&self) -> SystemTime {
        self.start
    }

    /// Exclusive end of the sample timestamps.
    pub fn end(&self) -> SystemTime {
        self.end
    }

    /// The sample time range, `[start, end)`.
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.start, self.end)
    }

    /// Time between two successive samples of a series.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Staleness threshold of a series, always twice the sample interval.
    pub fn heartbeat(&self) -> Duration {
        self.interval * 2
    }

    /// Number of resources in the grid.
    pub fn num_resources(&self) -> usize {
        self.num_resources
    }

    /// Number of metrics per resource.
    pub fn num_metrics(&self) -> usize {
        self.num_metrics
    }

    /// Identifiers of all resources, `r0` to `r<n-1>`.
    pub fn resources(&self) -> Vec<String> {
        grid::resources(self.num_resources)
    }

    /// Names of all metrics, `m0` to `m<n-1>`.
    pub fn metrics(&self) -> Vec<String> {
        grid::metrics(self.num_metrics)
    }

    /// Retention of written samples.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of samples submitted with a single insert call.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Wall-clock limit of the run, if any.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Total time shutdown waits for all workers.
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Connection parameters of the store under test.
    pub fn store(&self) -> &StoreConfig {
        &self.store
    }

    /// Logging configuration.
    pub fn logging(&self) -> &Logging {
        &self.logging
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use secrecy::ExposeSecret;
    use tsload_store::Backend;

    use super::*;

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::from_settings(Command::Insert, settings()).unwrap();

        assert_eq!(config.command(), Command::Insert);
        assert_eq!(config.concurrency(), 4);
        assert_eq!(config.interval(), Duration::from_secs(300));
        assert_eq!(config.ttl(), Duration::from_secs(86400));
        assert_eq!(config.store().port, 9042);
        assert_eq!(config.store().keyspace, "newts");
    }

    #[test]
    fn parses_commands_case_insensitively() {
        assert_eq!("insert".parse::<Command>().unwrap(), Command::Insert);
        assert_eq!("SELECT".parse::<Command>().unwrap(), Command::Select);

        let err = "delete".parse::<Command>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCommand(ref token) if token == "delete"));
        assert_eq!(err.to_string(), "unknown command: delete");
    }

    #[test]
    fn rejects_invalid_values() {
        let cases: [(fn(&mut Settings), fn(&ConfigError) -> bool); 8] = [
            (|s| s.concurrency = 0, |e| matches!(e, ConfigError::Concurrency)),
            (|s| s.num_resources = 0, |e| matches!(e, ConfigError::NumResources)),
            (|s| s.num_metrics = 0, |e| matches!(e, ConfigError::NumMetrics)),
            (|s| s.interval = Duration::ZERO, |e| matches!(e, ConfigError::Interval)),
            (|s| s.end = s.start, |e| matches!(e, ConfigError::TimeRange)),
            (|s| s.batch_size = 0, |e| matches!(e, ConfigError::BatchSize)),
            (
                |s| s.shutdown_timeout = Duration::ZERO,
                |e| matches!(e, ConfigError::ShutdownTimeout),
            ),
            (|s| s.store.port = 0, |e| matches!(e, ConfigError::Port)),
        ];

        for (modify, expected) in cases {
            let mut settings = settings();
            modify(&mut settings);
            let err = Config::from_settings(Command::Select, settings).unwrap_err();
            assert!(expected(&err), "unexpected error: {err}");
        }
    }

    #[test]
    fn heartbeat_is_twice_the_interval() {
        for secs in [1, 7, 60, 300, 86400] {
            let settings = Settings {
                interval: Duration::from_secs(secs),
                ..settings()
            };
            let config = Config::from_settings(Command::Insert, settings).unwrap();
            assert_eq!(config.heartbeat(), Duration::from_secs(secs * 2));
        }

        let settings = Settings {
            interval: Duration::from_millis(1500),
            ..settings()
        };
        let config = Config::from_settings(Command::Insert, settings).unwrap();
        assert_eq!(config.heartbeat(), Duration::from_secs(3));
    }

    #[test]
    fn identifiers_are_stable() {
        let settings = Settings {
            num_resources: 3,
            num_metrics: 2,
            ..settings()
        };
        let config = Config::from_settings(Command::Insert, settings).unwrap();

        assert_eq!(config.resources(), ["r0", "r1", "r2"]);
        assert_eq!(config.metrics(), ["m0", "m1"]);
        assert_eq!(config.resources(), config.resources());
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("TSLOAD__CONCURRENCY", "16");
            jail.set_env("TSLOAD__INTERVAL", "1m");
            jail.set_env("TSLOAD__NUM_RESOURCES", "100");
            jail.set_env("TSLOAD__STORE__BACKEND", "http");
            jail.set_env("TSLOAD__STORE__HOST", "store.internal");
            jail.set_env("TSLOAD__STORE__PASSWORD", "hunter2");
            jail.set_env("TSLOAD__LOGGING__LEVEL", "debug");

            let config = Config::load(Command::Insert, None, &Overrides::default()).unwrap();

            assert_eq!(config.concurrency(), 16);
            assert_eq!(config.interval(), Duration::from_secs(60));
            assert_eq!(config.num_resources(), 100);
            assert_eq!(config.store().backend, Backend::Http);
            assert_eq!(config.store().host, "store.internal");
            let password = config.store().password.as_ref().unwrap();
            assert_eq!(password.expose_secret().as_str(), "hunter2");
            assert_eq!(config.logging().level, LevelFilter::DEBUG);

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            concurrency: 8
            start: 2001-09-09T01:46:40Z
            end: 2001-09-10T01:46:40Z
            interval: 10s
            num_metrics: 5
            duration: 2m
            store:
                keyspace: stress
                tls: true
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config =
                Config::load(Command::Select, Some(tempfile.path()), &Overrides::default())
                    .unwrap();

            let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000);
            assert_eq!(config.concurrency(), 8);
            assert_eq!(config.start(), start);
            assert_eq!(config.end(), start + Duration::from_secs(86400));
            assert_eq!(config.interval(), Duration::from_secs(10));
            assert_eq!(config.num_metrics(), 5);
            assert_eq!(config.duration(), Some(Duration::from_secs(120)));
            assert_eq!(config.store().keyspace, "stress");
            assert!(config.store().tls);

            Ok(())
        });
    }

    #[test]
    fn overrides_take_precedence() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            concurrency: 8
            num_resources: 10
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("TSLOAD__CONCURRENCY", "12");
            jail.set_env("TSLOAD__NUM_RESOURCES", "20");

            let overrides = Overrides {
                concurrency: Some(2),
                interval: Some("30s".into()),
                store: StoreOverrides {
                    port: Some(9160),
                    ..Default::default()
                },
                ..Default::default()
            };
            let config =
                Config::load(Command::Insert, Some(tempfile.path()), &overrides).unwrap();

            // Env overwrites the yaml config, flags overwrite both.
            assert_eq!(config.num_resources(), 20);
            assert_eq!(config.concurrency(), 2);
            assert_eq!(config.interval(), Duration::from_secs(30));
            assert_eq!(config.store().port, 9160);

            Ok(())
        });
    }

    #[test]
    fn malformed_values_fail_to_load() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("TSLOAD__INTERVAL", "often");

            let err = Config::load(Command::Insert, None, &Overrides::default()).unwrap_err();
            assert!(matches!(err, ConfigError::Load(_)));

            Ok(())
        });
    }

    #[test]
    fn validation_applies_after_loading() {
        figment::Jail::expect_with(|_jail| {
            let overrides = Overrides {
                concurrency: Some(0),
                ..Default::default()
            };

            let err = Config::load(Command::Insert, None, &overrides).unwrap_err();
            assert!(matches!(err, ConfigError::Concurrency));

            Ok(())
        });
    }
}
