//! Contains a store implementation using JSON over HTTP.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};

use crate::config::{Compression, ConfigSecret, StoreConfig};
use crate::error::{Result, StoreError};
use crate::{Measurement, Sample, SampleStore, TimeRange};

/// A remote sample store reached over HTTP.
///
/// Samples are written with `POST {base}/{keyspace}/samples` and read back with
/// `GET {base}/{keyspace}/samples/{resource}`, which returns rows of samples grouped by
/// timestamp.
#[derive(Debug)]
pub struct HttpStore {
    client: Client,
    samples_url: String,
    username: Option<String>,
    password: Option<SecretBox<ConfigSecret>>,
}

impl HttpStore {
    /// Creates a new `HttpStore` for the given connection parameters.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .gzip(config.compression == Compression::Gzip)
            .user_agent(concat!("tsload/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            samples_url: format!("{}/{}/samples", config.base_url(), config.keyspace),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn authenticate(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(username) => {
                let password = self.password.as_ref().map(|p| p.expose_secret().as_str());
                request.basic_auth(username, password)
            }
            None => request,
        }
    }
}

#[async_trait::async_trait]
impl SampleStore for HttpStore {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn insert(&self, samples: Vec<Sample>, ttl: Duration) -> Result<()> {
        let body = samples
            .iter()
            .map(WireSample::try_from)
            .collect::<Result<Vec<_>>>()?;

        let request = self
            .client
            .post(&self.samples_url)
            .query(&[("ttl", ttl.as_secs())])
            .json(&body);

        self.authenticate(request)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    async fn select(
        &self,
        resource: &str,
        metric: &str,
        range: TimeRange,
    ) -> Result<Vec<Measurement>> {
        let start = epoch_millis(range.start)?;
        let end = epoch_millis(range.end)?;

        let request = self
            .client
            .get(format!("{}/{resource}", self.samples_url))
            .query(&[("start", start), ("end", end)]);

        let rows: Vec<Vec<WireSample>> = self
            .authenticate(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut measurements: Vec<_> = rows
            .into_iter()
            .flatten()
            .filter(|sample| sample.name == metric)
            .map(|sample| Measurement {
                timestamp: UNIX_EPOCH + Duration::from_millis(sample.timestamp),
                value: sample.value,
            })
            .filter(|m| range.contains(m.timestamp))
            .collect();
        measurements.sort_by_key(|m| m.timestamp);

        Ok(measurements)
    }
}

/// JSON representation of a sample on the wire.
#[derive(Debug, Deserialize, Serialize, PartialEq)]
struct WireSample {
    resource: WireResource,
    name: String,
    /// Milliseconds since the epoch.
    timestamp: u64,
    #[serde(rename = "type")]
    kind: String,
    value: f64,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
struct WireResource {
    id: String,
}

impl TryFrom<&Sample> for WireSample {
    type Error = StoreError;

    fn try_from(sample: &Sample) -> Result<Self> {
        Ok(Self {
            resource: WireResource {
                id: sample.resource.clone(),
            },
            name: sample.metric.clone(),
            timestamp: epoch_millis(sample.timestamp)?,
            kind: "GAUGE".to_owned(),
            value: sample.value,
        })
    }
}

fn epoch_millis(timestamp: SystemTime) -> Result<u64> {
    let since_epoch = timestamp
        .duration_since(UNIX_EPOCH)
        .map_err(|_| StoreError::Rejected("timestamp before the unix epoch".into()))?;
    Ok(since_epoch.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_url_includes_keyspace() {
        let config = StoreConfig {
            host: "store.internal".into(),
            port: 8080,
            keyspace: "stress".into(),
            ..Default::default()
        };

        let store = HttpStore::new(&config).unwrap();
        assert_eq!(store.samples_url, "http://store.internal:8080/stress/samples");
    }

    #[test]
    fn serializes_gauge_samples() {
        let sample = Sample {
            resource: "r1".into(),
            metric: "m0".into(),
            timestamp: UNIX_EPOCH + Duration::from_secs(900_000_000),
            value: 42.5,
        };

        let wire = WireSample::try_from(&sample).unwrap();
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "resource": {"id": "r1"},
                "name": "m0",
                "timestamp": 900_000_000_000u64,
                "type": "GAUGE",
                "value": 42.5,
            })
        );
    }

    #[test]
    fn rejects_timestamps_before_epoch() {
        let timestamp = UNIX_EPOCH - Duration::from_secs(1);
        assert!(matches!(
            epoch_millis(timestamp),
            Err(StoreError::Rejected(_))
        ));
    }
}
