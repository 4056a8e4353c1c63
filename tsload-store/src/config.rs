use std::fmt;

use secrecy::{CloneableSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};

/// Newtype around `String` that protects store credentials from accidental logging.
///
/// Use with [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    /// Returns the secret as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// The kind of store to drive.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// An in-process store, see [`InMemoryStore`](crate::InMemoryStore).
    #[default]
    Memory,
    /// A remote store spoken to over HTTP, see [`HttpStore`](crate::HttpStore).
    Http,
}

/// Compression negotiated with the remote store.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// No compression.
    #[default]
    None,
    /// Gzip-compressed responses.
    Gzip,
}

/// Connection parameters of the store under test.
///
/// These are opaque to the load generator and only interpreted by the selected [`Backend`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// The kind of store to connect to.
    ///
    /// # Default
    ///
    /// `memory`
    pub backend: Backend,

    /// Hostname of the store.
    ///
    /// # Default
    ///
    /// `localhost`
    pub host: String,

    /// Port number of the store. Must be greater than zero.
    ///
    /// # Default
    ///
    /// `9042`
    pub port: u16,

    /// Keyspace all samples are written to and read from.
    ///
    /// # Default
    ///
    /// `newts`
    pub keyspace: String,

    /// Local datacenter of the store, for backends that are datacenter aware.
    ///
    /// # Default
    ///
    /// `datacenter1`
    pub datacenter: String,

    /// Username to authenticate with. Authentication is disabled when unset.
    pub username: Option<String>,

    /// Password to authenticate with. Redacted from debug output.
    pub password: Option<SecretBox<ConfigSecret>>,

    /// Whether to connect using TLS.
    ///
    /// # Default
    ///
    /// `false`
    pub tls: bool,

    /// Compression used on the connection.
    ///
    /// # Default
    ///
    /// `none`
    pub compression: Compression,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            host: "localhost".to_owned(),
            port: 9042,
            keyspace: "newts".to_owned(),
            datacenter: "datacenter1".to_owned(),
            username: None,
            password: None,
            tls: false,
            compression: Compression::default(),
        }
    }
}

impl StoreConfig {
    /// The base URL of the store, derived from host, port and the TLS flag.
    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}
