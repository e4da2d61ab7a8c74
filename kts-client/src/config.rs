//! Client configuration

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::client::RetryConfig;
use crate::publications::PinMode;
use crate::tls::TlsOptions;
use crate::{ClientError, Result};
use kts_types::PublicKey;

pub const DEFAULT_SIGN_PATH: &str = "/signingservice";
pub const DEFAULT_EXTEND_PATH: &str = "/extendingservice";
pub const DEFAULT_PUBLICATIONS_PATH: &str = "/publications.bin";

/// A resolved service URL.
///
/// The port is always explicit: 80 for `http`, 443 for `https` unless given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceEndpoint {
    scheme: String,
    host: String,
    port: u16,
    path: String,
}

impl ServiceEndpoint {
    pub fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri)
            .map_err(|e| ClientError::Config(format!("invalid service URL {:?}: {}", uri, e)))?;

        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(ClientError::Config(format!(
                "unsupported scheme {:?} in {}",
                scheme, uri
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ClientError::Config(format!("missing host in {}", uri)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ClientError::Config(format!("missing port in {}", uri)))?;

        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
            path,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == "https"
    }

    pub fn url(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }
}

impl FromStr for ServiceEndpoint {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ServiceEndpoint {
    type Error = ClientError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ServiceEndpoint> for String {
    fn from(endpoint: ServiceEndpoint) -> Self {
        endpoint.to_string()
    }
}

/// Retry settings as they appear in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        RetryConfig {
            max_retries: settings.max_retries,
            initial_backoff: std::time::Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: std::time::Duration::from_millis(settings.max_backoff_ms),
            ..RetryConfig::default()
        }
    }
}

/// Client configuration, usually loaded from `kts.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub signing_url: ServiceEndpoint,
    pub extending_url: ServiceEndpoint,
    pub publications_url: ServiceEndpoint,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Hex-encoded publications key to pin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publications_key: Option<String>,

    /// Pin the first publications key seen (ignored when a key is pinned)
    #[serde(default)]
    pub trust_on_first_use: bool,

    /// Directory of the local token store
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySettings>,

    #[serde(default)]
    pub tls: TlsOptions,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".kts")
}

impl Default for ClientConfig {
    fn default() -> Self {
        let local = |path: &str| ServiceEndpoint {
            scheme: "http".to_string(),
            host: "localhost".to_string(),
            port: 8080,
            path: path.to_string(),
        };
        Self {
            signing_url: local(DEFAULT_SIGN_PATH),
            extending_url: local(DEFAULT_EXTEND_PATH),
            publications_url: local(DEFAULT_PUBLICATIONS_PATH),
            timeout_secs: default_timeout_secs(),
            publications_key: None,
            trust_on_first_use: false,
            storage_dir: default_storage_dir(),
            retry: None,
            tls: TlsOptions::default(),
        }
    }
}

impl ClientConfig {
    /// Endpoints on one host at the calendar's default paths
    pub fn for_base_url(base: &str) -> Result<Self> {
        let base = base.trim_end_matches('/');
        let endpoint = |path: &str| ServiceEndpoint::parse(&format!("{}{}", base, path));
        Ok(Self {
            signing_url: endpoint(DEFAULT_SIGN_PATH)?,
            extending_url: endpoint(DEFAULT_EXTEND_PATH)?,
            publications_url: endpoint(DEFAULT_PUBLICATIONS_PATH)?,
            ..Self::default()
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ClientError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ClientError::Config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, contents).map_err(|e| {
            ClientError::Config(format!("failed to write {}: {}", path.display(), e))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(ClientError::Config("timeout_secs must be > 0".to_string()));
        }
        self.pin_mode()?;
        Ok(())
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    pub fn pin_mode(&self) -> Result<PinMode> {
        match (&self.publications_key, self.trust_on_first_use) {
            (Some(hex), _) => {
                let key = PublicKey::from_hex(hex).map_err(|e| {
                    ClientError::Config(format!("invalid publications_key: {}", e))
                })?;
                Ok(PinMode::Pinned(key))
            }
            (None, true) => Ok(PinMode::TrustOnFirstUse),
            (None, false) => Ok(PinMode::None),
        }
    }

    pub fn retry_config(&self) -> Option<RetryConfig> {
        self.retry.as_ref().map(RetryConfig::from)
    }
}
