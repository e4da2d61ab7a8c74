//! Calendar service configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CalendarError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Publish the calendar head this often; disabled when unset
    #[serde(default)]
    pub publication_interval_secs: Option<u64>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub paths: EndpointPaths,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to bind to
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of requests aggregated into one round
    pub max_batch_size: usize,

    /// Round interval in milliseconds
    pub batch_interval_ms: u64,
}

/// URL paths of the three service roles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointPaths {
    pub sign_path: String,
    pub extend_path: String,
    pub publications_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1000,
            batch_interval_ms: 1000,
        }
    }
}

impl Default for EndpointPaths {
    fn default() -> Self {
        Self {
            sign_path: "/signingservice".to_string(),
            extend_path: "/extendingservice".to_string(),
            publications_path: "/publications.bin".to_string(),
        }
    }
}

impl CalendarConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: CalendarConfig =
            toml::from_str(&contents).map_err(|e| CalendarError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| CalendarError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.max_batch_size == 0 {
            return Err(CalendarError::Config("max_batch_size must be positive".into()));
        }
        if self.batch.batch_interval_ms == 0 {
            return Err(CalendarError::Config("batch_interval_ms must be positive".into()));
        }
        for path in [
            &self.paths.sign_path,
            &self.paths.extend_path,
            &self.paths.publications_path,
        ] {
            if !path.starts_with('/') {
                return Err(CalendarError::Config(format!(
                    "endpoint path must start with '/': {}",
                    path
                )));
            }
        }
        Ok(())
    }
}
