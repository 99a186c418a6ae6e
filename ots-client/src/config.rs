//! Client configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::RetryConfig;
use crate::{ClientError, Result};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "OTS_CONFIG";

/// Environment variable holding the Bitcoin node RPC password
pub const RPC_PASSWORD_ENV: &str = "OTS_RPC_PASSWORD";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Calendars digests are submitted to
    pub calendars: Vec<String>,

    /// Submission fails unless at least this many calendars answer
    pub min_calendar_responses: usize,

    /// Calendars the upgrader may follow pending attestations to
    pub whitelist: Vec<String>,

    /// Esplora-compatible explorer base URLs
    pub explorers: Vec<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Local node, preferred over the explorers when set
    pub bitcoin_node: Option<BitcoinNodeConfig>,

    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitcoinNodeConfig {
    pub url: String,

    #[serde(default)]
    pub user: Option<String>,

    /// Read from `OTS_RPC_PASSWORD` when absent
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            calendars: vec![
                "https://a.pool.opentimestamps.org".to_string(),
                "https://b.pool.opentimestamps.org".to_string(),
                "https://a.pool.eternitywall.com".to_string(),
                "https://ots.btc.catallaxy.com".to_string(),
            ],
            min_calendar_responses: 2,
            whitelist: vec![
                "https://*.calendar.opentimestamps.org".to_string(),
                "https://*.calendar.eternitywall.com".to_string(),
                "https://*.calendar.catallaxy.com".to_string(),
            ],
            explorers: vec![
                "https://blockstream.info/api".to_string(),
                "https://mempool.space/api".to_string(),
            ],
            timeout_secs: 10,
            bitcoin_node: None,
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            max_retries: retry.max_retries,
            initial_backoff_ms: retry.initial_backoff.as_millis() as u64,
            max_backoff_ms: retry.max_backoff.as_millis() as u64,
            backoff_multiplier: retry.backoff_multiplier,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            backoff_multiplier: settings.backoff_multiplier,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let mut config: ClientConfig = toml::from_str(&contents)
            .map_err(|e| ClientError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        // Load the RPC password from the environment if not set
        if let Some(node) = config.bitcoin_node.as_mut() {
            if node.password.is_none() {
                node.password = std::env::var(RPC_PASSWORD_ENV).ok();
            }
        }

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ClientError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)
            .map_err(|e| ClientError::Config(format!("Failed to write {}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Load from `path`, else from `OTS_CONFIG`, else use the defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        match path {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
