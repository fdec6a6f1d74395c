use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_WAIT_TIMES_URL: &str = "https://www.dmv.ca.gov/wasapp/webdata/output3.txt";
pub const DEFAULT_OFFICES_URL: &str =
    "https://www.dmv.ca.gov/wasapp/webdata/foims_offices_min.json";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// SQLite connection string, e.g. `sqlite://cadmv.db`
    pub database_url: String,
    #[serde(default = "default_wait_times_url")]
    pub wait_times_url: String,
    #[serde(default = "default_offices_url")]
    pub offices_url: String,
    /// The DMV endpoints are slow; keep this short so a run never hangs.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

fn default_wait_times_url() -> String {
    DEFAULT_WAIT_TIMES_URL.to_string()
}

fn default_offices_url() -> String {
    DEFAULT_OFFICES_URL.to_string()
}

fn default_fetch_timeout_ms() -> u64 {
    1000
}

fn default_poll_interval_secs() -> u64 {
    120
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if config.fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "fetch_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if config.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}
