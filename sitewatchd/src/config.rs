use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{bail, Context, Result};

/// Environment variable that overrides `inventory.token`
pub const TOKEN_ENV: &str = "SITEWATCH_API_TOKEN";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub checker: CheckerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_inventory_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Run the server correlation pass at the end of every cycle
    #[serde(default)]
    pub correlate_after_cycle: bool,
    #[serde(default = "default_min_group_size")]
    pub min_group_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckerConfig {
    #[serde(default = "default_first_timeout")]
    pub first_timeout_ms: u64,
    #[serde(default = "default_retry_timeout")]
    pub retry_timeout_ms: u64,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Response bodies are truncated to this many bytes before classification
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub retries: RetryBudgets,
}

/// Extra attempts allowed per retryable error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryBudgets {
    #[serde(default)]
    pub timeout: u32,
    #[serde(default = "default_one")]
    pub connection_reset: u32,
    #[serde(default = "default_one")]
    pub upstream_5xx: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_inventory_timeout() -> u64 {
    15
}

fn default_interval() -> u64 {
    300
}

fn default_batch_size() -> usize {
    100
}

fn default_min_group_size() -> usize {
    2
}

fn default_first_timeout() -> u64 {
    12_000
}

fn default_retry_timeout() -> u64 {
    10_000
}

fn default_retry_delay() -> u64 {
    1_500
}

fn default_max_redirects() -> usize {
    5
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36".to_string()
}

fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_one() -> u32 {
    1
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/sitewatch/down.db")
}

fn default_listen() -> String {
    "127.0.0.1:8090".to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            batch_size: default_batch_size(),
            correlate_after_cycle: false,
            min_group_size: default_min_group_size(),
        }
    }
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            first_timeout_ms: default_first_timeout(),
            retry_timeout_ms: default_retry_timeout(),
            retry_delay_ms: default_retry_delay(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
            max_body_bytes: default_max_body_bytes(),
            retries: RetryBudgets::default(),
        }
    }
}

impl Default for RetryBudgets {
    fn default() -> Self {
        Self {
            timeout: 0,
            connection_reset: default_one(),
            upstream_5xx: default_one(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if let Ok(token) = std::env::var(TOKEN_ENV) {
            config.inventory.token = token;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.inventory.url.trim().is_empty() {
            bail!("inventory.url must not be empty");
        }
        if self.inventory.token.trim().is_empty() {
            bail!("inventory.token is empty; set it in the config or via {}", TOKEN_ENV);
        }
        if self.monitor.batch_size == 0 {
            bail!("monitor.batch_size must be at least 1");
        }
        if self.monitor.interval_secs == 0 {
            bail!("monitor.interval_secs must be at least 1");
        }
        Ok(())
    }
}
