use anyhow::{anyhow, Context, Result};
use dirs::config_dir;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable consulted when no API key is passed explicitly
pub const API_KEY_ENV: &str = "BACKLOG_API_KEY";

/// Hard per-request cap enforced by the Backlog API
pub const MAX_PAGE_SIZE: usize = 100;

/// Main configuration structure for backlog-exporter
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Remote API access settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Client-side request throttling
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote API configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// URL scheme used to reach `<domain>/api/v2`
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Items requested per list call (clamped to 1..=100)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Upper bound on issues fetched by a single sync
    #[serde(default = "default_max_count")]
    pub max_count: usize,
}

/// Rate limiter configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    /// Pause after every N outbound requests
    #[serde(default = "default_requests_per_pause")]
    pub requests_per_pause: u64,

    /// Length of each pause in seconds
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_scheme() -> String {
    "https".to_string()
}
fn default_page_size() -> usize {
    MAX_PAGE_SIZE
}
fn default_max_count() -> usize {
    5000
}
fn default_requests_per_pause() -> u64 {
    100
}
fn default_cooldown_secs() -> u64 {
    15
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            page_size: default_page_size(),
            max_count: default_max_count(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_pause: default_requests_per_pause(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RateLimitConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl ApiConfig {
    /// Page size actually sent to the server
    pub fn effective_page_size(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

impl Config {
    /// Load configuration from the default location, falling back to defaults
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            debug!("No configuration at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("backlog-exporter").join("config.yml"))
    }

    /// Issue cap for one sync: explicit `--count` wins over the config file
    pub fn max_count(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.api.max_count)
    }
}

/// Resolve the API key: explicit value first, then `BACKLOG_API_KEY`
pub fn resolve_api_key(provided: Option<&str>) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    match env::var(API_KEY_ENV) {
        Ok(key) if !key.is_empty() => {
            info!("Using API key from the {} environment variable", API_KEY_ENV);
            Ok(key)
        }
        _ => Err(anyhow!(
            "API key not found. Pass --api-key or set the {} environment variable",
            API_KEY_ENV
        )),
    }
}

/// Expand `~` and environment variables in a user-supplied path
pub fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded =
        shellexpand::full(raw).with_context(|| format!("Failed to expand path: {}", raw))?;
    Ok(PathBuf::from(expanded.as_ref()))
}
