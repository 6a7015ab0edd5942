//! Configuration file parsing and structures.
//!
//! gated uses TOML for declarative configuration. Each configured cover is a
//! BFT u-Control cloud gate; per-cover settings control request timeouts and
//! retry behaviour for the polling controller.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tracing_subscriber::filter::LevelFilter;

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default number of retries per poll/command cycle.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Optional HTTP status API
    #[serde(default)]
    pub api: Option<ApiConfig>,

    pub integrations: IntegrationsConfig,
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,
}

/// HTTP status API configuration
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    /// Address to listen on (e.g., "127.0.0.1")
    pub listen: String,

    /// Port to listen on
    pub port: u16,
}

/// Integration configuration container
#[derive(Debug, Deserialize)]
pub struct IntegrationsConfig {
    /// BFT u-Control cloud integration
    #[serde(default)]
    pub bft: Option<BftConfig>,
}

/// BFT integration configuration
///
/// Key = cover slug (used to form the entity id), value = per-cover settings.
#[derive(Debug, Deserialize)]
pub struct BftConfig {
    pub covers: HashMap<String, CoverConfig>,
}

/// Per-cover configuration for a BFT cloud gate
#[derive(Debug, Clone, Deserialize)]
pub struct CoverConfig {
    /// Device name as registered in the vendor cloud
    pub device: String,

    /// Cloud account username
    pub username: String,

    /// Cloud account password
    pub password: String,

    /// Human-readable name (defaults to the device name)
    #[serde(default)]
    pub name: Option<String>,

    /// Per-request timeout in seconds (must be > 0)
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Max retries per poll/command cycle
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Defer the first status poll by one throttle interval
    #[serde(default)]
    pub skip_initial_update: bool,
}

impl CoverConfig {
    /// Per-request deadline as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Display name, falling back to the device name.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.device)
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        let config: Config = toml::from_str(&contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(bft) = &self.integrations.bft {
            if bft.covers.is_empty() {
                return Err(ConfigError::Validation(
                    "integrations.bft.covers must contain at least one cover".to_string(),
                ));
            }

            for (slug, cover) in &bft.covers {
                if cover.timeout == 0 {
                    return Err(ConfigError::Validation(format!(
                        "integrations.bft.covers.{}.timeout must be > 0",
                        slug
                    )));
                }
                if cover.device.is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "integrations.bft.covers.{}.device must not be empty",
                        slug
                    )));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(std::path::PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}
