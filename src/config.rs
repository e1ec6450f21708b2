//! Configuration management for Clubgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::error::{ClubgateError, Result};

/// Prefix for environment overrides, e.g. `CLUBGATE__SERVER__ADDR`.
const ENV_PREFIX: &str = "CLUBGATE";

/// Main configuration for the Clubgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClubgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Admission control configuration
    #[serde(default)]
    pub admission: AdmissionConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
        }
    }
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Logging configuration.
///
/// None of these settings change admission decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,

    /// Log every denial at info level instead of debug
    #[serde(default)]
    pub verbose_admission: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            verbose_admission: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Admission control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Path to a YAML route rules file; the built-in rules apply when unset
    #[serde(default)]
    pub rules_path: Option<String>,

    /// Requests under this prefix are rate limited at the edge
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Path prefixes that bypass admission control entirely
    #[serde(default = "default_excluded_prefixes")]
    pub excluded_prefixes: Vec<String>,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`
    #[serde(default = "default_true")]
    pub trust_forwarded_for: bool,

    /// How often expired counters are swept, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Send `Strict-Transport-Security`
    #[serde(default = "default_true")]
    pub hsts: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            api_prefix: default_api_prefix(),
            excluded_prefixes: default_excluded_prefixes(),
            trust_forwarded_for: true,
            sweep_interval_secs: default_sweep_interval(),
            hsts: true,
        }
    }
}

fn default_api_prefix() -> String {
    "/api".to_string()
}

fn default_excluded_prefixes() -> Vec<String> {
    [
        "/_next/",
        "/static/",
        "/assets/",
        "/favicon.ico",
        "/robots.txt",
        "/api/auth/session",
        "/api/auth/callback",
        "/api/auth/csrf",
        "/api/auth/providers",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    60
}

impl ClubgateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClubgateConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file with `CLUBGATE__*`
    /// environment variables layered on top.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::new(path, config::FileFormat::Yaml));
        }

        let config: ClubgateConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("admission.excluded_prefixes"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let prefix = &self.admission.api_prefix;
        if !prefix.is_empty() && !prefix.starts_with('/') {
            return Err(ClubgateError::Config(format!(
                "api_prefix must start with '/', got '{}'",
                self.admission.api_prefix
            )));
        }
        if self.admission.sweep_interval_secs == 0 {
            return Err(ClubgateError::Config(
                "sweep_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
