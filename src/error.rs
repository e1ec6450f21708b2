//! Error types for the Clubgate admission layer.

use thiserror::Error;

/// Main error type for Clubgate operations.
#[derive(Error, Debug)]
pub enum ClubgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store failures. These never reach callers; the admission
    /// gate turns them into an allow decision.
    #[error("Counter store error: {0}")]
    Store(String),

    /// Layered settings could not be assembled
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// Rules document could not be parsed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Clubgate operations.
pub type Result<T> = std::result::Result<T, ClubgateError>;
