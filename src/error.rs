//! # Error Types
//!
//! Custom error types for Fleet BMS using `thiserror`.

use thiserror::Error;

/// Main error type for Fleet BMS
#[derive(Debug, Error)]
pub enum BmsError {
    /// Configuration file errors (parse or validation)
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Degenerate noise filter parameters
    #[error("Invalid filter parameters: {0}")]
    InvalidFilter(String),

    /// Inverted, collapsed or non-finite SOC curve thresholds
    #[error("Invalid SOC thresholds: {0}")]
    InvalidThresholds(String),

    /// Telemetry record rejected before touching any aggregate
    #[error("Malformed telemetry record: {0}")]
    MalformedRecord(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Fleet BMS
pub type Result<T> = std::result::Result<T, BmsError>;
