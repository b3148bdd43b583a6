//! CLI error types

use thiserror::Error;

use crate::config::ConfigError;

/// CLI error type
#[derive(Debug, Error)]
pub enum CliError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown scenario: {0}. Run `rngtrace scenarios` for the catalogue")]
    UnknownScenario(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Malformed effect log: {0}")]
    EffectLog(String),

    #[error("Effect log rejected: {0}")]
    Rejected(#[from] rngtrace_compile::error::UnsupportedPattern),

    #[error("Scenario failed: {0}")]
    Driver(#[from] rngtrace_compile::driver::DriverError),

    #[error("{failed} of {total} runs did not meet their expectation")]
    ExpectationFailed { failed: usize, total: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
