//! Error types for the sensor runner.

use thiserror::Error;

use crate::startup::StartupError;

/// Result type alias using [`RunnerError`].
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors that can stop the runner.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// The metrics database could not be reached during startup.
    #[error(transparent)]
    Startup(#[from] StartupError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }
}

impl From<sensor_runner_common::Error> for RunnerError {
    fn from(err: sensor_runner_common::Error) -> Self {
        match err {
            sensor_runner_common::Error::Config(msg) => Self::ConfigParse(msg),
            sensor_runner_common::Error::Io(e) => Self::Io(e),
        }
    }
}
