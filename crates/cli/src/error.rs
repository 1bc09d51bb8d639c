//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Settings file not found
    #[error("Settings file not found: {path}")]
    ConfigNotFound { path: String },

    /// Events file could not be read or parsed
    #[error("Invalid event on line {line}: {message}")]
    InvalidEvent { line: usize, message: String },

    /// Delivery did not finish in time
    #[error("Timed out after {secs}s with {pending} dispatches pending")]
    DeliveryTimeout { secs: u64, pending: usize },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn invalid_event(line: usize, message: impl Into<String>) -> Self {
        Self::InvalidEvent {
            line,
            message: message.into(),
        }
    }

    pub fn delivery_timeout(secs: u64, pending: usize) -> Self {
        Self::DeliveryTimeout { secs, pending }
    }
}
