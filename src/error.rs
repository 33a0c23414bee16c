//! Error types for the stress controller.

use std::path::PathBuf;
use thiserror::Error;

/// A run configuration that cannot be turned into concrete parameters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A numeric field holds something other than an integer or "auto".
    #[error("{field} must be a number or 'Auto', got '{value}'")]
    InvalidValue { field: &'static str, value: String },

    /// An explicit time limit cannot fit one pass over every selected unit.
    #[error(
        "time limit ({supplied} sec) is too low; minimum required: {minimum} sec \
         ({per_unit} sec x {unit_count} units)"
    )]
    InsufficientTimeLimit {
        supplied: u64,
        minimum: u64,
        per_unit: u64,
        unit_count: usize,
    },

    /// The memory field is not a size such as `64M` or `8G`.
    #[error("memory must be a size such as 64M or 8G, got '{0}'")]
    InvalidMemory(String),
}

/// Reasons a launch is refused. No background task is started for any of them.
#[derive(Error, Debug)]
pub enum StartError {
    /// A worker is already tracked by this controller.
    #[error("a test is already running")]
    AlreadyRunning,

    /// No component was selected.
    #[error("select at least one component")]
    NoSelection,

    /// The worker binary was not found in the current directory or on the search path.
    #[error("{program} not found in the current directory or on PATH")]
    ExecutableMissing { program: String },

    /// The run configuration did not resolve.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The OS refused to spawn the worker.
    #[error("failed to start worker: {0}")]
    SpawnFailed(String),
}

/// Reasons a stop request is refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopError {
    /// Nothing is running.
    #[error("no test is running")]
    NotRunning,
}

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Settings file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Settings file path does not exist.
    #[error("settings file not found: {0}")]
    MissingSettings(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Launch refused.
    #[error(transparent)]
    Start(#[from] StartError),

    /// Stop refused.
    #[error(transparent)]
    Stop(#[from] StopError),
}

/// Result type alias for controller operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_time_limit_reports_both_values() {
        let err = ConfigError::InsufficientTimeLimit {
            supplied: 100,
            minimum: 150,
            per_unit: 50,
            unit_count: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("100 sec"));
        assert!(msg.contains("150 sec"));
        assert!(msg.contains("50 sec x 3 units"));
    }

    #[test]
    fn start_error_wraps_config_error() {
        let err: StartError = ConfigError::InvalidMemory("lots".into()).into();
        assert!(matches!(err, StartError::InvalidConfig(_)));
        assert!(err.to_string().contains("lots"));
    }
}
