//! CLI error types.

use engine::{EngineError, RegistryError};
use history::HistoryError;
use thiserror::Error;

/// Errors that end a CLI invocation.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid configuration or arguments.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine error.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Registry error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// History store error.
    #[error("History store error: {0}")]
    History(#[from] HistoryError),

    /// The worker task panicked or was aborted.
    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    /// The Prometheus exporter could not be installed.
    #[error("Metrics error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Convenience type alias for CLI results.
pub type CliResult<T> = Result<T, CliError>;
