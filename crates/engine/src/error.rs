//! Engine error types.

use common::ExecutionId;
use history::HistoryError;
use orchestration::OrchestrationError;
use thiserror::Error;

/// Errors raised while building a registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A workflow type was registered twice.
    #[error("Workflow type '{0}' is already registered")]
    DuplicateWorkflow(String),

    /// An activity name was registered twice.
    #[error("Activity '{0}' is already registered")]
    DuplicateActivity(String),

    /// A workflow refers to an activity or child that was never registered.
    #[error("Workflow '{owner}' uses unregistered {kind} '{name}'")]
    Unresolved {
        owner: String,
        kind: &'static str,
        name: String,
    },
}

/// Errors that can occur while driving executions.
#[derive(Debug, Error)]
pub enum EngineError {
    /// History store error.
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    /// Registry error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The workflow rejected its input or failed to decide.
    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    /// No workflow is registered under this type.
    #[error("Unknown workflow type: {0}")]
    UnknownWorkflow(String),

    /// The execution has no history.
    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    /// A root execution with this ID already exists.
    #[error("Execution already started: {0}")]
    AlreadyStarted(ExecutionId),

    /// The execution already completed or failed.
    #[error("Execution already closed: {0}")]
    ExecutionClosed(ExecutionId),

    /// Replay produced a different command than the one recorded.
    #[error("Nondeterminism in {execution_id}: history has {recorded}, replay produced {produced}")]
    Nondeterminism {
        execution_id: ExecutionId,
        recorded: String,
        produced: String,
    },

    /// Loading and replaying history took longer than allowed.
    #[error("Decision timed out for {0}")]
    DecisionTimeout(ExecutionId),

    /// Stored history cannot be interpreted.
    #[error("Corrupt history for {execution_id}: {reason}")]
    CorruptHistory {
        execution_id: ExecutionId,
        reason: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for engine results.
pub type Result<T> = std::result::Result<T, EngineError>;
