use thiserror::Error;

use crate::{ExecutionId, Sequence};

/// Errors that can occur when interacting with the history store.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Another writer appended to the execution first.
    #[error(
        "Concurrency conflict for execution {execution_id}: expected sequence {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        execution_id: ExecutionId,
        expected: Sequence,
        actual: Sequence,
    },

    /// The records handed to `append` are malformed.
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HistoryError {
    /// Returns true if the error is an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, HistoryError::ConcurrencyConflict { .. })
    }
}

/// Result type for history store operations.
pub type Result<T> = std::result::Result<T, HistoryError>;
