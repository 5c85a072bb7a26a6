//! Error taxonomy shared by workflows, activities and the engine.

use common::ExecutionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether an activity failure may succeed on another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityErrorKind {
    Transient,
    Permanent,
}

impl std::fmt::Display for ActivityErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityErrorKind::Transient => write!(f, "transient"),
            ActivityErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// Which activity timeout was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutClass {
    /// The activity was not picked up for execution in time.
    ScheduleToStart,
    /// The activity started but did not finish in time.
    StartToClose,
}

impl std::fmt::Display for TimeoutClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutClass::ScheduleToStart => write!(f, "schedule-to-start"),
            TimeoutClass::StartToClose => write!(f, "start-to-close"),
        }
    }
}

/// Failure of a notification activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind} activity error: {message}")]
pub struct ActivityError {
    pub kind: ActivityErrorKind,
    /// Set when the failure was a timeout rather than an error raised by
    /// the activity itself.
    pub timeout: Option<TimeoutClass>,
    pub message: String,
}

impl ActivityError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ActivityErrorKind::Transient,
            timeout: None,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ActivityErrorKind::Permanent,
            timeout: None,
            message: message.into(),
        }
    }

    /// A timeout is transient: the same call may well succeed later.
    pub fn timed_out(class: TimeoutClass) -> Self {
        Self {
            kind: ActivityErrorKind::Transient,
            timeout: Some(class),
            message: format!("{class} timeout exceeded"),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.timeout.is_some()
    }
}

/// Failure of a child workflow execution, as seen by its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("child execution {execution_id} failed: {reason}")]
pub struct ChildExecutionError {
    pub execution_id: ExecutionId,
    pub reason: String,
}

/// Errors raised while replaying or deciding inside a workflow.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// The workflow input is malformed.
    #[error("Invalid workflow input: {0}")]
    InvalidInput(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for orchestration results.
pub type Result<T> = std::result::Result<T, OrchestrationError>;
