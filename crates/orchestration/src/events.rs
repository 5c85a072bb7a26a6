//! Events recorded in an execution's history.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::ExecutionId;
use serde::{Deserialize, Serialize};

use crate::command::{ActivityOptions, ChildOptions, StartOptions};
use crate::error::{ActivityError, ChildExecutionError};

/// Everything that can happen to an execution.
///
/// Suspension points come in pairs: a *scheduled* event written before the
/// engine waits (`ActivityScheduled`, `TimerStarted`, `SignalWaitStarted`,
/// `ChildExecutionStarted`) and a *completion* written once the wait is
/// over. `seq` correlates the two.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum HistoryEvent {
    ExecutionStarted(ExecutionStartedData),
    ActivityScheduled(ActivityScheduledData),
    ActivityCompleted(ActivityCompletedData),
    ActivityFailed(ActivityFailedData),
    TimerStarted(TimerStartedData),
    TimerFired(SeqData),
    SignalWaitStarted(SignalWaitData),
    SignalReceived(SignalData),
    SignalTimedOut(SignalWaitData),
    ChildExecutionStarted(ChildStartedData),
    ChildExecutionCompleted(ChildCompletedData),
    ChildExecutionFailed(ChildFailedData),
    CancelRequested(CancelData),
    ExecutionCompleted(ExecutionCompletedData),
    ExecutionFailed(ExecutionFailedData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStartedData {
    pub workflow_type: String,
    pub input: serde_json::Value,
    /// Set when this execution is the child of another.
    pub parent: Option<ExecutionId>,
    pub options: StartOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityScheduledData {
    pub seq: u32,
    pub name: String,
    pub input: serde_json::Value,
    pub options: ActivityOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityCompletedData {
    pub seq: u32,
    pub name: String,
    pub output: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityFailedData {
    pub seq: u32,
    pub name: String,
    pub error: ActivityError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerStartedData {
    pub seq: u32,
    pub duration: Duration,
    pub fire_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeqData {
    pub seq: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalWaitData {
    pub seq: u32,
    pub name: String,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalData {
    pub name: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildStartedData {
    pub seq: u32,
    pub workflow_type: String,
    pub input: serde_json::Value,
    pub options: ChildOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildCompletedData {
    pub seq: u32,
    pub output: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildFailedData {
    pub seq: u32,
    pub error: ChildExecutionError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelData {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCompletedData {
    pub output: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailedData {
    pub reason: String,
}

impl HistoryEvent {
    /// Returns the event type name stored alongside the payload.
    pub fn event_type(&self) -> &'static str {
        match self {
            HistoryEvent::ExecutionStarted(_) => "ExecutionStarted",
            HistoryEvent::ActivityScheduled(_) => "ActivityScheduled",
            HistoryEvent::ActivityCompleted(_) => "ActivityCompleted",
            HistoryEvent::ActivityFailed(_) => "ActivityFailed",
            HistoryEvent::TimerStarted(_) => "TimerStarted",
            HistoryEvent::TimerFired(_) => "TimerFired",
            HistoryEvent::SignalWaitStarted(_) => "SignalWaitStarted",
            HistoryEvent::SignalReceived(_) => "SignalReceived",
            HistoryEvent::SignalTimedOut(_) => "SignalTimedOut",
            HistoryEvent::ChildExecutionStarted(_) => "ChildExecutionStarted",
            HistoryEvent::ChildExecutionCompleted(_) => "ChildExecutionCompleted",
            HistoryEvent::ChildExecutionFailed(_) => "ChildExecutionFailed",
            HistoryEvent::CancelRequested(_) => "CancelRequested",
            HistoryEvent::ExecutionCompleted(_) => "ExecutionCompleted",
            HistoryEvent::ExecutionFailed(_) => "ExecutionFailed",
        }
    }

    /// Returns true for the events that close an execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HistoryEvent::ExecutionCompleted(_) | HistoryEvent::ExecutionFailed(_)
        )
    }

    /// The event types that close an execution.
    pub const TERMINAL_TYPES: [&'static str; 2] = ["ExecutionCompleted", "ExecutionFailed"];
}

// Convenience constructors
impl HistoryEvent {
    pub fn execution_started(
        workflow_type: impl Into<String>,
        input: serde_json::Value,
        parent: Option<ExecutionId>,
        options: StartOptions,
    ) -> Self {
        HistoryEvent::ExecutionStarted(ExecutionStartedData {
            workflow_type: workflow_type.into(),
            input,
            parent,
            options,
        })
    }

    pub fn activity_scheduled(
        seq: u32,
        name: impl Into<String>,
        input: serde_json::Value,
        options: ActivityOptions,
    ) -> Self {
        HistoryEvent::ActivityScheduled(ActivityScheduledData {
            seq,
            name: name.into(),
            input,
            options,
        })
    }

    pub fn activity_completed(seq: u32, name: impl Into<String>, output: serde_json::Value) -> Self {
        HistoryEvent::ActivityCompleted(ActivityCompletedData {
            seq,
            name: name.into(),
            output,
        })
    }

    pub fn activity_failed(seq: u32, name: impl Into<String>, error: ActivityError) -> Self {
        HistoryEvent::ActivityFailed(ActivityFailedData {
            seq,
            name: name.into(),
            error,
        })
    }

    pub fn timer_started(seq: u32, duration: Duration, fire_at: DateTime<Utc>) -> Self {
        HistoryEvent::TimerStarted(TimerStartedData {
            seq,
            duration,
            fire_at,
        })
    }

    pub fn timer_fired(seq: u32) -> Self {
        HistoryEvent::TimerFired(SeqData { seq })
    }

    pub fn signal_wait_started(
        seq: u32,
        name: impl Into<String>,
        deadline: Option<DateTime<Utc>>,
    ) -> Self {
        HistoryEvent::SignalWaitStarted(SignalWaitData {
            seq,
            name: name.into(),
            deadline,
        })
    }

    pub fn signal_received(name: impl Into<String>, payload: serde_json::Value) -> Self {
        HistoryEvent::SignalReceived(SignalData {
            name: name.into(),
            payload,
        })
    }

    pub fn signal_timed_out(
        seq: u32,
        name: impl Into<String>,
        deadline: Option<DateTime<Utc>>,
    ) -> Self {
        HistoryEvent::SignalTimedOut(SignalWaitData {
            seq,
            name: name.into(),
            deadline,
        })
    }

    pub fn child_started(
        seq: u32,
        workflow_type: impl Into<String>,
        input: serde_json::Value,
        options: ChildOptions,
    ) -> Self {
        HistoryEvent::ChildExecutionStarted(ChildStartedData {
            seq,
            workflow_type: workflow_type.into(),
            input,
            options,
        })
    }

    pub fn child_completed(seq: u32, output: serde_json::Value) -> Self {
        HistoryEvent::ChildExecutionCompleted(ChildCompletedData { seq, output })
    }

    pub fn child_failed(seq: u32, error: ChildExecutionError) -> Self {
        HistoryEvent::ChildExecutionFailed(ChildFailedData { seq, error })
    }

    pub fn cancel_requested(reason: impl Into<String>) -> Self {
        HistoryEvent::CancelRequested(CancelData {
            reason: reason.into(),
        })
    }

    pub fn execution_completed(output: serde_json::Value) -> Self {
        HistoryEvent::ExecutionCompleted(ExecutionCompletedData { output })
    }

    pub fn execution_failed(reason: impl Into<String>) -> Self {
        HistoryEvent::ExecutionFailed(ExecutionFailedData {
            reason: reason.into(),
        })
    }
}
