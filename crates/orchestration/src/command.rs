//! Commands a workflow issues to the engine.

use std::time::Duration;

use common::ExecutionId;
use serde::{Deserialize, Serialize};

/// Default bound for both activity timeouts.
pub const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeouts applied to one activity invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityOptions {
    /// Bound on the time between scheduling and a worker picking it up.
    pub schedule_to_start_timeout: Duration,
    /// Bound on the execution itself.
    pub start_to_close_timeout: Duration,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            schedule_to_start_timeout: DEFAULT_ACTIVITY_TIMEOUT,
            start_to_close_timeout: DEFAULT_ACTIVITY_TIMEOUT,
        }
    }
}

/// Default bound on one load-and-replay pass.
pub const DEFAULT_DECISION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on a whole execution.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Options fixed when an execution starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOptions {
    /// Bound on the whole execution, measured from its start.
    pub execution_timeout: Duration,
    /// Bound on loading and replaying the history for one decision.
    pub decision_timeout: Duration,
}

impl StartOptions {
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            decision_timeout: DEFAULT_DECISION_TIMEOUT,
        }
    }
}

/// Options for a child workflow execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildOptions {
    /// Deterministic ID of the child execution.
    pub execution_id: ExecutionId,
    pub execution_timeout: Duration,
}

/// The next step a workflow wants the engine to take.
///
/// A workflow whose step is already in flight keeps returning the same
/// command until the matching completion shows up in its history.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Run a registered activity.
    ScheduleActivity {
        name: String,
        input: serde_json::Value,
        options: ActivityOptions,
    },

    /// Suspend on a durable timer.
    StartTimer { duration: Duration },

    /// Suspend until a signal arrives on the named channel.
    WaitForSignal {
        name: String,
        timeout: Option<Duration>,
    },

    /// Run a child workflow and wait for its result.
    StartChild {
        workflow_type: String,
        input: serde_json::Value,
        options: ChildOptions,
    },

    /// Finish successfully with an output.
    Complete { output: serde_json::Value },

    /// Finish with a failure.
    Fail { reason: String },
}

impl Command {
    /// Returns the command name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::ScheduleActivity { .. } => "ScheduleActivity",
            Command::StartTimer { .. } => "StartTimer",
            Command::WaitForSignal { .. } => "WaitForSignal",
            Command::StartChild { .. } => "StartChild",
            Command::Complete { .. } => "Complete",
            Command::Fail { .. } => "Fail",
        }
    }

    /// Builds a `ScheduleActivity` command from a typed input.
    pub fn activity<T: Serialize>(
        name: &str,
        input: &T,
        options: ActivityOptions,
    ) -> Result<Self, serde_json::Error> {
        Ok(Command::ScheduleActivity {
            name: name.to_string(),
            input: serde_json::to_value(input)?,
            options,
        })
    }

    /// Builds a `Complete` command from a typed output.
    pub fn complete<T: Serialize>(output: &T) -> Result<Self, serde_json::Error> {
        Ok(Command::Complete {
            output: serde_json::to_value(output)?,
        })
    }
}
