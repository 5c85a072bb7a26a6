//! The workflow trait implemented by every orchestration.

use serde::{Serialize, de::DeserializeOwned};

use crate::command::Command;
use crate::error::Result;
use crate::events::HistoryEvent;

/// A deterministic, replayable orchestration.
///
/// A workflow instance is rebuilt from scratch on every decision: the
/// engine constructs it from its input, applies the recorded history in
/// order and asks for the next command. Given the same input and history a
/// workflow must always return the same command:
/// - `apply` must be pure and must not fail (history records facts)
/// - neither method may read the clock, draw randomness or do I/O
pub trait Workflow: Send + Sync + Sized {
    /// The workflow input, recorded in `ExecutionStarted`.
    type Input: Serialize + DeserializeOwned + Send;

    /// The value the workflow completes with.
    type Output: Serialize + DeserializeOwned + Send;

    /// Returns the registered workflow type name.
    fn workflow_type() -> &'static str;

    /// Activity names this workflow may schedule.
    ///
    /// Checked against the registry at startup.
    fn activities() -> &'static [&'static str] {
        &[]
    }

    /// Child workflow types this workflow may start.
    fn children() -> &'static [&'static str] {
        &[]
    }

    /// Creates a fresh instance for the given input.
    fn new(input: Self::Input) -> Self;

    /// Applies one history event.
    fn apply(&mut self, event: &HistoryEvent);

    /// Returns the step the workflow wants to take next.
    fn next_command(&self) -> Result<Command>;

    /// Rebuilds an instance by replaying history.
    fn replay<'a>(input: Self::Input, history: impl IntoIterator<Item = &'a HistoryEvent>) -> Self {
        let mut workflow = Self::new(input);
        for event in history {
            workflow.apply(event);
        }
        workflow
    }
}
