//! The replay-driven execution engine.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::ExecutionId;
use history::{
    AppendOptions, HistoryError, HistoryQuery, HistoryRecord, HistoryStore, HistoryStoreExt,
    Sequence,
};
use orchestration::events::ExecutionStartedData;
use orchestration::{
    ActivityError, ActivityOptions, ChildExecutionError, ChildOptions, Command, HistoryEvent,
    StartOptions, TimeoutClass,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Notify, Semaphore};

use crate::clock::{Clock, after, remaining};
use crate::error::{EngineError, Result};
use crate::registry::Registry;

/// Attempts made to append a fact (signal, cancel, completion) when other
/// writers keep moving the sequence.
const MAX_APPEND_ATTEMPTS: usize = 8;

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Activity invocations allowed to run at once across all executions.
    pub max_concurrent_activities: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_activities: 16,
        }
    }
}

/// Identifies a started execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHandle {
    pub execution_id: ExecutionId,
    pub workflow_type: String,
}

/// Where an execution stands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Waiting on something outside the engine's control.
    Suspended {
        waiting_on: String,
        deadline: Option<DateTime<Utc>>,
    },
    /// Finished with an output.
    Completed(Value),
    /// Finished with a failure.
    Failed(String),
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Suspended { .. })
    }
}

/// A suspension point that was scheduled but has not completed yet.
#[derive(Debug, Clone, PartialEq)]
enum Pending {
    Activity {
        seq: u32,
        name: String,
        input: Value,
        options: ActivityOptions,
    },
    Timer {
        seq: u32,
        duration: Duration,
        fire_at: DateTime<Utc>,
    },
    Signal {
        seq: u32,
        name: String,
        deadline: Option<DateTime<Utc>>,
    },
    Child {
        seq: u32,
        workflow_type: String,
        options: ChildOptions,
    },
}

impl Pending {
    /// Returns true if `command` asks for exactly this suspension point.
    fn matches(&self, command: &Command) -> bool {
        match (self, command) {
            (
                Pending::Activity { name, input, .. },
                Command::ScheduleActivity {
                    name: wanted,
                    input: wanted_input,
                    ..
                },
            ) => name == wanted && input == wanted_input,
            (Pending::Timer { duration, .. }, Command::StartTimer { duration: wanted }) => {
                duration == wanted
            }
            (Pending::Signal { name, .. }, Command::WaitForSignal { name: wanted, .. }) => {
                name == wanted
            }
            (
                Pending::Child {
                    workflow_type,
                    options,
                    ..
                },
                Command::StartChild {
                    workflow_type: wanted,
                    options: wanted_options,
                    ..
                },
            ) => workflow_type == wanted && options.execution_id == wanted_options.execution_id,
            _ => false,
        }
    }

    fn describe(&self) -> String {
        match self {
            Pending::Activity { seq, name, .. } => format!("activity {name} (seq {seq})"),
            Pending::Timer { seq, fire_at, .. } => format!("timer firing at {fire_at} (seq {seq})"),
            Pending::Signal { name, .. } => format!("signal {name}"),
            Pending::Child { options, .. } => format!("child {}", options.execution_id),
        }
    }

    fn deadline(&self) -> Option<DateTime<Utc>> {
        match self {
            Pending::Timer { fire_at, .. } => Some(*fire_at),
            Pending::Signal { deadline, .. } => *deadline,
            Pending::Activity { .. } | Pending::Child { .. } => None,
        }
    }
}

/// An execution's history, decoded.
#[derive(Debug, Clone)]
struct LoadedExecution {
    execution_id: ExecutionId,
    started: ExecutionStartedData,
    started_at: DateTime<Utc>,
    events: Vec<HistoryEvent>,
    sequence: Sequence,
}

impl LoadedExecution {
    fn from_records(execution_id: &ExecutionId, records: Vec<HistoryRecord>) -> Result<Self> {
        let corrupt = |reason: String| EngineError::CorruptHistory {
            execution_id: execution_id.clone(),
            reason,
        };

        let (Some(first), Some(last)) = (records.first(), records.last()) else {
            return Err(EngineError::ExecutionNotFound(execution_id.clone()));
        };
        let started_at = first.timestamp;
        let sequence = last.sequence;

        let events = records
            .into_iter()
            .map(|record| serde_json::from_value::<HistoryEvent>(record.payload))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let started = match events.first() {
            Some(HistoryEvent::ExecutionStarted(data)) => data.clone(),
            Some(other) => {
                return Err(corrupt(format!(
                    "history starts with {} instead of ExecutionStarted",
                    other.event_type()
                )));
            }
            None => return Err(EngineError::ExecutionNotFound(execution_id.clone())),
        };

        Ok(Self {
            execution_id: execution_id.clone(),
            started,
            started_at,
            events,
            sequence,
        })
    }

    fn workflow_type(&self) -> &str {
        &self.started.workflow_type
    }

    fn deadline(&self) -> DateTime<Utc> {
        after(self.started_at, self.started.options.execution_timeout)
    }

    fn terminal_status(&self) -> Option<ExecutionStatus> {
        self.events.iter().find_map(|event| match event {
            HistoryEvent::ExecutionCompleted(data) => {
                Some(ExecutionStatus::Completed(data.output.clone()))
            }
            HistoryEvent::ExecutionFailed(data) => Some(ExecutionStatus::Failed(data.reason.clone())),
            _ => None,
        })
    }

    fn cancel_reason(&self) -> Option<&str> {
        self.events.iter().find_map(|event| match event {
            HistoryEvent::CancelRequested(data) => Some(data.reason.as_str()),
            _ => None,
        })
    }

    fn has_signal(&self, name: &str) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event, HistoryEvent::SignalReceived(data) if data.name == name))
    }

    /// Sequence number for the next suspension point.
    fn next_seq(&self) -> u32 {
        let scheduled = self
            .events
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    HistoryEvent::ActivityScheduled(_)
                        | HistoryEvent::TimerStarted(_)
                        | HistoryEvent::SignalWaitStarted(_)
                        | HistoryEvent::ChildExecutionStarted(_)
                )
            })
            .count();
        u32::try_from(scheduled).unwrap_or(u32::MAX).saturating_add(1)
    }

    /// The suspension point still waiting for its completion, if any.
    fn pending(&self) -> Option<Pending> {
        let mut pending: Option<Pending> = None;
        for event in &self.events {
            match event {
                HistoryEvent::ActivityScheduled(data) => {
                    pending = Some(Pending::Activity {
                        seq: data.seq,
                        name: data.name.clone(),
                        input: data.input.clone(),
                        options: data.options,
                    });
                }
                HistoryEvent::TimerStarted(data) => {
                    pending = Some(Pending::Timer {
                        seq: data.seq,
                        duration: data.duration,
                        fire_at: data.fire_at,
                    });
                }
                HistoryEvent::SignalWaitStarted(data) => {
                    pending = Some(Pending::Signal {
                        seq: data.seq,
                        name: data.name.clone(),
                        deadline: data.deadline,
                    });
                }
                HistoryEvent::ChildExecutionStarted(data) => {
                    pending = Some(Pending::Child {
                        seq: data.seq,
                        workflow_type: data.workflow_type.clone(),
                        options: data.options.clone(),
                    });
                }
                HistoryEvent::ActivityCompleted(data) => clear_seq(&mut pending, data.seq),
                HistoryEvent::ActivityFailed(data) => clear_seq(&mut pending, data.seq),
                HistoryEvent::TimerFired(data) => clear_seq(&mut pending, data.seq),
                HistoryEvent::SignalTimedOut(data) => clear_seq(&mut pending, data.seq),
                HistoryEvent::ChildExecutionCompleted(data) => clear_seq(&mut pending, data.seq),
                HistoryEvent::ChildExecutionFailed(data) => clear_seq(&mut pending, data.seq),
                HistoryEvent::SignalReceived(data) => {
                    if matches!(&pending, Some(Pending::Signal { name, .. }) if *name == data.name) {
                        pending = None;
                    }
                }
                _ => {}
            }
        }
        pending
    }

    fn pending_child(&self) -> Option<ExecutionId> {
        match self.pending() {
            Some(Pending::Child { options, .. }) => Some(options.execution_id),
            _ => None,
        }
    }
}

fn clear_seq(pending: &mut Option<Pending>, seq: u32) {
    let resolved = match pending {
        Some(Pending::Activity { seq: s, .. })
        | Some(Pending::Timer { seq: s, .. })
        | Some(Pending::Signal { seq: s, .. })
        | Some(Pending::Child { seq: s, .. }) => *s == seq,
        None => false,
    };
    if resolved {
        *pending = None;
    }
}

/// What one load-and-replay pass concluded.
enum Pass {
    /// The execution already has a terminal event.
    Closed(ExecutionStatus),
    /// The execution must fail without consulting the workflow.
    Unwind(String),
    /// The workflow's next command.
    Decide(Command),
}

/// What the driver loop does after a step.
enum Progress {
    Continue,
    Done(ExecutionStatus),
}

/// How a guarded wait ended.
enum Guarded<T> {
    Finished(T),
    Canceled,
    Expired,
}

/// Drives workflow executions by replaying their history.
///
/// Every step reloads the execution's history, replays it through the
/// registered workflow and compares the resulting command with the
/// suspension point left open in history (if any). A new command is first
/// recorded and then carried out, so a crash at any point resumes from
/// history alone.
pub struct Engine<S> {
    store: S,
    registry: Arc<Registry>,
    clock: Arc<dyn Clock>,
    activity_slots: Arc<Semaphore>,
    wakers: Arc<Mutex<HashMap<ExecutionId, Arc<Notify>>>>,
}

impl<S: Clone> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: Arc::clone(&self.registry),
            clock: Arc::clone(&self.clock),
            activity_slots: Arc::clone(&self.activity_slots),
            wakers: Arc::clone(&self.wakers),
        }
    }
}

impl<S> Engine<S>
where
    S: HistoryStore + Clone + 'static,
{
    /// Creates a new engine.
    pub fn new(
        store: S,
        registry: Arc<Registry>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            activity_slots: Arc::new(Semaphore::new(
                config.max_concurrent_activities.min(Semaphore::MAX_PERMITS),
            )),
            wakers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Starts a new root execution.
    ///
    /// Fails with `AlreadyStarted` if the ID is taken.
    #[tracing::instrument(skip(self, input), fields(execution_id = %execution_id))]
    pub async fn start_execution(
        &self,
        execution_id: &ExecutionId,
        workflow_type: &str,
        input: Value,
        options: StartOptions,
    ) -> Result<ExecutionHandle> {
        match self
            .create_execution(execution_id, workflow_type, input, None, options)
            .await
        {
            Err(EngineError::History(e)) if e.is_conflict() => {
                Err(EngineError::AlreadyStarted(execution_id.clone()))
            }
            other => other,
        }
    }

    /// Records a signal for an execution.
    ///
    /// Signals are durable: one that arrives before the workflow waits for
    /// it is picked up when the workflow gets there.
    #[tracing::instrument(skip(self, payload), fields(execution_id = %execution_id))]
    pub async fn signal_execution(
        &self,
        execution_id: &ExecutionId,
        signal_name: &str,
        payload: Value,
    ) -> Result<()> {
        let execution = self.load(execution_id).await?;
        if execution.terminal_status().is_some() {
            return Err(EngineError::ExecutionClosed(execution_id.clone()));
        }
        if execution.has_signal(signal_name) {
            tracing::warn!(
                signal = signal_name,
                "signal already received on this channel; recording it anyway"
            );
        }

        self.append_fact(
            execution_id,
            execution.workflow_type(),
            &HistoryEvent::signal_received(signal_name, payload),
        )
        .await?;
        self.wake(execution_id);

        tracing::info!(signal = signal_name, "signal recorded");
        Ok(())
    }

    /// Requests cancellation of an execution and of any child it waits on.
    ///
    /// The execution unwinds to `Failed("canceled: <reason>")` the next
    /// time it is driven; an in-flight wait is interrupted.
    #[tracing::instrument(skip(self), fields(execution_id = %execution_id))]
    pub async fn cancel_execution(&self, execution_id: &ExecutionId, reason: &str) -> Result<()> {
        let execution = self.load(execution_id).await?;
        if execution.terminal_status().is_some() {
            return Err(EngineError::ExecutionClosed(execution_id.clone()));
        }

        let mut target = Some(execution);
        while let Some(execution) = target.take() {
            if execution.terminal_status().is_some() {
                break;
            }
            if execution.cancel_reason().is_none() {
                self.append_fact(
                    &execution.execution_id,
                    execution.workflow_type(),
                    &HistoryEvent::cancel_requested(reason),
                )
                .await?;
            }
            self.wake(&execution.execution_id);
            tracing::info!(target_execution = %execution.execution_id, "cancellation requested");

            if let Some(child) = execution.pending_child() {
                target = match self.load(&child).await {
                    Ok(child) => Some(child),
                    Err(EngineError::ExecutionNotFound(_)) => None,
                    Err(e) => return Err(e),
                };
            }
        }
        Ok(())
    }

    /// Drives an execution until it finishes or has to wait on something
    /// outside the engine (a signal, or a child waiting on one).
    #[tracing::instrument(skip(self), fields(execution_id = %execution_id))]
    pub async fn run_execution(&self, execution_id: &ExecutionId) -> Result<ExecutionStatus> {
        let decision_timeout = self
            .load(execution_id)
            .await?
            .started
            .options
            .decision_timeout;
        let waker = self.waker(execution_id);

        loop {
            let (execution, pass) = tokio::time::timeout(decision_timeout, self.next_pass(execution_id))
                .await
                .map_err(|_| EngineError::DecisionTimeout(execution_id.clone()))??;

            let progress = match pass {
                Pass::Closed(status) => {
                    if status.is_terminal() {
                        self.forget(execution_id);
                    }
                    Progress::Done(status)
                }
                Pass::Unwind(reason) => self.unwind(&execution, reason).await?,
                Pass::Decide(command) => match execution.pending() {
                    Some(pending) if !pending.matches(&command) => {
                        tracing::error!(
                            recorded = %pending.describe(),
                            produced = command.kind(),
                            "replay diverged from recorded history"
                        );
                        return Err(EngineError::Nondeterminism {
                            execution_id: execution_id.clone(),
                            recorded: pending.describe(),
                            produced: command.kind().to_string(),
                        });
                    }
                    Some(pending) => self.resume(&execution, pending, &waker).await?,
                    None => self.schedule(&execution, command).await?,
                },
            };

            if let Progress::Done(status) = progress {
                return Ok(status);
            }
        }
    }

    /// Reports where an execution stands without driving it.
    pub async fn status(&self, execution_id: &ExecutionId) -> Result<ExecutionStatus> {
        let execution = self.load(execution_id).await?;
        if let Some(status) = execution.terminal_status() {
            return Ok(status);
        }
        Ok(match execution.pending() {
            Some(pending) => ExecutionStatus::Suspended {
                waiting_on: pending.describe(),
                deadline: pending.deadline(),
            },
            None => ExecutionStatus::Suspended {
                waiting_on: "next decision".to_string(),
                deadline: None,
            },
        })
    }

    /// Returns the decoded history of an execution.
    pub async fn history(&self, execution_id: &ExecutionId) -> Result<Vec<HistoryEvent>> {
        Ok(self.load(execution_id).await?.events)
    }

    /// Root executions that have started but not finished.
    ///
    /// Children are left out: their parent drives them.
    pub async fn open_executions(&self) -> Result<Vec<ExecutionId>> {
        let started = self
            .store
            .query(
                HistoryQuery::for_event_types(["ExecutionStarted"])
                    .open_only(HistoryEvent::TERMINAL_TYPES),
            )
            .await?;

        let mut open = Vec::new();
        for record in started {
            if let HistoryEvent::ExecutionStarted(data) =
                serde_json::from_value::<HistoryEvent>(record.payload)?
                && data.parent.is_none()
            {
                open.push(record.execution_id);
            }
        }
        Ok(open)
    }

    async fn create_execution(
        &self,
        execution_id: &ExecutionId,
        workflow_type: &str,
        input: Value,
        parent: Option<ExecutionId>,
        options: StartOptions,
    ) -> Result<ExecutionHandle> {
        let handler = self
            .registry
            .workflow(workflow_type)
            .ok_or_else(|| EngineError::UnknownWorkflow(workflow_type.to_string()))?;
        handler.validate_input(&input)?;

        let is_child = parent.is_some();
        let event = HistoryEvent::execution_started(workflow_type, input, parent, options);
        self.append_at(execution_id, workflow_type, Sequence::initial(), &event)
            .await?;

        metrics::counter!("executions_started_total").increment(1);
        tracing::info!(workflow_type, is_child, "execution started");

        Ok(ExecutionHandle {
            execution_id: execution_id.clone(),
            workflow_type: workflow_type.to_string(),
        })
    }

    async fn load(&self, execution_id: &ExecutionId) -> Result<LoadedExecution> {
        let records = self.store.load(execution_id).await?;
        LoadedExecution::from_records(execution_id, records)
    }

    async fn next_pass(&self, execution_id: &ExecutionId) -> Result<(LoadedExecution, Pass)> {
        let execution = self.load(execution_id).await?;

        if let Some(status) = execution.terminal_status() {
            return Ok((execution, Pass::Closed(status)));
        }
        if let Some(reason) = execution.cancel_reason() {
            let reason = format!("canceled: {reason}");
            return Ok((execution, Pass::Unwind(reason)));
        }
        if self.clock.now() >= execution.deadline() {
            return Ok((execution, Pass::Unwind("execution timed out".to_string())));
        }

        let handler = self
            .registry
            .workflow(execution.workflow_type())
            .ok_or_else(|| EngineError::UnknownWorkflow(execution.workflow_type().to_string()))?;
        let command = handler.decide(&execution.started.input, &execution.events)?;

        tracing::debug!(command = command.kind(), "replayed history");
        Ok((execution, Pass::Decide(command)))
    }

    /// Records the suspension point or terminal event a new command asks for.
    async fn schedule(&self, execution: &LoadedExecution, command: Command) -> Result<Progress> {
        let seq = execution.next_seq();
        let now = self.clock.now();

        let event = match command {
            Command::ScheduleActivity {
                name,
                input,
                options,
            } => HistoryEvent::activity_scheduled(seq, name, input, options),
            Command::StartTimer { duration } => {
                HistoryEvent::timer_started(seq, duration, after(now, duration))
            }
            Command::WaitForSignal { name, timeout } => {
                HistoryEvent::signal_wait_started(seq, name, timeout.map(|t| after(now, t)))
            }
            Command::StartChild {
                workflow_type,
                input,
                options,
            } => HistoryEvent::child_started(seq, workflow_type, input, options),
            Command::Complete { output } => HistoryEvent::execution_completed(output),
            Command::Fail { reason } => HistoryEvent::execution_failed(reason),
        };

        let terminal = event.is_terminal();
        if !self.record(execution, &event).await? {
            return Ok(Progress::Continue);
        }

        match &event {
            HistoryEvent::ExecutionCompleted(_) => {
                metrics::counter!("executions_completed_total").increment(1);
                tracing::info!("execution completed");
            }
            HistoryEvent::ExecutionFailed(data) => {
                metrics::counter!("executions_failed_total").increment(1);
                tracing::warn!(reason = %data.reason, "execution failed");
            }
            other => tracing::debug!(seq, event = other.event_type(), "scheduled"),
        }
        if terminal {
            self.forget(&execution.execution_id);
        }
        Ok(Progress::Continue)
    }

    /// Carries out a suspension point already recorded in history.
    async fn resume(
        &self,
        execution: &LoadedExecution,
        pending: Pending,
        waker: &Notify,
    ) -> Result<Progress> {
        let execution_id = &execution.execution_id;
        let workflow_type = execution.workflow_type();
        let deadline = execution.deadline();

        let completion = match pending {
            Pending::Activity {
                seq,
                name,
                input,
                options,
            } => {
                let call = self.invoke_activity(&name, input, options);
                let outcome = self.guarded(execution_id, waker, deadline, call).await?;
                match outcome {
                    Guarded::Finished(Ok(output)) => {
                        HistoryEvent::activity_completed(seq, name, output)
                    }
                    Guarded::Finished(Err(error)) => {
                        tracing::warn!(activity = %name, %error, "activity failed");
                        HistoryEvent::activity_failed(seq, name, error)
                    }
                    Guarded::Canceled => return Ok(Progress::Continue),
                    Guarded::Expired => return self.expire(execution).await,
                }
            }
            Pending::Timer { seq, fire_at, .. } => {
                let sleep = tokio::time::sleep(remaining(self.clock.now(), fire_at));
                match self.guarded(execution_id, waker, deadline, sleep).await? {
                    Guarded::Finished(()) => HistoryEvent::timer_fired(seq),
                    Guarded::Canceled => return Ok(Progress::Continue),
                    Guarded::Expired => return self.expire(execution).await,
                }
            }
            Pending::Signal {
                seq,
                name,
                deadline: signal_deadline,
            } => match signal_deadline {
                Some(at) if self.clock.now() >= at => {
                    tracing::info!(signal = %name, "signal wait timed out");
                    HistoryEvent::signal_timed_out(seq, name, signal_deadline)
                }
                _ => {
                    return Ok(Progress::Done(ExecutionStatus::Suspended {
                        waiting_on: format!("signal {name}"),
                        deadline: signal_deadline,
                    }));
                }
            },
            Pending::Child {
                seq,
                workflow_type: child_type,
                options,
            } => {
                let input = execution
                    .events
                    .iter()
                    .find_map(|event| match event {
                        HistoryEvent::ChildExecutionStarted(data) if data.seq == seq => {
                            Some(data.input.clone())
                        }
                        _ => None,
                    })
                    .unwrap_or(Value::Null);
                let child_id = options.execution_id.clone();
                let child_options = StartOptions {
                    execution_timeout: options.execution_timeout,
                    decision_timeout: execution.started.options.decision_timeout,
                };
                self.start_child(execution_id, &child_id, &child_type, input, child_options)
                    .await?;

                let outcome = self
                    .guarded(execution_id, waker, deadline, self.run_child(&child_id))
                    .await?;
                match outcome {
                    Guarded::Finished(status) => match status? {
                        ExecutionStatus::Completed(output) => {
                            HistoryEvent::child_completed(seq, output)
                        }
                        ExecutionStatus::Failed(reason) => HistoryEvent::child_failed(
                            seq,
                            ChildExecutionError {
                                execution_id: child_id,
                                reason,
                            },
                        ),
                        ExecutionStatus::Suspended {
                            waiting_on,
                            deadline,
                        } => {
                            return Ok(Progress::Done(ExecutionStatus::Suspended {
                                waiting_on: format!("child {child_id} ({waiting_on})"),
                                deadline,
                            }));
                        }
                    },
                    Guarded::Canceled => return Ok(Progress::Continue),
                    Guarded::Expired => return self.expire(execution).await,
                }
            }
        };

        self.append_fact(execution_id, workflow_type, &completion).await?;
        Ok(Progress::Continue)
    }

    /// Fails the execution, first unwinding any child it is waiting on.
    async fn unwind(&self, execution: &LoadedExecution, reason: String) -> Result<Progress> {
        if let Some(child) = execution.pending_child() {
            match self.cancel_execution(&child, &reason).await {
                Ok(()) => {
                    self.run_child(&child).await?;
                }
                Err(EngineError::ExecutionNotFound(_) | EngineError::ExecutionClosed(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let event = HistoryEvent::execution_failed(&reason);
        if self.record(execution, &event).await? {
            metrics::counter!("executions_failed_total").increment(1);
            tracing::warn!(%reason, "execution unwound");
            self.forget(&execution.execution_id);
        }
        Ok(Progress::Continue)
    }

    async fn expire(&self, execution: &LoadedExecution) -> Result<Progress> {
        // Reload so the failure lands after anything recorded during the wait.
        let execution = self.load(&execution.execution_id).await?;
        if execution.terminal_status().is_some() {
            return Ok(Progress::Continue);
        }
        self.unwind(&execution, "execution timed out".to_string())
            .await
    }

    async fn start_child(
        &self,
        parent: &ExecutionId,
        child: &ExecutionId,
        workflow_type: &str,
        input: Value,
        options: StartOptions,
    ) -> Result<()> {
        match self
            .create_execution(child, workflow_type, input, Some(parent.clone()), options)
            .await
        {
            Ok(_) => Ok(()),
            Err(EngineError::History(e)) if e.is_conflict() => {
                tracing::debug!(child = %child, "child already started; reusing it");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn run_child<'a>(
        &'a self,
        child: &'a ExecutionId,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionStatus>> + Send + 'a>> {
        Box::pin(self.run_execution(child))
    }

    /// Runs `work` unless the execution is canceled or its deadline passes
    /// first. Wake-ups that are not cancellations leave `work` running.
    async fn guarded<F: Future>(
        &self,
        execution_id: &ExecutionId,
        waker: &Notify,
        deadline: DateTime<Utc>,
        work: F,
    ) -> Result<Guarded<F::Output>> {
        tokio::pin!(work);
        let expiry = tokio::time::sleep(remaining(self.clock.now(), deadline));
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                output = &mut work => return Ok(Guarded::Finished(output)),
                _ = &mut expiry => return Ok(Guarded::Expired),
                _ = waker.notified() => {
                    if self.load(execution_id).await?.cancel_reason().is_some() {
                        return Ok(Guarded::Canceled);
                    }
                }
            }
        }
    }

    /// Invokes an activity, recording dispatch metrics.
    async fn invoke_activity(
        &self,
        name: &str,
        input: Value,
        options: ActivityOptions,
    ) -> std::result::Result<Value, ActivityError> {
        metrics::counter!("activities_dispatched_total", "activity" => name.to_string())
            .increment(1);

        let result = self.dispatch_activity(name, input, options).await;
        if result.is_err() {
            metrics::counter!("activity_failures_total", "activity" => name.to_string())
                .increment(1);
        }
        result
    }

    /// Waits for an activity slot within `schedule_to_start_timeout`, then
    /// runs the activity within `start_to_close_timeout`.
    async fn dispatch_activity(
        &self,
        name: &str,
        input: Value,
        options: ActivityOptions,
    ) -> std::result::Result<Value, ActivityError> {
        let slot = tokio::time::timeout(
            options.schedule_to_start_timeout,
            Arc::clone(&self.activity_slots).acquire_owned(),
        )
        .await;
        let _permit = match slot {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ActivityError::permanent("activity slots closed")),
            Err(_) => return Err(ActivityError::timed_out(TimeoutClass::ScheduleToStart)),
        };

        let handler = self
            .registry
            .activity(name)
            .ok_or_else(|| ActivityError::permanent(format!("unknown activity {name}")))?;

        let started = Instant::now();
        let result = tokio::time::timeout(options.start_to_close_timeout, handler.invoke(input))
            .await
            .unwrap_or_else(|_| Err(ActivityError::timed_out(TimeoutClass::StartToClose)));
        metrics::histogram!("activity_duration_seconds", "activity" => name.to_string())
            .record(started.elapsed().as_secs_f64());
        result
    }

    /// Appends `event` right after the loaded history.
    ///
    /// Returns false if someone else appended first; the caller reloads and
    /// decides again.
    async fn record(&self, execution: &LoadedExecution, event: &HistoryEvent) -> Result<bool> {
        match self
            .append_at(
                &execution.execution_id,
                execution.workflow_type(),
                execution.sequence,
                event,
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_conflict() => {
                tracing::debug!(event = event.event_type(), "history moved on; deciding again");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Appends an event that must not be lost, retrying on conflicts.
    async fn append_fact(
        &self,
        execution_id: &ExecutionId,
        workflow_type: &str,
        event: &HistoryEvent,
    ) -> Result<Sequence> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self
                .store
                .current_sequence(execution_id)
                .await?
                .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.clone()))?;

            match self.append_at(execution_id, workflow_type, current, event).await {
                Ok(sequence) => return Ok(sequence),
                Err(e) if e.is_conflict() && attempt < MAX_APPEND_ATTEMPTS => {
                    tracing::debug!(attempt, event = event.event_type(), "append conflict; retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn append_at(
        &self,
        execution_id: &ExecutionId,
        workflow_type: &str,
        after_sequence: Sequence,
        event: &HistoryEvent,
    ) -> std::result::Result<Sequence, HistoryError> {
        let record = HistoryRecord::builder()
            .execution_id(execution_id.clone())
            .workflow_type(workflow_type)
            .sequence(after_sequence.next())
            .event_type(event.event_type())
            .timestamp(self.clock.now())
            .payload(event)?
            .build()?;

        self.store
            .append_one(record, AppendOptions::expect_sequence(after_sequence))
            .await
    }

    fn waker(&self, execution_id: &ExecutionId) -> Arc<Notify> {
        let mut wakers = self.wakers.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            wakers
                .entry(execution_id.clone())
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }

    fn wake(&self, execution_id: &ExecutionId) {
        let wakers = self.wakers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(waker) = wakers.get(execution_id) {
            waker.notify_one();
        }
    }

    fn forget(&self, execution_id: &ExecutionId) {
        self.wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(execution_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestration::activities::NOTIFY_ORDER_RECEIVED;
    use serde_json::json;

    fn execution(events: Vec<HistoryEvent>) -> LoadedExecution {
        let started = HistoryEvent::execution_started(
            "HandleEatsOrder",
            json!({}),
            None,
            StartOptions::default(),
        );
        let mut all = vec![started];
        all.extend(events);
        let HistoryEvent::ExecutionStarted(data) = all[0].clone() else {
            unreachable!()
        };
        LoadedExecution {
            execution_id: ExecutionId::new("eats_order_o1"),
            started: data,
            started_at: Utc::now(),
            sequence: Sequence::new(all.len() as i64),
            events: all,
        }
    }

    #[test]
    fn test_pending_tracks_open_activity() {
        let execution = execution(vec![HistoryEvent::activity_scheduled(
            1,
            NOTIFY_ORDER_RECEIVED,
            json!({"a": 1}),
            ActivityOptions::default(),
        )]);
        let pending = execution.pending().unwrap();
        assert!(pending.matches(&Command::ScheduleActivity {
            name: NOTIFY_ORDER_RECEIVED.to_string(),
            input: json!({"a": 1}),
            options: ActivityOptions::default(),
        }));
        assert!(!pending.matches(&Command::ScheduleActivity {
            name: NOTIFY_ORDER_RECEIVED.to_string(),
            input: json!({"a": 2}),
            options: ActivityOptions::default(),
        }));
        assert_eq!(execution.next_seq(), 2);
    }

    #[test]
    fn test_completions_close_pending() {
        let execution = execution(vec![
            HistoryEvent::activity_scheduled(
                1,
                NOTIFY_ORDER_RECEIVED,
                json!(null),
                ActivityOptions::default(),
            ),
            HistoryEvent::activity_completed(1, NOTIFY_ORDER_RECEIVED, json!(null)),
            HistoryEvent::signal_wait_started(2, "restaurant-decision", None),
            HistoryEvent::signal_received("restaurant-decision", json!("accept")),
        ]);
        assert_eq!(execution.pending(), None);
        assert_eq!(execution.next_seq(), 3);
    }

    #[test]
    fn test_signal_on_other_channel_keeps_wait_open() {
        let execution = execution(vec![
            HistoryEvent::signal_wait_started(1, "restaurant-decision", None),
            HistoryEvent::signal_received("driver-location", json!("near")),
        ]);
        assert!(matches!(execution.pending(), Some(Pending::Signal { .. })));
    }

    #[test]
    fn test_terminal_and_cancel_are_detected() {
        let execution = execution(vec![
            HistoryEvent::cancel_requested("customer left"),
            HistoryEvent::execution_failed("canceled: customer left"),
        ]);
        assert_eq!(execution.cancel_reason(), Some("customer left"));
        assert_eq!(
            execution.terminal_status(),
            Some(ExecutionStatus::Failed("canceled: customer left".to_string()))
        );
    }
}
