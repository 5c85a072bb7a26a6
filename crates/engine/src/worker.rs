//! Polling worker that drives open executions.

use std::collections::HashMap;
use std::time::Duration;

use common::ExecutionId;
use history::HistoryStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use crate::engine::{Engine, ExecutionStatus};
use crate::error::Result;

/// Worker settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often the store is scanned for executions to drive.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Drives every open root execution on its own task.
///
/// Executions suspended on a signal finish their task and are picked up
/// again by a later poll, so signals written by another process are seen
/// within one poll interval.
pub struct Worker<S> {
    engine: Engine<S>,
    config: WorkerConfig,
    running: HashMap<ExecutionId, JoinHandle<()>>,
}

impl<S> Worker<S>
where
    S: HistoryStore + Clone + 'static,
{
    /// Creates a worker. A zero poll interval falls back to the default.
    pub fn new(engine: Engine<S>, mut config: WorkerConfig) -> Self {
        if config.poll_interval.is_zero() {
            let fallback = WorkerConfig::default().poll_interval;
            tracing::warn!(
                poll_interval_ms = fallback.as_millis() as u64,
                "zero poll interval; using the default"
            );
            config.poll_interval = fallback;
        }
        Self {
            engine,
            config,
            running: HashMap::new(),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Polls until `shutdown` flips to true or its sender is dropped.
    ///
    /// In-flight executions are aborted on shutdown; their history lets the
    /// next worker resume them.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            workflows = ?self.engine.registry().workflow_types().collect::<Vec<_>>(),
            "worker started"
        );

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll().await {
                        tracing::error!(error = %e, "poll failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        for (execution_id, handle) in self.running.drain() {
            tracing::debug!(%execution_id, "aborting in-flight execution");
            handle.abort();
        }
        tracing::info!("worker stopped");
    }

    /// Spawns a driver for every open execution that does not have one.
    ///
    /// Returns the number of drivers spawned.
    pub async fn poll(&mut self) -> Result<usize> {
        self.running.retain(|_, handle| !handle.is_finished());

        let mut spawned = 0;
        for execution_id in self.engine.open_executions().await? {
            if self.running.contains_key(&execution_id) {
                continue;
            }

            let engine = self.engine.clone();
            let id = execution_id.clone();
            let handle = tokio::spawn(async move {
                match engine.run_execution(&id).await {
                    Ok(ExecutionStatus::Suspended { waiting_on, .. }) => {
                        tracing::debug!(execution_id = %id, %waiting_on, "execution suspended");
                    }
                    Ok(status) => {
                        tracing::info!(execution_id = %id, ?status, "execution finished");
                    }
                    Err(e) => {
                        tracing::error!(execution_id = %id, error = %e, "execution driver failed");
                    }
                }
            });
            self.running.insert(execution_id, handle);
            spawned += 1;
        }
        Ok(spawned)
    }

    /// Number of executions currently being driven.
    pub fn in_flight(&self) -> usize {
        self.running.values().filter(|h| !h.is_finished()).count()
    }
}
