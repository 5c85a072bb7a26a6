//! The worker, trigger and signal modes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::ExecutionId;
use engine::{
    Engine, EngineConfig, ExecutionHandle, OrderClient, SystemClock, Worker, WorkerConfig,
    order_registry,
};
use history::HistoryStore;
use orchestration::{ConsoleNotifier, Decision, DecisionWait, Order, OrderSettings, StartOptions};
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{CliError, CliResult};

/// Bound on a triggered order's whole lifetime.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Bound on one decision pass of a triggered order.
pub const DECISION_TIMEOUT: Duration = Duration::from_secs(60);

/// The sample cart placed by `trigger`.
pub fn sample_order() -> Order {
    Order::new(Uuid::new_v4().to_string(), ["cheeseburger", "diet coke"])
}

/// Builds an engine with both order workflows and console notifications.
pub fn build_engine<S>(store: S, config: &Config) -> CliResult<Engine<S>>
where
    S: HistoryStore + Clone + 'static,
{
    let registry = order_registry(Arc::new(ConsoleNotifier))?;
    Ok(Engine::new(
        store,
        Arc::new(registry),
        Arc::new(SystemClock),
        EngineConfig {
            max_concurrent_activities: config.max_concurrent_activities,
        },
    ))
}

/// Serves executions until `shutdown` resolves.
pub async fn run_worker<S>(
    engine: Engine<S>,
    config: &Config,
    shutdown: impl Future<Output = ()>,
) -> CliResult<()>
where
    S: HistoryStore + Clone + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = Worker::new(
        engine,
        WorkerConfig {
            poll_interval: config.poll_interval,
        },
    );
    let handle = tokio::spawn(worker.run(shutdown_rx));

    shutdown.await;
    // The worker may already be gone; nothing left to stop then.
    let _ = shutdown_tx.send(true);

    handle.await.map_err(|e| {
        tracing::error!(error = %e, "worker task ended abnormally");
        CliError::Worker(e)
    })
}

/// Starts one order for the sample cart with random user and restaurant.
pub async fn trigger<S>(engine: Engine<S>, decision_wait: DecisionWait) -> CliResult<ExecutionHandle>
where
    S: HistoryStore + Clone + 'static,
{
    let client = OrderClient::new(engine).with_start_options(StartOptions {
        execution_timeout: EXECUTION_TIMEOUT,
        decision_timeout: DECISION_TIMEOUT,
    });

    let handle = client
        .place_order(
            &Uuid::new_v4().to_string(),
            sample_order(),
            &Uuid::new_v4().to_string(),
            OrderSettings::new(decision_wait),
        )
        .await?;

    tracing::info!(execution_id = %handle.execution_id, ?decision_wait, "order triggered");
    Ok(handle)
}

/// Delivers a restaurant decision to an order execution.
pub async fn signal<S>(engine: Engine<S>, workflow_id: &str, decision: Decision) -> CliResult<()>
where
    S: HistoryStore + Clone + 'static,
{
    if workflow_id.trim().is_empty() {
        return Err(CliError::Config(
            "a workflow id is required in signal mode".to_string(),
        ));
    }

    let execution_id = ExecutionId::new(workflow_id);
    OrderClient::new(engine)
        .send_decision(&execution_id, decision)
        .await?;

    tracing::info!(%execution_id, ?decision, "decision sent");
    Ok(())
}
