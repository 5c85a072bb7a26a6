//! `eats` entry point.

use clap::{Parser, ValueEnum};
use cli::{CliError, CliResult, Config, commands};
use history::PostgresHistoryStore;
use metrics_exporter_prometheus::PrometheusBuilder;
use orchestration::{Decision, DecisionWait};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Uber Eats style order fulfillment on a durable history.
#[derive(Parser)]
#[command(name = "eats")]
#[command(version)]
struct Cli {
    /// Mode to run in
    #[arg(short, long, value_enum, default_value_t = Mode::Trigger)]
    mode: Mode,

    /// Order execution to signal (signal mode)
    #[arg(short = 'w', long = "workflow-id")]
    workflow_id: Option<String>,

    /// How long a triggered order waits for the restaurant: `unbounded` or
    /// seconds (trigger mode)
    #[arg(long)]
    decision_wait: Option<DecisionWait>,

    /// Decision to send (signal mode)
    #[arg(long, default_value = "accept")]
    decision: Decision,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Register the orchestrations and serve until interrupted
    Worker,
    /// Start one order with the sample cart
    Trigger,
    /// Deliver a restaurant decision to an order
    Signal,
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Connect the history store
    let store = PostgresHistoryStore::connect(&config.database_url).await?;
    store.run_migrations().await?;
    let engine = commands::build_engine(store, &config)?;

    // 3. Run the selected mode
    match cli.mode {
        Mode::Worker => {
            PrometheusBuilder::new()
                .with_http_listener(config.metrics_socket()?)
                .install()?;
            tracing::info!(metrics_addr = %config.metrics_addr, "metrics exporter listening");

            commands::run_worker(engine, &config, shutdown_signal()).await?;
            tracing::info!("worker shut down gracefully");
        }
        Mode::Trigger => {
            let decision_wait = cli.decision_wait.ok_or_else(|| {
                CliError::Config(
                    "--decision-wait is required in trigger mode (`unbounded` or seconds)"
                        .to_string(),
                )
            })?;
            let handle = commands::trigger(engine, decision_wait).await?;
            println!("{}", handle.execution_id);
        }
        Mode::Signal => {
            let workflow_id = cli.workflow_id.ok_or_else(|| {
                CliError::Config("--workflow-id is required in signal mode".to_string())
            })?;
            commands::signal(engine, &workflow_id, cli.decision).await?;
        }
    }

    Ok(())
}
