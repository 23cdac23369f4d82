//! Regression job
//!
//! Consumes container usage samples, keeps one online least-squares model per
//! machine/container pair and publishes the freshest model of every count
//! window.

use anyhow::Result;
use clap::Parser;
use regression_lib::{
    api,
    health::{components, HealthRegistry},
    observability::{PipelineMetrics, StructuredLogger},
    pipeline::Pipeline,
    state::FileCheckpointStore,
    transport::{open_input, open_output},
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const JOB_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!("Starting regression-job");

    let cli = config::Cli::parse();
    let config = config::JobConfig::load(&cli)?;
    let bus = config.bus();
    info!(
        topic = %bus.topic,
        checkpoint_dir = %config.checkpoint_dir.display(),
        "Job configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    for name in components::ALL {
        health_registry.register(name).await;
    }

    let metrics = PipelineMetrics::new();

    let logger = StructuredLogger::new("regression-job");
    logger.log_startup(JOB_VERSION, &bus, config.partitions);

    // Start health and metrics server
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics.clone()));
    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server stopped");
        }
    });

    let source = open_input(&config.input, &bus).await?;
    let sink = open_output(&config.output, &bus).await?;
    let checkpoints = Arc::new(FileCheckpointStore::new(&config.checkpoint_dir));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(forward_shutdown(tokio::signal::ctrl_c(), shutdown_tx));

    let pipeline = Pipeline::new(config.pipeline(), checkpoints, metrics, logger)
        .with_health(health_registry.clone());

    // Mark job as ready once the transports are open
    health_registry.set_ready(true).await;

    let report = pipeline.run(source, sink, shutdown_rx).await;
    health_registry.set_ready(false).await;

    let report = report?;
    info!(
        messages_read = report.messages_read,
        samples_dropped = report.samples_dropped,
        updates_emitted = report.updates_emitted,
        records_published = report.records_published,
        checkpoints = report.checkpoints_completed,
        final_offset = report.final_offset,
        stop_reason = %report.stop_reason,
        "Job finished"
    );

    Ok(())
}

/// Broadcast shutdown once `signal` fires
///
/// A closed shutdown channel stops the pipeline, so the sender is held open
/// forever when no signal handler could be installed.
async fn forward_shutdown<F>(signal: F, shutdown_tx: broadcast::Sender<()>)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("SIGINT received");
            let _ = shutdown_tx.send(());
        }
        Err(e) => {
            warn!(
                error = %e,
                "Failed to install SIGINT handler; job stops only at end of input"
            );
            std::future::pending::<()>().await;
            drop(shutdown_tx);
        }
    }
}
