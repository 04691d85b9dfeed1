//! # Audit Runtime
//!
//! Consumer service: broker → batcher → Postgres. See the library crate for
//! the startup sequence.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use audit_bus::{MqttBroker, MqttConfig};
use audit_ingest::PostgresSink;
use audit_runtime::{serve_metrics, AuditRuntime, RuntimeConfig, RuntimeError};
use audit_telemetry::{init_telemetry, TelemetryConfig};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::for_service("audit-runtime");
    init_telemetry(&telemetry).context("failed to initialize telemetry")?;

    let config = RuntimeConfig::from_env().context("invalid configuration")?;
    info!(
        batch_size = config.batcher.capacity,
        flush_interval = ?config.batcher.flush_interval,
        "Starting audit runtime"
    );

    let sink = PostgresSink::connect(&config.database_url, &config.pool)
        .await
        .context("failed to connect to the audit store")?;
    sink.ensure_schema()
        .await
        .context("failed to prepare the audit_logs table")?;
    let sink = Arc::new(sink);

    let mqtt = MqttConfig::from_url(&config.broker_url, config.client_id.clone())
        .context("invalid BROKER_URL")?;
    let broker = Arc::new(
        MqttBroker::connect(mqtt)
            .await
            .with_context(|| format!("failed to connect to broker at {}", config.broker_url))?,
    );

    let shutdown = CancellationToken::new();
    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], telemetry.metrics_port));
    let metrics = tokio::spawn(serve_metrics(metrics_addr, shutdown.clone()));

    let runtime = AuditRuntime::assemble(&config, broker.clone(), sink.clone(), shutdown.clone())
        .context("invalid batcher configuration")?;
    let mut running = tokio::spawn(runtime.run());

    tokio::select! {
        // The consumer only stops on its own if the subscription failed.
        joined = &mut running => {
            shutdown.cancel();
            joined_result(joined)?;
        }
        signal = wait_for_signal() => {
            signal?;
            info!("Shutdown signal received, starting graceful shutdown");
            shutdown.cancel();
            joined_result(running.await)?;
        }
    }

    if let Ok(Err(e)) = metrics.await {
        error!(error = %e, "Metrics endpoint failed");
    }
    broker.shutdown().await;
    sink.close().await;
    info!("Audit runtime exited");
    Ok(())
}

fn joined_result(joined: Result<Result<(), RuntimeError>, JoinError>) -> Result<()> {
    joined
        .context("runtime task panicked")?
        .context("audit runtime failed")
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut quit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
        _ = hangup.recv() => {}
        _ = quit.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
