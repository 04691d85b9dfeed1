//! # Account API
//!
//! ## Startup Sequence
//!
//! 1. Initialize telemetry (logging, metrics)
//! 2. Load configuration from the environment
//! 3. Connect to the broker
//! 4. Serve HTTP until SIGINT/SIGTERM/SIGHUP/SIGQUIT
//! 5. Drain in-flight requests within the grace period, then disconnect

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use account_api::{build_router, serve, ApiConfig, InMemoryAccounts};
use audit_bus::{AuditDispatcher, AuditPublisher, MqttBroker, MqttConfig};
use audit_telemetry::{init_telemetry, TelemetryConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry(&TelemetryConfig::for_service("account-api"))
        .context("failed to initialize telemetry")?;

    let config = ApiConfig::from_env().context("invalid configuration")?;

    let mqtt = MqttConfig::from_url(&config.broker_url, config.client_id.clone())
        .context("invalid BROKER_URL")?;
    let broker = Arc::new(
        MqttBroker::connect(mqtt)
            .await
            .with_context(|| format!("failed to connect to broker at {}", config.broker_url))?,
    );

    let shutdown = CancellationToken::new();
    let publisher = AuditPublisher::new(broker.clone(), config.publish_policy, shutdown.clone());
    let router = build_router(
        Arc::new(InMemoryAccounts::new()),
        AuditDispatcher::new(Arc::new(publisher)),
        config.request_timeout,
    );

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    let server = tokio::spawn(serve(listener, router, shutdown.clone()));

    wait_for_signal().await?;
    info!("Shutdown signal received, starting graceful shutdown");
    shutdown.cancel();

    match tokio::time::timeout(config.shutdown_grace, server).await {
        Ok(joined) => joined
            .context("server task panicked")?
            .context("server error")?,
        Err(_) => {
            error!(grace = ?config.shutdown_grace, "Graceful shutdown timed out");
            bail!("graceful shutdown timed out");
        }
    }

    broker.shutdown().await;
    Ok(())
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
