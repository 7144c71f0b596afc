//! Workflow Worker Binary
//!
//! Runs one workflow service: consumers, outbox publisher, SLA sweeper and
//! the health/command HTTP surface.
//!
//! # Usage
//!
//! ```bash
//! # In-memory stores, every variant
//! cargo run --bin workflow-worker
//!
//! # PCIC service on PostgreSQL and NATS JetStream
//! WORKFLOW__SERVICE_NAME=pcic-service \
//! WORKFLOW__DATABASE__URL=postgres://localhost/pcic \
//! WORKFLOW__BUS__URL=nats://localhost:4222 \
//! WORKFLOW__VARIANTS=VERIFICATION,CLAIMS \
//! cargo run --bin workflow-worker
//! ```
//!
//! See [`interface_worker::ServiceConfig`] for every setting.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;

use domain_workflow::TransitionValidator;
use interface_worker::{
    create_router, telemetry::init_tracing, LogNotifier, Ports, Service, ServiceConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (useful for local development)
    dotenvy::dotenv().ok();

    let config = ServiceConfig::from_env().context("loading configuration")?;
    init_tracing(&config.log_level, config.log_format)?;
    config.validate().context("validating configuration")?;

    tracing::info!(
        service = %config.service_name,
        host = %config.host,
        port = config.port,
        variants = ?config.variants,
        persistent = config.database.is_some(),
        brokered = config.bus.is_some(),
        "Starting workflow worker"
    );

    // A malformed transition table is fatal
    let validator = Arc::new(TransitionValidator::canonical().context("loading transition tables")?);
    let ports = Ports::from_config(&config).await?;
    let service = Service::new(&config, validator, ports, Arc::new(LogNotifier));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = service.start(shutdown_rx).await?;

    let addr: SocketAddr = config
        .server_addr()
        .parse()
        .with_context(|| format!("invalid listen address {}", config.server_addr()))?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Server listening");

    axum::serve(listener, create_router(service.state()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The HTTP server only returns once a signal arrived
    shutdown_tx.send_replace(true);
    running.join().await;

    tracing::info!("Workflow worker stopped");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
