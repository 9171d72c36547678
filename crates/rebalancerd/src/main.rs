//! Cluster rebalancer daemon
//!
//! Runs the continuous audit loop: snapshot the cluster, run the
//! configured strategy, synthesize a plan, and either execute it or
//! report it for approval.
//!
//! Engine metrics register into the default prometheus registry;
//! an embedding process exposes them via `prometheus::gather()` and
//! `TextEncoder`. The daemon itself carries no HTTP surface.

use anyhow::Result;
use rebalancer_core::{
    AuditCoordinator, EngineMetrics, NoopStrategy, StrategyRegistry, WorkloadConsolidation,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod adapters;
mod config;

const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs with env-filter, default level info.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = DAEMON_VERSION, "Starting rebalancerd");

    let config = config::DaemonConfig::load()?;
    info!(
        scope = %config.scope,
        strategy = %config.strategy,
        auto_apply = config.auto_apply,
        interval_secs = config.interval_secs,
        "Daemon configured"
    );

    // Registers into the default prometheus registry, see module docs for
    // the export path.
    let _metrics = EngineMetrics::new();

    // Strategies are registered once at startup; audit cycles only resolve.
    let registry = StrategyRegistry::new();
    registry.register(Arc::new(WorkloadConsolidation::default()))?;
    registry.register(Arc::new(NoopStrategy))?;
    info!(strategies = ?registry.names(), "Strategies registered");

    let cluster = Arc::new(adapters::FileInventorySource::new(&config.cluster_file));
    let driver = Arc::new(adapters::DryRunDriver);

    let coordinator = Arc::new(AuditCoordinator::new(
        Arc::new(registry),
        cluster.clone(),
        cluster,
        driver,
        config.audit_config(),
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let loop_handle = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run_continuous(shutdown_rx).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("SIGINT received, shutting down");
    let _ = shutdown_tx.send(());
    loop_handle.await?;

    Ok(())
}
