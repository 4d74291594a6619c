use std::sync::Arc;

use anyhow::{Context, Result};
use coordrtt_core::agent::connect_agent;
use coordrtt_core::{
    PublishedSnapshot, RefreshScheduler, RttServiceConfig, SnapshotBuilder, snapshot_cache,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::api::{ApiState, create_api_routes};
use crate::config::CliConfig;

async fn scheduler_for(service: &RttServiceConfig) -> Result<RefreshScheduler> {
    let agent = connect_agent(&service.agent)
        .await
        .with_context(|| format!("failed to connect to agent at {}", service.agent.rpc_addr))?;
    info!(
        agent = %service.agent.rpc_addr,
        mode = service.rtt.mode.label(),
        scope = ?service.rtt.scope,
        "connected to cluster agent"
    );
    let builder = SnapshotBuilder::from_config(agent, &service.rtt, service.agent.request_timeout);
    let (publisher, _reader) = snapshot_cache();
    Ok(RefreshScheduler::new(builder, publisher, service.refresh))
}

/// Runs the refresh loop and the query server until Ctrl-C.
pub async fn run_server(config: &CliConfig) -> Result<()> {
    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    let scheduler = scheduler_for(&config.service).await?;

    let state = ApiState::new(scheduler.reader());
    let refresh = scheduler.spawn();

    let app = create_api_routes().with_state(state);
    info!(addr = %listener.local_addr()?, "serving cluster status");
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error");

    refresh.request_shutdown();
    refresh.wait().await;
    info!("coordrtt stopped");
    served
}

/// Performs a single refresh and returns the published snapshot.
pub async fn build_once(service: &RttServiceConfig) -> Result<Arc<PublishedSnapshot>> {
    let scheduler = scheduler_for(service).await?;
    scheduler
        .refresh_once()
        .await
        .context("failed to build cluster snapshot")?;
    scheduler
        .reader()
        .read()
        .context("snapshot missing after refresh")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
