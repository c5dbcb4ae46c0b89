use anyhow::{Context, Result};
use std::sync::Arc;
use tankduel_server::api::{self, ApiState};
use tankduel_server::cluster::probe::udp_responder;
use tankduel_server::{ClientHub, ClusterNode, NodeConfig};
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("=== Game Server Starting ===");

    // Step 1: Load configuration
    tracing::info!("[1/4] Loading configuration from environment...");
    let config = NodeConfig::from_env()?;
    tracing::info!(
        server_id = %config.id(),
        rpc = %config.identity.rpc_addr,
        reply_queue = %config.identity.reply_queue,
        peers = config.peers.len(),
        probe = ?config.probe_mode,
        "configuration loaded"
    );

    // Step 2: Bind sockets
    tracing::info!("[2/4] Binding API and probe sockets...");
    let api_addr = format!("{}:{}", config.bind_host, config.api_port);
    let listener = TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("Failed to bind API listener on {}", api_addr))?;
    let udp_addr = format!("{}:{}", config.bind_host, config.udp_port);
    let udp = UdpSocket::bind(&udp_addr)
        .await
        .with_context(|| format!("Failed to bind UDP probe socket on {}", udp_addr))?;

    // Step 3: Start serving
    tracing::info!("[3/4] Starting HTTP API and probe responder...");
    let grace = config.timings.startup_grace;
    let hub = Arc::new(ClientHub::new());
    let node = ClusterNode::new(config, hub.clone())?;

    let state = ApiState {
        node: node.clone(),
        hub,
    };
    tokio::spawn(async move {
        let shutdown = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        if let Err(e) = api::serve(listener, state, shutdown).await {
            tracing::error!(error = %e, "HTTP API server error");
        }
    });
    tokio::spawn(async move {
        if let Err(e) = udp_responder(udp).await {
            tracing::error!(error = %e, "UDP probe responder error");
        }
    });

    // Step 4: Give peers a moment to come up, then elect
    tracing::info!(grace_ms = grace.as_millis() as u64, "[4/4] Waiting for peers before first election...");
    sleep(grace).await;
    let leader = node.elect_initial().await;
    tracing::info!(leader = %leader, is_leader = node.is_leader().await, "=== Game Server Ready ===");

    tokio::spawn(node.clone().run_liveness());

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    tracing::info!("shutting down");
    Ok(())
}
