#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use rdvs::community::CommunityRegistry;
use rdvs::config::{Args, ServerConfig};
use rdvs::metrics::{start_metrics_server, HealthState};
use rdvs::server::ServerState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config: ServerConfig = args.into();

    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let metrics_addr = config.metrics_addr;
    let state = Arc::new(ServerState {
        registry: CommunityRegistry::new(),
        config: config.clone(),
    });

    let listener = TcpListener::bind(config.listen).await?;
    info!("bound to {}", config.listen);

    let health_state = HealthState::new();

    tokio::spawn({
        let health_state = health_state.clone();
        async move {
            if let Err(e) = start_metrics_server(metrics_addr, health_state).await {
                warn!("metrics server error: {}", e);
            }
        }
    });

    tokio::select! {
        result = rdvs::run(listener, state) => {
            if let Err(e) = result {
                tracing::error!("server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    Ok(())
}
