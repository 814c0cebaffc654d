#![forbid(unsafe_code)]

use clap::Parser;
use rdvc::config::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };

    if let Some(ref path) = cli.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("failed to open log file {path:?}: {e}"))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    match cli.command {
        Commands::Start {
            server,
            community,
            stun,
        } => start(server, community, stun).await,
    }
}

#[cfg(feature = "webrtc")]
async fn start(server: String, community: String, stun: Vec<String>) -> anyhow::Result<()> {
    use rdv_common::{Community, Mac};
    use rdvc::client::SignalingClient;
    use rdvc::config::ClientConfig;
    use rdvc::peers::ConnectedHook;
    use rdvc::rtc::PeerConnector;
    use rdvc::webrtc::WebRtcConnector;
    use std::sync::Arc;
    use tokio::sync::watch;
    use tracing::info;

    let config = ClientConfig::new(server, Community::new(community), stun);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    let connector: Arc<dyn PeerConnector> =
        Arc::new(WebRtcConnector::new(config.ice_servers.clone()));
    let on_connected: ConnectedHook = Arc::new(|remote: &Mac| {
        info!(%remote, "peer connected");
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let client = SignalingClient::new(Arc::new(config), connector, on_connected);
    client.run(shutdown_rx).await?;
    info!("client closed cleanly");
    Ok(())
}

#[cfg(not(feature = "webrtc"))]
async fn start(_server: String, _community: String, _stun: Vec<String>) -> anyhow::Result<()> {
    anyhow::bail!("this build has no peer-connection stack; rebuild with the `webrtc` feature")
}
