use crate::community::CommunityRegistry;
use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::error::RdvsError;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Shared state for the rendezvous server.
pub struct ServerState {
    /// Authoritative rosters, endpoints, and introduction ledger.
    pub registry: CommunityRegistry,
    /// Runtime server configuration.
    pub config: ServerConfig,
}

/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), RdvsError> {
    let local_addr = listener.local_addr().map_err(RdvsError::Io)?;
    info!("server listening on {}", local_addr);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if state.registry.peer_count() >= state.config.max_conns {
                    warn!("max connections reached, rejecting {}", addr);
                    drop(stream);
                    continue;
                }

                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, state).await {
                        tracing::debug!("connection from {} closed: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("failed to accept connection: {}", e);
            }
        }
    }
}
