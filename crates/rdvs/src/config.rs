use clap::Parser;
use std::net::SocketAddr;

/// CLI arguments for the rendezvous server.
#[derive(Parser, Debug, Clone)]
#[command(name = "rdvs")]
#[command(about = "rdv rendezvous server")]
#[command(version)]
pub struct Args {
    /// Socket address to listen on.
    #[arg(long, default_value = "0.0.0.0:9090", env = "RDVS_LISTEN")]
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9091", env = "RDVS_METRICS")]
    pub metrics_addr: SocketAddr,
    /// Maximum concurrent registered peers.
    #[arg(long, default_value = "4096", env = "RDVS_MAX_CONNS")]
    pub max_conns: usize,
    /// Maximum WebSocket message size in bytes.
    #[arg(long, default_value = "131072", env = "RDVS_MAX_MESSAGE_SIZE")]
    pub max_message_size: usize,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    pub metrics_addr: SocketAddr,
    /// Maximum concurrent registered peers.
    pub max_conns: usize,
    /// Maximum WebSocket message size in bytes.
    pub max_message_size: usize,
}

/// Largest message size the server will agree to buffer.
const MAX_ALLOWED_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

impl ServerConfig {
    /// Validates the configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns a description of the first offending value.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 1_000_000 {
            return Err("max_conns exceeds reasonable limit (1,000,000)".to_string());
        }

        // A signaling message must at least fit an SDP blob.
        if self.max_message_size < 1024 {
            return Err("max_message_size must be at least 1024 bytes".to_string());
        }
        if self.max_message_size > MAX_ALLOWED_MESSAGE_SIZE {
            return Err(format!(
                "max_message_size exceeds maximum allowed ({} bytes)",
                MAX_ALLOWED_MESSAGE_SIZE
            ));
        }
        Ok(())
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            metrics_addr: args.metrics_addr,
            max_conns: args.max_conns,
            max_message_size: args.max_message_size,
        }
    }
}
