use clap::{Parser, Subcommand};
use rdv_common::Community;
use std::path::PathBuf;

/// CLI interface for the signaling client.
#[derive(Parser)]
#[command(name = "rdvc", about = "rdv signaling client")]
#[command(version)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to a file instead of stderr.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start a signaling client.
    Start {
        /// Rendezvous server address as host:port.
        #[arg(default_value = "127.0.0.1:9090")]
        server: String,

        /// Community to join.
        #[arg(long, env = "RDVC_COMMUNITY", default_value = "lobby")]
        community: String,

        /// STUN server URL handed to the peer-connection stack.
        #[arg(long, env = "RDVC_STUN", default_value = "stun:stun.l.google.com:19302")]
        stun: Vec<String>,
    },
}

/// Runtime configuration for one signaling session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Rendezvous server address as host:port.
    pub server: String,
    /// Community to join.
    pub community: Community,
    /// Dial backoff parameters.
    pub reconnect: ReconnectConfig,
    /// Seconds between WebSocket keepalive pings.
    pub keepalive_interval: u64,
    /// STUN/TURN URLs for the peer-connection stack.
    pub ice_servers: Vec<String>,
}

/// Dial backoff parameters.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 15_000,
        }
    }
}

impl ClientConfig {
    /// Build a configuration with default backoff and keepalive settings.
    #[must_use]
    pub fn new(server: String, community: Community, ice_servers: Vec<String>) -> Self {
        Self {
            server,
            community,
            reconnect: ReconnectConfig::default(),
            keepalive_interval: 30,
            ice_servers,
        }
    }

    /// WebSocket URL of the rendezvous server.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}", self.server)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first offending value.
    pub fn validate(&self) -> Result<(), String> {
        if self.community.is_empty() {
            return Err("community must not be empty".to_string());
        }

        let Some((host, port)) = self.server.rsplit_once(':') else {
            return Err("server must be host:port".to_string());
        };
        if host.is_empty() {
            return Err("server host must not be empty".to_string());
        }
        if port.parse::<u16>().is_err() {
            return Err("server port must be a number".to_string());
        }

        if self.keepalive_interval == 0 {
            return Err("keepalive_interval must be greater than 0".to_string());
        }
        if self.reconnect.initial_delay_ms == 0 {
            return Err("reconnect.initial_delay_ms must be greater than 0".to_string());
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err("reconnect.max_delay_ms must be at least the initial delay".to_string());
        }
        Ok(())
    }
}
