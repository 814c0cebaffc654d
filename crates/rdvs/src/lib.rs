//! rdv rendezvous server — community membership and signaling relay.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Community rosters, peer endpoints, and the introduction ledger.
pub mod community;
/// CLI argument parsing and server configuration.
pub mod config;
mod connection;
/// Error types for rendezvous server operations.
pub mod error;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
/// Accept loop and shared server state.
pub mod server;

pub use server::{run, ServerState};
