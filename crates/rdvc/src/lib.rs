//! rdv signaling client — community membership and negotiation driver.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Exponential backoff for dialing the rendezvous server.
pub mod backoff;
/// Signaling session loop and message dispatch.
pub mod client;
/// CLI parsing and client configuration.
pub mod config;
/// Error types for client operations.
pub mod error;
/// Per-remote negotiation state.
pub mod peers;
/// The peer-connection dependency boundary.
pub mod rtc;
/// `webrtc`-crate backend for the peer-connection boundary.
#[cfg(feature = "webrtc")]
pub mod webrtc;
