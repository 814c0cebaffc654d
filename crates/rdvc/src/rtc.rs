//! Boundary to the external peer-connection stack.
//!
//! The signaler drives negotiation through these traits and never interprets
//! the payloads it passes around: session descriptions and ICE candidates are
//! opaque strings minted and consumed by the backend. Backends report
//! asynchronous activity (local candidates, data-channel events) through the
//! event queue handed to [`PeerConnector::connect`].

use async_trait::async_trait;
use rdv_common::Mac;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors surfaced by the peer-connection stack.
#[derive(Debug, Error)]
pub enum RtcError {
    /// The stack failed to construct a peer connection.
    #[error("peer connection setup failed: {0}")]
    Setup(String),
    /// A session description could not be produced or installed.
    #[error("description error: {0}")]
    Description(String),
    /// An ICE candidate could not be applied.
    #[error("candidate error: {0}")]
    Candidate(String),
    /// The data channel could not be created.
    #[error("data channel error: {0}")]
    Channel(String),
}

/// Events pushed by the peer-connection stack into the client loop.
#[derive(Debug)]
pub enum PeerEvent {
    /// The stack produced a local ICE candidate for `remote`.
    LocalCandidate {
        /// Remote the candidate belongs to.
        remote: Mac,
        /// Opaque candidate string.
        candidate: String,
    },
    /// A data channel to `remote` opened; either side may have created it.
    ChannelOpen {
        /// Remote the channel reaches.
        remote: Mac,
    },
    /// Application payload arrived from `remote`.
    ChannelMessage {
        /// Sending remote.
        remote: Mac,
        /// Raw payload bytes.
        data: Vec<u8>,
    },
    /// The data channel to `remote` closed.
    ChannelClosed {
        /// Remote the channel reached.
        remote: Mac,
    },
}

/// Sender half used by backends to report [`PeerEvent`]s.
pub type PeerEvents = mpsc::UnboundedSender<PeerEvent>;

/// One negotiation-capable connection to a single remote peer.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Produce a local session description offer.
    async fn create_offer(&self) -> Result<String, RtcError>;
    /// Produce a local session description answering the installed offer.
    async fn create_answer(&self) -> Result<String, RtcError>;
    /// Install a local session description.
    async fn set_local_description(&self, description: &str) -> Result<(), RtcError>;
    /// Install the remote peer's session description.
    async fn set_remote_description(&self, description: &str) -> Result<(), RtcError>;
    /// Apply a remote ICE candidate.
    async fn add_ice_candidate(&self, candidate: &str) -> Result<(), RtcError>;
    /// Create the outgoing data channel; its lifecycle is reported through
    /// the event queue.
    async fn create_data_channel(&self, label: &str) -> Result<(), RtcError>;
    /// Tear the connection down.
    async fn close(&self);
}

/// Factory producing peer connections wired to an event queue.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Build a connection for negotiating with `remote`.
    async fn connect(
        &self,
        remote: &Mac,
        events: PeerEvents,
    ) -> Result<Box<dyn PeerConnection>, RtcError>;
}
