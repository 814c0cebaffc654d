use rdv_common::MessageError;
use thiserror::Error;

/// Errors that end a signaling session.
#[derive(Error, Debug)]
pub enum RdvcError {
    /// The server rejected the application; the chosen mac is already in use.
    #[error("mac conflict: the chosen identifier is already in use")]
    MacConflict,
    /// The server sent a frame that was not valid JSON.
    #[error(transparent)]
    Malformed(#[from] MessageError),
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// The server closed the transport before the client exited.
    #[error("connection closed by server")]
    ConnectionClosed,
}
