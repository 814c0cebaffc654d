use rdv_common::{Mac, MessageError};
use thiserror::Error;

/// Errors that can occur during rendezvous server operation.
#[derive(Error, Debug)]
pub enum RdvsError {
    /// A message referenced a mac with no live registration.
    #[error("unknown mac: {0}")]
    UnknownMac(Mac),
    /// The connection produced a frame that was not valid JSON.
    #[error(transparent)]
    Malformed(#[from] MessageError),
    /// The connection kept sending invalid messages.
    #[error("too many protocol violations")]
    TooManyViolations,
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
