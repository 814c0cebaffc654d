use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use rdv_common::{Mac, Message, MessageError};

use crate::community::{ApplyOutcome, PeerSink};
use crate::error::RdvsError;
use crate::metrics::{counters, gauges};
use crate::server::ServerState;

/// Discarded messages tolerated on one connection before it is closed.
const MAX_PROTOCOL_VIOLATIONS: u32 = 8;

/// Per-connection bookkeeping: the mac bound by an accepted `Application`
/// and the running protocol-violation count.
struct ConnState {
    bound: Option<Mac>,
    violations: u32,
}

/// Drive one client connection: accept the WebSocket, then loop over inbound
/// frames and the connection's write queue until the transport ends.
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), RdvsError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(state.config.max_message_size),
        max_frame_size: Some(state.config.max_message_size),
        ..WebSocketConfig::default()
    };
    let ws_stream =
        tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)).await?;
    debug!(%peer_addr, "websocket connection established");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (sink_tx, mut sink_rx) = mpsc::unbounded_channel::<String>();
    let mut conn = ConnState {
        bound: None,
        violations: 0,
    };

    gauges::inc_connections_active();
    let result = loop {
        tokio::select! {
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Err(e) = handle_frame(&text, &state, &sink_tx, &mut conn) {
                            break Err(e);
                        }
                        if conn.violations > MAX_PROTOCOL_VIOLATIONS {
                            break Err(RdvsError::TooManyViolations);
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if let Err(e) = ws_tx.send(WsMessage::Pong(data)).await {
                            debug!("failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break Ok(()),
                    Some(Err(e)) => break Err(RdvsError::WebSocket(e)),
                    _ => {}
                }
            }
            Some(text) = sink_rx.recv() => {
                if let Err(e) = ws_tx.send(WsMessage::Text(text)).await {
                    break Err(RdvsError::WebSocket(e));
                }
            }
        }
    };

    // Transport loss without an explicit Exited still resigns the peer.
    if let Some(mac) = conn.bound.take() {
        if state.registry.is_registered(&mac) {
            info!(%mac, "connection ended without exited, resigning peer");
            if let Err(e) = state.registry.exited(&mac) {
                debug!("implicit exit failed: {}", e);
            }
            counters::resignations_total("implicit");
            gauges::set_communities(state.registry.community_count());
        }
    }
    gauges::dec_connections_active();
    result
}

/// Decode and dispatch one inbound frame. Per-message protocol violations
/// are logged and counted; only malformed JSON is fatal here.
fn handle_frame(
    text: &str,
    state: &ServerState,
    sink_tx: &PeerSink,
    conn: &mut ConnState,
) -> Result<(), RdvsError> {
    let message = match Message::parse(text) {
        Ok(message) => message,
        Err(error @ MessageError::Malformed(_)) => {
            warn!("dropping connection on malformed frame: {}", error);
            return Err(error.into());
        }
        Err(error) => {
            warn!("ignoring invalid frame: {}", error);
            conn.violations += 1;
            counters::messages_dropped_total("invalid");
            return Ok(());
        }
    };

    let opcode = message.opcode();
    match message {
        Message::Application { community, mac } => {
            if conn.bound.is_some() {
                warn!(%mac, "second application on one connection, ignoring");
                conn.violations += 1;
                return Ok(());
            }
            match state.registry.apply(&community, &mac, sink_tx.clone()) {
                ApplyOutcome::Accepted => {
                    debug!(%mac, %community, "peer accepted");
                    conn.bound = Some(mac);
                    counters::applications_total("accepted");
                    gauges::set_communities(state.registry.community_count());
                }
                ApplyOutcome::Rejected => {
                    info!(%mac, "application rejected, mac already in use");
                    counters::applications_total("rejected");
                }
            }
        }
        Message::Ready { mac } => match state.registry.ready(&mac) {
            Ok(introduced) => {
                debug!(%mac, introduced, "peer ready");
                counters::introductions_total(introduced as u64);
            }
            Err(error) => {
                warn!("dropping ready: {}", error);
                conn.violations += 1;
            }
        },
        Message::Offer(envelope) | Message::Answer(envelope) | Message::Candidate(envelope) => {
            // Forwarded byte-for-byte; a missing receiver raced an exit and
            // is not this connection's fault.
            if state.registry.relay(&envelope.receiver, text) {
                counters::messages_relayed_total();
            } else {
                warn!(receiver = %envelope.receiver, "relay receiver missing, dropping message");
                counters::messages_dropped_total("offline");
            }
        }
        Message::Exited { mac } => match state.registry.exited(&mac) {
            Ok(()) => {
                info!(%mac, "peer exited");
                if conn.bound.as_ref() == Some(&mac) {
                    conn.bound = None;
                }
                counters::resignations_total("explicit");
                gauges::set_communities(state.registry.community_count());
            }
            Err(error) => {
                warn!("dropping exited: {}", error);
                conn.violations += 1;
            }
        },
        Message::Acceptance
        | Message::Rejection
        | Message::Introduction { .. }
        | Message::Resignation { .. } => {
            warn!(opcode, "client sent a server-only opcode, ignoring");
            conn.violations += 1;
        }
    }
    Ok(())
}
