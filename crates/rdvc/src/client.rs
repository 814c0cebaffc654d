use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use rdv_common::{Mac, Message, MessageError};

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::error::RdvcError;
use crate::peers::{ConnectedHook, PeerManager};
use crate::rtc::{PeerConnector, PeerEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsRecv = SplitStream<WsStream>;

/// Session lifecycle after the transport opens. `Applied` covers the window
/// between sending `Application` and hearing back; `Active` begins once the
/// server accepts and `Ready` goes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Applied,
    Active,
}

/// The client half of the signaling protocol: joins a community under a
/// freshly minted mac and drives one negotiation sub-state machine per
/// introduced remote.
pub struct SignalingClient {
    config: Arc<ClientConfig>,
    connector: Arc<dyn PeerConnector>,
    on_connected: ConnectedHook,
}

impl SignalingClient {
    /// Build a client around a peer-connection backend and a hook fired once
    /// per remote when its data channel opens.
    pub fn new(
        config: Arc<ClientConfig>,
        connector: Arc<dyn PeerConnector>,
        on_connected: ConnectedHook,
    ) -> Self {
        Self {
            config,
            connector,
            on_connected,
        }
    }

    /// Dial under backoff until the transport opens, then run one signaling
    /// session to completion. Returns `Ok(())` on a cooperative shutdown and
    /// an error when the session fails.
    ///
    /// # Errors
    ///
    /// [`RdvcError::MacConflict`] when the server rejects the application;
    /// transport and parse failures once the session is underway.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), RdvcError> {
        let mut backoff = Backoff::new(
            Duration::from_millis(self.config.reconnect.initial_delay_ms),
            Duration::from_millis(self.config.reconnect.max_delay_ms),
        );
        let url = self.config.url();

        let ws = loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((ws, _)) => break ws,
                Err(error) => {
                    let delay = backoff.next_delay();
                    warn!("connect to {url} failed: {error}; retrying in {delay:?}");
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => return Ok(()),
                    }
                }
            }
        };
        info!("connected to {url}");

        self.session(ws, shutdown).await
    }

    /// Run one signaling session over an open transport.
    async fn session(
        &self,
        ws: WsStream,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), RdvcError> {
        let mac = Mac::new(Uuid::new_v4().to_string());
        let (ws_tx, ws_rx) = ws.split();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<PeerEvent>();
        let mut peers = PeerManager::new(
            mac.clone(),
            self.connector.clone(),
            outbox_tx.clone(),
            events_tx,
            self.on_connected.clone(),
        );

        let result = self
            .session_loop(
                &mac, ws_tx, ws_rx, &mut peers, &outbox_tx, outbox_rx, events_rx, shutdown,
            )
            .await;
        peers.close_all().await;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn session_loop(
        &self,
        mac: &Mac,
        mut ws_tx: WsSink,
        mut ws_rx: WsRecv,
        peers: &mut PeerManager,
        outbox_tx: &mpsc::UnboundedSender<Message>,
        mut outbox_rx: mpsc::UnboundedReceiver<Message>,
        mut events_rx: mpsc::UnboundedReceiver<PeerEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), RdvcError> {
        let application = Message::application(self.config.community.clone(), mac.clone());
        ws_tx.send(WsMessage::Text(application.encode())).await?;
        info!(%mac, community = %self.config.community, "application sent");

        let mut phase = Phase::Applied;
        let mut keepalive =
            tokio::time::interval(Duration::from_secs(self.config.keepalive_interval));

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    // The exit trigger wins over queued sends: the last write
                    // is Exited, then the transport closes cleanly.
                    info!(%mac, "shutdown requested, exiting community");
                    ws_tx.send(WsMessage::Text(Message::exited(mac.clone()).encode())).await?;
                    ws_tx.send(WsMessage::Close(None)).await.ok();
                    return Ok(());
                }
                Some(message) = outbox_rx.recv() => {
                    ws_tx.send(WsMessage::Text(message.encode())).await?;
                }
                Some(event) = events_rx.recv() => {
                    peers.on_event(event).await;
                }
                inbound = ws_rx.next() => {
                    match inbound {
                        Some(Ok(WsMessage::Text(text))) => {
                            match Message::parse(&text) {
                                Ok(message) => {
                                    self.dispatch(message, mac, &mut phase, peers, outbox_tx).await?;
                                }
                                Err(error @ MessageError::Malformed(_)) => {
                                    warn!("closing on malformed frame: {error}");
                                    return Err(error.into());
                                }
                                Err(error) => {
                                    warn!("ignoring invalid frame: {error}");
                                }
                            }
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            ws_tx.send(WsMessage::Pong(data)).await?;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            return Err(RdvcError::ConnectionClosed);
                        }
                        Some(Err(error)) => return Err(error.into()),
                        _ => {}
                    }
                }
                _ = keepalive.tick() => {
                    ws_tx.send(WsMessage::Ping(Vec::new())).await?;
                }
            }
        }
    }

    async fn dispatch(
        &self,
        message: Message,
        mac: &Mac,
        phase: &mut Phase,
        peers: &mut PeerManager,
        outbox: &mpsc::UnboundedSender<Message>,
    ) -> Result<(), RdvcError> {
        let opcode = message.opcode();
        if *phase == Phase::Applied
            && !matches!(message, Message::Acceptance | Message::Rejection)
        {
            warn!(opcode, "message before acceptance, ignoring");
            return Ok(());
        }

        match message {
            Message::Acceptance => {
                if *phase == Phase::Applied {
                    info!(%mac, "application accepted, announcing ready");
                    if outbox.send(Message::ready(mac.clone())).is_err() {
                        debug!("outbox closed before ready could be sent");
                    }
                    *phase = Phase::Active;
                }
            }
            Message::Rejection => {
                return Err(RdvcError::MacConflict);
            }
            Message::Introduction { mac: remote } => {
                peers.on_introduction(remote).await;
            }
            Message::Offer(envelope) => {
                peers.on_offer(envelope.sender, envelope.payload).await;
            }
            Message::Answer(envelope) => {
                peers.on_answer(envelope.sender, envelope.payload).await;
            }
            Message::Candidate(envelope) => {
                peers.on_candidate(envelope.sender, envelope.payload).await;
            }
            Message::Resignation { mac: remote } => {
                peers.on_resignation(&remote).await;
            }
            Message::Application { .. } | Message::Ready { .. } | Message::Exited { .. } => {
                warn!(opcode, "server sent a client-only opcode, ignoring");
            }
        }
        Ok(())
    }
}
