use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rdv_common::message::Message;
use rdv_common::{Community, Mac};
use rdvs::community::CommunityRegistry;
use rdvs::config::ServerConfig;
use rdvs::server::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub fn test_config(listen: SocketAddr) -> ServerConfig {
    ServerConfig {
        listen,
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
        max_conns: 1000,
        max_message_size: 131_072,
    }
}

pub async fn start_server() -> (SocketAddr, Arc<ServerState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(ServerState {
        registry: CommunityRegistry::new(),
        config: test_config(addr),
    });

    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = rdvs::run(listener, state_clone).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state)
}

pub struct TestClient {
    pub ws_tx: SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>,
    pub ws_rx: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    pub mac: Mac,
}

impl TestClient {
    /// Open a transport without applying; used by protocol-violation tests.
    pub async fn connect(addr: &SocketAddr, mac: &str) -> Self {
        let url = format!("ws://{addr}");
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        let (ws_tx, ws_rx) = ws.split();
        Self {
            ws_tx,
            ws_rx,
            mac: Mac::new(mac),
        }
    }

    /// Connect, apply, and expect `Acceptance`.
    pub async fn join(addr: &SocketAddr, community: &str, mac: &str) -> Self {
        let mut client = Self::connect(addr, mac).await;
        client
            .send(Message::application(
                Community::new(community),
                client.mac.clone(),
            ))
            .await;
        assert_eq!(client.recv().await, Message::Acceptance);
        client
    }

    pub async fn send(&mut self, message: Message) {
        self.send_raw(message.encode()).await;
    }

    pub async fn send_raw(&mut self, text: String) {
        self.ws_tx.send(WsMessage::Text(text)).await.unwrap();
    }

    pub async fn ready(&mut self) {
        self.send(Message::ready(self.mac.clone())).await;
    }

    pub async fn exit(&mut self) {
        self.send(Message::exited(self.mac.clone())).await;
    }

    pub async fn recv(&mut self) -> Message {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws_rx.next())
                .await
                .expect("timeout waiting for message")
                .expect("connection closed")
                .unwrap();
            match msg {
                WsMessage::Text(text) => return Message::parse(&text).unwrap(),
                WsMessage::Ping(_) | WsMessage::Pong(_) => {}
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, self.recv()).await.ok()
    }

    /// `true` once the server has closed this connection.
    pub async fn closed(&mut self, timeout: Duration) -> bool {
        let wait = tokio::time::timeout(timeout, async {
            while let Some(msg) = self.ws_rx.next().await {
                match msg {
                    Ok(WsMessage::Close(_)) | Err(_) => return true,
                    _ => {}
                }
            }
            true
        })
        .await;
        wait.unwrap_or(false)
    }
}
