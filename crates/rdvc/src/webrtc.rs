use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use rdv_common::Mac;

use crate::rtc::{PeerConnection, PeerConnector, PeerEvent, PeerEvents, RtcError};

/// Peer-connection factory backed by the `webrtc` crate.
///
/// Session descriptions cross the boundary as JSON-serialized
/// `RTCSessionDescription` values; candidates as bare candidate strings.
pub struct WebRtcConnector {
    ice_servers: Vec<String>,
}

impl WebRtcConnector {
    /// Build a factory using the given STUN/TURN URLs.
    #[must_use]
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(
        &self,
        remote: &Mac,
        events: PeerEvents,
    ) -> Result<Box<dyn PeerConnection>, RtcError> {
        let mut media = MediaEngine::default();
        media
            .register_default_codecs()
            .map_err(|e| RtcError::Setup(e.to_string()))?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media)
            .map_err(|e| RtcError::Setup(e.to_string()))?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let connection = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| RtcError::Setup(e.to_string()))?,
        );

        connection
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                debug!("peer connection state changed: {state}");
                Box::pin(async {})
            }));

        {
            let remote = remote.clone();
            let events = events.clone();
            connection
                .on_ice_candidate(Box::new(move |candidate| {
                    let remote = remote.clone();
                    let events = events.clone();
                    Box::pin(async move {
                        let Some(candidate) = candidate else { return };
                        match candidate.to_json() {
                            Ok(json) => {
                                let _ = events.send(PeerEvent::LocalCandidate {
                                    remote,
                                    candidate: json.candidate,
                                });
                            }
                            Err(e) => warn!("failed to serialize local candidate: {e}"),
                        }
                    })
                }));
        }

        {
            let remote = remote.clone();
            let events = events.clone();
            connection
                .on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                    let remote = remote.clone();
                    let events = events.clone();
                    Box::pin(async move {
                        wire_data_channel(&channel, remote, events).await;
                    })
                }));
        }

        Ok(Box::new(WebRtcPeer {
            remote: remote.clone(),
            events,
            connection,
        }))
    }
}

/// Hook channel lifecycle and payloads into the event queue; used both for
/// locally created channels and for channels announced by the remote.
async fn wire_data_channel(channel: &Arc<RTCDataChannel>, remote: Mac, events: PeerEvents) {
    {
        let remote = remote.clone();
        let events = events.clone();
        channel
            .on_open(Box::new(move || {
                let _ = events.send(PeerEvent::ChannelOpen {
                    remote: remote.clone(),
                });
                Box::pin(async {})
            }));
    }
    {
        let remote = remote.clone();
        let events = events.clone();
        channel
            .on_message(Box::new(move |message: DataChannelMessage| {
                let _ = events.send(PeerEvent::ChannelMessage {
                    remote: remote.clone(),
                    data: message.data.to_vec(),
                });
                Box::pin(async {})
            }));
    }
    channel.on_close(Box::new(move || {
        let _ = events.send(PeerEvent::ChannelClosed {
            remote: remote.clone(),
        });
        Box::pin(async {})
    }));
}

struct WebRtcPeer {
    remote: Mac,
    events: PeerEvents,
    connection: Arc<RTCPeerConnection>,
}

fn description_error(e: impl std::fmt::Display) -> RtcError {
    RtcError::Description(e.to_string())
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn create_offer(&self) -> Result<String, RtcError> {
        let offer = self
            .connection
            .create_offer(None)
            .await
            .map_err(description_error)?;
        serde_json::to_string(&offer).map_err(description_error)
    }

    async fn create_answer(&self) -> Result<String, RtcError> {
        let answer = self
            .connection
            .create_answer(None)
            .await
            .map_err(description_error)?;
        serde_json::to_string(&answer).map_err(description_error)
    }

    async fn set_local_description(&self, description: &str) -> Result<(), RtcError> {
        let description: RTCSessionDescription =
            serde_json::from_str(description).map_err(description_error)?;
        self.connection
            .set_local_description(description)
            .await
            .map_err(description_error)
    }

    async fn set_remote_description(&self, description: &str) -> Result<(), RtcError> {
        let description: RTCSessionDescription =
            serde_json::from_str(description).map_err(description_error)?;
        self.connection
            .set_remote_description(description)
            .await
            .map_err(description_error)
    }

    async fn add_ice_candidate(&self, candidate: &str) -> Result<(), RtcError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.to_owned(),
            ..Default::default()
        };
        self.connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| RtcError::Candidate(e.to_string()))
    }

    async fn create_data_channel(&self, label: &str) -> Result<(), RtcError> {
        let channel = self
            .connection
            .create_data_channel(label, None)
            .await
            .map_err(|e| RtcError::Channel(e.to_string()))?;
        wire_data_channel(&channel, self.remote.clone(), self.events.clone()).await;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.connection.close().await {
            debug!("error closing peer connection: {e}");
        }
    }
}
