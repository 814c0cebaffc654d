use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rdv_common::{Mac, Message};

use crate::rtc::{PeerConnection, PeerConnector, PeerEvent, PeerEvents, RtcError};

/// Label of the data channel the offering side creates.
const DATA_CHANNEL_LABEL: &str = "data";

/// Hook invoked exactly once per remote when its data channel first opens.
pub type ConnectedHook = Arc<dyn Fn(&Mac) + Send + Sync>;

struct Peer {
    connection: Box<dyn PeerConnection>,
    /// Set once a remote description is installed; gates candidate buffering.
    remote_set: bool,
    /// Candidates received before the remote description, in arrival order.
    pending: Vec<String>,
    established: bool,
}

/// Per-remote negotiation state, keyed by the remote mac.
///
/// One instance lives inside the session loop, so handlers run strictly one
/// at a time; events from the peer-connection stack arrive through the same
/// loop via the event queue.
pub struct PeerManager {
    self_mac: Mac,
    connector: Arc<dyn PeerConnector>,
    outbox: mpsc::UnboundedSender<Message>,
    events: PeerEvents,
    on_connected: ConnectedHook,
    peers: HashMap<Mac, Peer>,
    /// Candidates that outran the offer or introduction for their remote.
    early_candidates: HashMap<Mac, Vec<String>>,
}

impl PeerManager {
    /// Create a manager for a session identified by `self_mac`.
    pub fn new(
        self_mac: Mac,
        connector: Arc<dyn PeerConnector>,
        outbox: mpsc::UnboundedSender<Message>,
        events: PeerEvents,
        on_connected: ConnectedHook,
    ) -> Self {
        Self {
            self_mac,
            connector,
            outbox,
            events,
            on_connected,
            peers: HashMap::new(),
            early_candidates: HashMap::new(),
        }
    }

    /// `Introduction(remote)`: become the offerer toward `remote`.
    pub async fn on_introduction(&mut self, remote: Mac) {
        debug!(%remote, "introduced, creating offer");
        let Some(mut peer) = self.new_peer(&remote).await else {
            return;
        };
        match offer_negotiation(&mut peer).await {
            Ok(offer) => {
                self.peers.insert(remote.clone(), peer);
                self.send(Message::offer(offer, self.self_mac.clone(), remote));
            }
            Err(error) => {
                warn!(%remote, "abandoning peer after offer failure: {error}");
                peer.connection.close().await;
            }
        }
    }

    /// `Offer` from `remote`: become the answerer.
    pub async fn on_offer(&mut self, remote: Mac, payload: String) {
        debug!(%remote, "offer received, creating answer");
        let Some(mut peer) = self.new_peer(&remote).await else {
            return;
        };
        match answer_negotiation(&mut peer, &payload).await {
            Ok(answer) => {
                self.peers.insert(remote.clone(), peer);
                self.send(Message::answer(answer, self.self_mac.clone(), remote));
            }
            Err(error) => {
                warn!(%remote, "abandoning peer after answer failure: {error}");
                peer.connection.close().await;
            }
        }
    }

    /// Build a fresh per-remote entry, folding in any candidates that arrived
    /// before the peer existed.
    async fn new_peer(&mut self, remote: &Mac) -> Option<Peer> {
        match self.connector.connect(remote, self.events.clone()).await {
            Ok(connection) => Some(Peer {
                connection,
                remote_set: false,
                pending: self.early_candidates.remove(remote).unwrap_or_default(),
                established: false,
            }),
            Err(error) => {
                warn!(%remote, "peer connection setup failed: {error}");
                None
            }
        }
    }

    /// `Answer` from `remote`: install the description, then feed it every
    /// candidate that was buffered while the description was missing.
    pub async fn on_answer(&mut self, remote: Mac, payload: String) {
        let Some(peer) = self.peers.get_mut(&remote) else {
            warn!(%remote, "answer for unknown peer, ignoring");
            return;
        };
        let result = install_answer(peer, &payload).await;
        if let Err(error) = result {
            warn!(%remote, "abandoning peer after answer install failure: {error}");
            self.drop_peer(&remote).await;
        }
    }

    /// `Candidate` from `remote`: apply immediately when the remote
    /// description is installed, otherwise buffer — never both.
    pub async fn on_candidate(&mut self, remote: Mac, payload: String) {
        match self.peers.get_mut(&remote) {
            Some(peer) if peer.remote_set => {
                if let Err(error) = peer.connection.add_ice_candidate(&payload).await {
                    warn!(%remote, "abandoning peer after candidate failure: {error}");
                    self.drop_peer(&remote).await;
                }
            }
            Some(peer) => peer.pending.push(payload),
            None => self
                .early_candidates
                .entry(remote)
                .or_default()
                .push(payload),
        }
    }

    /// `Resignation(remote)`: close and drop the per-remote state.
    pub async fn on_resignation(&mut self, remote: &Mac) {
        if self.peers.contains_key(remote) {
            info!(%remote, "peer resigned");
        }
        self.drop_peer(remote).await;
        self.early_candidates.remove(remote);
    }

    /// Events reported by the peer-connection stack.
    pub async fn on_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate { remote, candidate } => {
                self.send(Message::candidate(
                    candidate,
                    self.self_mac.clone(),
                    remote,
                ));
            }
            PeerEvent::ChannelOpen { remote } => {
                if let Some(peer) = self.peers.get_mut(&remote) {
                    if !peer.established {
                        peer.established = true;
                        info!(%remote, "data channel open");
                        (self.on_connected)(&remote);
                    }
                }
            }
            PeerEvent::ChannelMessage { remote, data } => {
                debug!(%remote, bytes = data.len(), "data channel message");
            }
            PeerEvent::ChannelClosed { remote } => {
                debug!(%remote, "data channel closed");
            }
        }
    }

    /// Close every peer connection; used on session teardown.
    pub async fn close_all(&mut self) {
        for (_, peer) in self.peers.drain() {
            peer.connection.close().await;
        }
    }

    /// Number of live per-remote entries.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Whether `remote` has reached the established state.
    #[must_use]
    pub fn is_established(&self, remote: &Mac) -> bool {
        self.peers
            .get(remote)
            .map(|peer| peer.established)
            .unwrap_or(false)
    }

    async fn drop_peer(&mut self, remote: &Mac) {
        if let Some(peer) = self.peers.remove(remote) {
            peer.connection.close().await;
        }
    }

    fn send(&self, message: Message) {
        if self.outbox.send(message).is_err() {
            debug!("outbox closed, dropping outbound message");
        }
    }
}

/// Offerer path: channel, offer, local description.
async fn offer_negotiation(peer: &mut Peer) -> Result<String, RtcError> {
    peer.connection.create_data_channel(DATA_CHANNEL_LABEL).await?;
    let offer = peer.connection.create_offer().await?;
    peer.connection.set_local_description(&offer).await?;
    Ok(offer)
}

/// Answerer path: install the offer, answer it, drain early candidates.
async fn answer_negotiation(peer: &mut Peer, payload: &str) -> Result<String, RtcError> {
    peer.connection.set_remote_description(payload).await?;
    peer.remote_set = true;
    let answer = peer.connection.create_answer().await?;
    peer.connection.set_local_description(&answer).await?;
    drain_pending(peer).await?;
    Ok(answer)
}

/// Offerer path continuation: the answer arrived.
async fn install_answer(peer: &mut Peer, payload: &str) -> Result<(), RtcError> {
    peer.connection.set_remote_description(payload).await?;
    peer.remote_set = true;
    drain_pending(peer).await
}

/// Apply buffered candidates in insertion order and clear the buffer.
async fn drain_pending(peer: &mut Peer) -> Result<(), RtcError> {
    for candidate in std::mem::take(&mut peer.pending) {
        peer.connection.add_ice_candidate(&candidate).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockState {
        offers: usize,
        answers: usize,
        local_set: usize,
        remote_set: usize,
        candidates_added: Vec<String>,
        channels_created: usize,
        closed: bool,
    }

    struct MockConnection {
        state: Arc<Mutex<MockState>>,
        fail_remote_description: bool,
    }

    #[async_trait]
    impl PeerConnection for MockConnection {
        async fn create_offer(&self) -> Result<String, RtcError> {
            self.state.lock().unwrap().offers += 1;
            Ok("offer-sdp".to_owned())
        }

        async fn create_answer(&self) -> Result<String, RtcError> {
            self.state.lock().unwrap().answers += 1;
            Ok("answer-sdp".to_owned())
        }

        async fn set_local_description(&self, _description: &str) -> Result<(), RtcError> {
            self.state.lock().unwrap().local_set += 1;
            Ok(())
        }

        async fn set_remote_description(&self, _description: &str) -> Result<(), RtcError> {
            if self.fail_remote_description {
                return Err(RtcError::Description("install refused".to_owned()));
            }
            self.state.lock().unwrap().remote_set += 1;
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: &str) -> Result<(), RtcError> {
            self.state
                .lock()
                .unwrap()
                .candidates_added
                .push(candidate.to_owned());
            Ok(())
        }

        async fn create_data_channel(&self, _label: &str) -> Result<(), RtcError> {
            self.state.lock().unwrap().channels_created += 1;
            Ok(())
        }

        async fn close(&self) {
            self.state.lock().unwrap().closed = true;
        }
    }

    #[derive(Default)]
    struct MockConnector {
        states: Mutex<HashMap<Mac, Arc<Mutex<MockState>>>>,
        fail_remote_for: Option<Mac>,
    }

    impl MockConnector {
        fn state_of(&self, remote: &Mac) -> Arc<Mutex<MockState>> {
            self.states
                .lock()
                .unwrap()
                .get(remote)
                .expect("no connection was made for this remote")
                .clone()
        }
    }

    #[async_trait]
    impl PeerConnector for MockConnector {
        async fn connect(
            &self,
            remote: &Mac,
            _events: PeerEvents,
        ) -> Result<Box<dyn PeerConnection>, RtcError> {
            let state = Arc::new(Mutex::new(MockState::default()));
            self.states
                .lock()
                .unwrap()
                .insert(remote.clone(), state.clone());
            Ok(Box::new(MockConnection {
                state,
                fail_remote_description: self.fail_remote_for.as_ref() == Some(remote),
            }))
        }
    }

    struct Harness {
        manager: PeerManager,
        connector: Arc<MockConnector>,
        outbox_rx: mpsc::UnboundedReceiver<Message>,
        connected: Arc<AtomicUsize>,
    }

    fn harness() -> Harness {
        harness_with(MockConnector::default())
    }

    fn harness_with(connector: MockConnector) -> Harness {
        let connector = Arc::new(connector);
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicUsize::new(0));
        let connected_clone = connected.clone();
        let manager = PeerManager::new(
            Mac::new("self"),
            connector.clone(),
            outbox_tx,
            events_tx,
            Arc::new(move |_remote: &Mac| {
                connected_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        Harness {
            manager,
            connector,
            outbox_rx,
            connected,
        }
    }

    #[tokio::test]
    async fn introduction_makes_an_offer() {
        let mut h = harness();
        let remote = Mac::new("remote");

        h.manager.on_introduction(remote.clone()).await;

        let sent = h.outbox_rx.try_recv().unwrap();
        assert_eq!(sent, Message::offer("offer-sdp", Mac::new("self"), remote.clone()));

        let state = h.connector.state_of(&remote);
        let state = state.lock().unwrap();
        assert_eq!(state.channels_created, 1);
        assert_eq!(state.offers, 1);
        assert_eq!(state.local_set, 1);
        assert_eq!(state.remote_set, 0);
    }

    #[tokio::test]
    async fn offer_makes_an_answer() {
        let mut h = harness();
        let remote = Mac::new("remote");

        h.manager.on_offer(remote.clone(), "their-offer".to_owned()).await;

        let sent = h.outbox_rx.try_recv().unwrap();
        assert_eq!(
            sent,
            Message::answer("answer-sdp", Mac::new("self"), remote.clone())
        );

        let state = h.connector.state_of(&remote);
        let state = state.lock().unwrap();
        assert_eq!(state.remote_set, 1);
        assert_eq!(state.answers, 1);
        assert_eq!(state.local_set, 1);
        // The answering side waits for the offerer's channel.
        assert_eq!(state.channels_created, 0);
    }

    #[tokio::test]
    async fn early_candidate_is_buffered_then_applied_once() {
        let mut h = harness();
        let remote = Mac::new("remote");

        h.manager.on_introduction(remote.clone()).await;
        h.manager
            .on_candidate(remote.clone(), "cand-0".to_owned())
            .await;

        // No remote description yet: nothing applied.
        {
            let state = h.connector.state_of(&remote);
            assert!(state.lock().unwrap().candidates_added.is_empty());
        }

        h.manager
            .on_answer(remote.clone(), "their-answer".to_owned())
            .await;
        {
            let state = h.connector.state_of(&remote);
            assert_eq!(state.lock().unwrap().candidates_added, vec!["cand-0"]);
        }

        // After the drain, candidates bypass the buffer.
        h.manager
            .on_candidate(remote.clone(), "cand-1".to_owned())
            .await;
        let state = h.connector.state_of(&remote);
        assert_eq!(
            state.lock().unwrap().candidates_added,
            vec!["cand-0", "cand-1"]
        );
    }

    #[tokio::test]
    async fn adds_match_candidates_received_in_either_order() {
        for candidates_first in [true, false] {
            let mut h = harness();
            let remote = Mac::new("remote");
            h.manager.on_introduction(remote.clone()).await;

            if candidates_first {
                for i in 0..3 {
                    h.manager
                        .on_candidate(remote.clone(), format!("cand-{i}"))
                        .await;
                }
                h.manager
                    .on_answer(remote.clone(), "their-answer".to_owned())
                    .await;
            } else {
                h.manager
                    .on_answer(remote.clone(), "their-answer".to_owned())
                    .await;
                for i in 0..3 {
                    h.manager
                        .on_candidate(remote.clone(), format!("cand-{i}"))
                        .await;
                }
            }

            let state = h.connector.state_of(&remote);
            assert_eq!(
                state.lock().unwrap().candidates_added,
                vec!["cand-0", "cand-1", "cand-2"],
                "order preserved with candidates_first={candidates_first}"
            );
        }
    }

    #[tokio::test]
    async fn candidate_before_offer_is_folded_into_the_peer() {
        let mut h = harness();
        let remote = Mac::new("remote");

        h.manager
            .on_candidate(remote.clone(), "too-early".to_owned())
            .await;
        h.manager.on_offer(remote.clone(), "their-offer".to_owned()).await;

        let state = h.connector.state_of(&remote);
        assert_eq!(state.lock().unwrap().candidates_added, vec!["too-early"]);
    }

    #[tokio::test]
    async fn channel_open_fires_hook_exactly_once() {
        let mut h = harness();
        let remote = Mac::new("remote");
        h.manager.on_introduction(remote.clone()).await;

        h.manager
            .on_event(PeerEvent::ChannelOpen {
                remote: remote.clone(),
            })
            .await;
        h.manager
            .on_event(PeerEvent::ChannelOpen {
                remote: remote.clone(),
            })
            .await;

        assert_eq!(h.connected.load(Ordering::SeqCst), 1);
        assert!(h.manager.is_established(&remote));
    }

    #[tokio::test]
    async fn local_candidate_event_is_sent_to_the_remote() {
        let mut h = harness();
        let remote = Mac::new("remote");
        h.manager.on_introduction(remote.clone()).await;
        let _ = h.outbox_rx.try_recv();

        h.manager
            .on_event(PeerEvent::LocalCandidate {
                remote: remote.clone(),
                candidate: "local-cand".to_owned(),
            })
            .await;

        let sent = h.outbox_rx.try_recv().unwrap();
        assert_eq!(
            sent,
            Message::candidate("local-cand", Mac::new("self"), remote)
        );
    }

    #[tokio::test]
    async fn resignation_closes_and_forgets_the_peer() {
        let mut h = harness();
        let remote = Mac::new("remote");
        h.manager.on_introduction(remote.clone()).await;
        let state = h.connector.state_of(&remote);

        h.manager.on_resignation(&remote).await;

        assert!(state.lock().unwrap().closed);
        assert_eq!(h.manager.peer_count(), 0);
    }

    #[tokio::test]
    async fn dependency_failure_abandons_only_that_peer() {
        let mut h = harness_with(MockConnector {
            fail_remote_for: Some(Mac::new("bad")),
            ..MockConnector::default()
        });

        h.manager.on_introduction(Mac::new("good")).await;
        let _ = h.outbox_rx.try_recv();

        h.manager
            .on_offer(Mac::new("bad"), "their-offer".to_owned())
            .await;

        // No answer went out and the failed peer is gone.
        assert!(h.outbox_rx.try_recv().is_err());
        assert_eq!(h.manager.peer_count(), 1);
        assert!(h.connector.state_of(&Mac::new("bad")).lock().unwrap().closed);
    }

    #[tokio::test]
    async fn answer_for_unknown_peer_is_ignored() {
        let mut h = harness();
        h.manager
            .on_answer(Mac::new("ghost"), "answer".to_owned())
            .await;
        assert_eq!(h.manager.peer_count(), 0);
        assert!(h.outbox_rx.try_recv().is_err());
    }
}
