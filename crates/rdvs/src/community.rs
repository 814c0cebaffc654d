use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use rdv_common::{Community, Mac, Message};

use crate::error::RdvsError;

/// Handle held in the endpoint table — used to push encoded frames onto a
/// connection's write queue. Pushes never block, so the registry lock can be
/// held across emission.
pub type PeerSink = mpsc::UnboundedSender<String>;

/// Outcome of an `Application`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The mac was free; the peer is registered and `Acceptance` was queued.
    Accepted,
    /// The mac is in use by a live peer; `Rejection` was queued and the
    /// registry is unchanged.
    Rejected,
}

#[derive(Default)]
struct RegistryInner {
    /// community → members, insertion order preserved.
    rosters: HashMap<Community, Vec<Mac>>,
    /// mac → write queue of the owning connection.
    endpoints: HashMap<Mac, PeerSink>,
    /// mac → community, so lookups avoid scanning every roster.
    index: HashMap<Mac, Community>,
    /// Unordered peer pairs already introduced, stored sorted.
    ledger: HashSet<(Mac, Mac)>,
}

/// Authoritative signaling state: rosters, endpoints, the mac index, and the
/// introduction ledger, mutated only under one exclusive lock.
#[derive(Default)]
pub struct CommunityRegistry {
    inner: Mutex<RegistryInner>,
}

/// Canonical ledger key for an unordered peer pair.
fn pair(a: &Mac, b: &Mac) -> (Mac, Mac) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

fn send(sink: &PeerSink, text: String) {
    // A closed queue means the receiving connection is tearing down; its own
    // task performs the implicit exit.
    if sink.send(text).is_err() {
        debug!("dropping frame for departing peer");
    }
}

impl CommunityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle an `Application`: register the peer under `mac` in `community`
    /// and queue `Acceptance`, or queue `Rejection` if the mac is taken
    /// anywhere on this server.
    pub fn apply(&self, community: &Community, mac: &Mac, sink: PeerSink) -> ApplyOutcome {
        let inner = &mut *self.lock();
        if inner.endpoints.contains_key(mac) {
            send(&sink, Message::Rejection.encode());
            return ApplyOutcome::Rejected;
        }
        inner.endpoints.insert(mac.clone(), sink.clone());
        inner.index.insert(mac.clone(), community.clone());
        inner
            .rosters
            .entry(community.clone())
            .or_default()
            .push(mac.clone());
        send(&sink, Message::Acceptance.encode());
        ApplyOutcome::Accepted
    }

    /// Handle a `Ready`: queue `Introduction(mac)` to every community member
    /// the peer has not been paired with yet, in roster insertion order, and
    /// record the pairs. Returns the number of introductions issued.
    ///
    /// # Errors
    ///
    /// Returns [`RdvsError::UnknownMac`] if `mac` is not registered.
    pub fn ready(&self, mac: &Mac) -> Result<usize, RdvsError> {
        let inner = &mut *self.lock();
        let community = inner
            .index
            .get(mac)
            .cloned()
            .ok_or_else(|| RdvsError::UnknownMac(mac.clone()))?;
        let members = inner.rosters.get(&community).cloned().unwrap_or_default();

        let mut introduced = 0;
        for peer in members.iter().filter(|member| *member != mac) {
            let key = pair(mac, peer);
            if inner.ledger.contains(&key) {
                continue;
            }
            if let Some(sink) = inner.endpoints.get(peer) {
                send(sink, Message::introduction(mac.clone()).encode());
            }
            inner.ledger.insert(key);
            introduced += 1;
        }
        Ok(introduced)
    }

    /// Forward a relayed frame to `receiver` byte-for-byte. Returns `false`
    /// when the receiver is gone (it raced an exit); the caller drops the
    /// message.
    pub fn relay(&self, receiver: &Mac, raw: &str) -> bool {
        let inner = &*self.lock();
        match inner.endpoints.get(receiver) {
            Some(sink) => {
                send(sink, raw.to_owned());
                true
            }
            None => false,
        }
    }

    /// Handle an `Exited` (explicit or implied by transport loss): purge the
    /// peer's ledger entries, queue `Resignation(mac)` to the rest of its
    /// community, and drop the peer from roster and endpoint tables. An
    /// emptied community is removed.
    ///
    /// # Errors
    ///
    /// Returns [`RdvsError::UnknownMac`] if `mac` is not registered.
    pub fn exited(&self, mac: &Mac) -> Result<(), RdvsError> {
        let inner = &mut *self.lock();
        let community = inner
            .index
            .remove(mac)
            .ok_or_else(|| RdvsError::UnknownMac(mac.clone()))?;

        inner.ledger.retain(|(a, b)| a != mac && b != mac);

        if let Some(members) = inner.rosters.get(&community) {
            let notice = Message::resignation(mac.clone()).encode();
            for peer in members.iter().filter(|member| *member != mac) {
                if let Some(sink) = inner.endpoints.get(peer) {
                    send(sink, notice.clone());
                }
            }
        }

        inner.endpoints.remove(mac);
        let now_empty = match inner.rosters.get_mut(&community) {
            Some(members) => {
                members.retain(|member| member != mac);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            inner.rosters.remove(&community);
        }
        Ok(())
    }

    /// Whether `mac` currently has a live registration.
    #[must_use]
    pub fn is_registered(&self, mac: &Mac) -> bool {
        self.lock().endpoints.contains_key(mac)
    }

    /// Whether the unordered pair has an introduction on record.
    #[must_use]
    pub fn introduced(&self, a: &Mac, b: &Mac) -> bool {
        self.lock().ledger.contains(&pair(a, b))
    }

    /// Number of live registered peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.lock().endpoints.len()
    }

    /// Number of communities with at least one member.
    #[must_use]
    pub fn community_count(&self) -> usize {
        self.lock().rosters.len()
    }

    /// Members of `community` in insertion order, empty if absent.
    #[must_use]
    pub fn members(&self, community: &Community) -> Vec<Mac> {
        self.lock()
            .rosters
            .get(community)
            .cloned()
            .unwrap_or_default()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap as StdHashMap;

    const MACS: [&str; 6] = ["m0", "m1", "m2", "m3", "m4", "m5"];
    const COMMUNITIES: [&str; 3] = ["c0", "c1", "c2"];

    #[derive(Debug, Clone)]
    enum Op {
        Apply { mac: usize, community: usize },
        Ready { mac: usize },
        Exit { mac: usize },
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..MACS.len(), 0..COMMUNITIES.len())
                .prop_map(|(mac, community)| Op::Apply { mac, community }),
            (0..MACS.len()).prop_map(|mac| Op::Ready { mac }),
            (0..MACS.len()).prop_map(|mac| Op::Exit { mac }),
        ]
    }

    proptest! {
        /// For any interleaving of applications and exits, rosters stay
        /// duplicate-free and endpoints never outlive their roster entry.
        #[test]
        fn rosters_and_endpoints_stay_consistent(ops in proptest::collection::vec(arb_op(), 1..64)) {
            let registry = CommunityRegistry::new();
            // mac index → community index of the live registration
            let mut model: StdHashMap<usize, usize> = StdHashMap::new();
            let mut receivers = Vec::new();

            for op in ops {
                match op {
                    Op::Apply { mac, community } => {
                        let (tx, rx) = mpsc::unbounded_channel();
                        receivers.push(rx);
                        let outcome = registry.apply(
                            &Community::new(COMMUNITIES[community]),
                            &Mac::new(MACS[mac]),
                            tx,
                        );
                        if model.contains_key(&mac) {
                            prop_assert_eq!(outcome, ApplyOutcome::Rejected);
                        } else {
                            prop_assert_eq!(outcome, ApplyOutcome::Accepted);
                            model.insert(mac, community);
                        }
                    }
                    Op::Ready { mac } => {
                        let result = registry.ready(&Mac::new(MACS[mac]));
                        prop_assert_eq!(result.is_ok(), model.contains_key(&mac));
                    }
                    Op::Exit { mac } => {
                        let result = registry.exited(&Mac::new(MACS[mac]));
                        prop_assert_eq!(result.is_ok(), model.remove(&mac).is_some());
                    }
                }

                prop_assert_eq!(registry.peer_count(), model.len());
                for (community_idx, community) in COMMUNITIES.iter().enumerate() {
                    let members = registry.members(&Community::new(*community));
                    let mut deduped = members.clone();
                    deduped.sort();
                    deduped.dedup();
                    prop_assert_eq!(members.len(), deduped.len(), "duplicate roster entry");

                    let expected: usize = model
                        .values()
                        .filter(|registered| **registered == community_idx)
                        .count();
                    prop_assert_eq!(members.len(), expected);
                }
                for (mac_idx, mac) in MACS.iter().enumerate() {
                    prop_assert_eq!(
                        registry.is_registered(&Mac::new(*mac)),
                        model.contains_key(&mac_idx)
                    );
                }
            }
        }

        /// Without departures, an unordered pair is introduced at most once
        /// no matter how many ready messages are issued.
        #[test]
        fn pairs_are_introduced_at_most_once(
            readies in proptest::collection::vec(0..MACS.len(), 1..48)
        ) {
            let registry = CommunityRegistry::new();
            let mut receivers = Vec::new();
            for mac in MACS {
                let (tx, rx) = mpsc::unbounded_channel();
                registry.apply(&Community::new("c"), &Mac::new(mac), tx);
                receivers.push(rx);
            }
            // Drain the acceptances.
            for rx in &mut receivers {
                let _ = rx.try_recv();
            }

            for mac in readies {
                registry.ready(&Mac::new(MACS[mac])).unwrap();
            }

            let mut seen: StdHashMap<(String, String), usize> = StdHashMap::new();
            for (receiver_idx, rx) in receivers.iter_mut().enumerate() {
                while let Ok(text) = rx.try_recv() {
                    if let Message::Introduction { mac } = Message::parse(&text).unwrap() {
                        let receiver = MACS[receiver_idx].to_owned();
                        let subject = mac.as_str().to_owned();
                        let key = if receiver <= subject {
                            (receiver, subject)
                        } else {
                            (subject, receiver)
                        };
                        *seen.entry(key).or_default() += 1;
                    }
                }
            }
            for ((a, b), count) in seen {
                prop_assert!(count <= 1, "pair ({a},{b}) introduced {count} times");
            }
        }
    }
}
