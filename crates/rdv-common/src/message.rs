//! rdv signaling message serialization and parsing.
//!
//! Each message is a flat JSON object sent as one WebSocket text frame. An
//! integer `opcode` field identifies the message; the remaining fields carry
//! its payload. The enumeration is part of the wire contract and must not be
//! renumbered.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{Community, Mac};

/// APPLICATION opcode: client → server, request to join a community.
pub const OPCODE_APPLICATION: u64 = 0;
/// ACCEPTANCE opcode: server → client, application granted.
pub const OPCODE_ACCEPTANCE: u64 = 1;
/// REJECTION opcode: server → client, application denied (mac in use).
pub const OPCODE_REJECTION: u64 = 2;
/// READY opcode: client → server, peer is ready for introductions.
pub const OPCODE_READY: u64 = 3;
/// INTRODUCTION opcode: server → client, names a peer to contact.
pub const OPCODE_INTRODUCTION: u64 = 4;
/// OFFER opcode: relayed session description from the offering peer.
pub const OPCODE_OFFER: u64 = 5;
/// ANSWER opcode: relayed session description from the answering peer.
pub const OPCODE_ANSWER: u64 = 6;
/// CANDIDATE opcode: relayed ICE candidate.
pub const OPCODE_CANDIDATE: u64 = 7;
/// EXITED opcode: client → server, peer is leaving.
pub const OPCODE_EXITED: u64 = 8;
/// RESIGNATION opcode: server → client, names a peer that left.
pub const OPCODE_RESIGNATION: u64 = 9;

/// Addressed fields shared by the relayed `Offer`, `Answer`, and `Candidate`
/// messages. The payload is opaque to the signaler on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Opaque payload, never inspected by the signaler.
    pub payload: String,
    /// Originating peer.
    #[serde(rename = "senderMac")]
    pub sender: Mac,
    /// Destination peer.
    #[serde(rename = "receiverMac")]
    pub receiver: Mac,
}

/// A parsed rdv signaling message.
///
/// Variants map 1:1 to wire opcodes defined by the `OPCODE_*` constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Request to join a community under the given mac.
    Application {
        /// Community to join.
        community: Community,
        /// Identifier the client chose for itself.
        mac: Mac,
    },
    /// Application granted.
    Acceptance,
    /// Application denied; the mac is already in use.
    Rejection,
    /// The peer is registered and ready to be introduced.
    Ready {
        /// The ready peer.
        mac: Mac,
    },
    /// Server hint that the receiver should initiate negotiation with `mac`.
    Introduction {
        /// The peer to contact.
        mac: Mac,
    },
    /// Relayed session description offer.
    Offer(Envelope),
    /// Relayed session description answer.
    Answer(Envelope),
    /// Relayed ICE candidate.
    Candidate(Envelope),
    /// The peer is leaving the community.
    Exited {
        /// The departing peer.
        mac: Mac,
    },
    /// Server notification that `mac` has left the community.
    Resignation {
        /// The peer that left.
        mac: Mac,
    },
}

/// Errors that can occur while decoding a wire message.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The frame was not a valid JSON object of the expected shape.
    /// Fatal for the connection that produced it.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The `opcode` value is not part of the protocol. The message is
    /// discarded; the connection survives.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u64),
    /// A field required by the opcode is absent or empty.
    #[error("missing or empty field `{0}`")]
    MissingField(&'static str),
}

/// Intermediate decode form: every payload field optional, so absence maps to
/// a typed error instead of a serde one.
#[derive(Deserialize)]
struct Wire {
    #[serde(default)]
    opcode: Option<u64>,
    #[serde(default)]
    community: Option<Community>,
    #[serde(default)]
    mac: Option<Mac>,
    #[serde(default)]
    payload: Option<String>,
    #[serde(rename = "senderMac", default)]
    sender_mac: Option<Mac>,
    #[serde(rename = "receiverMac", default)]
    receiver_mac: Option<Mac>,
}

fn require_mac(value: Option<Mac>, field: &'static str) -> Result<Mac, MessageError> {
    match value {
        Some(mac) if !mac.is_empty() => Ok(mac),
        _ => Err(MessageError::MissingField(field)),
    }
}

fn require_community(value: Option<Community>) -> Result<Community, MessageError> {
    match value {
        Some(community) if !community.is_empty() => Ok(community),
        _ => Err(MessageError::MissingField("community")),
    }
}

fn require_envelope(wire: Wire) -> Result<Envelope, MessageError> {
    let payload = wire
        .payload
        .ok_or(MessageError::MissingField("payload"))?;
    Ok(Envelope {
        payload,
        sender: require_mac(wire.sender_mac, "senderMac")?,
        receiver: require_mac(wire.receiver_mac, "receiverMac")?,
    })
}

impl Message {
    /// Creates an `Application` message.
    #[must_use]
    pub fn application(community: Community, mac: Mac) -> Self {
        Self::Application { community, mac }
    }

    /// Creates a `Ready` message.
    #[must_use]
    pub const fn ready(mac: Mac) -> Self {
        Self::Ready { mac }
    }

    /// Creates an `Introduction` naming the peer to contact.
    #[must_use]
    pub const fn introduction(mac: Mac) -> Self {
        Self::Introduction { mac }
    }

    /// Creates an `Offer` addressed from `sender` to `receiver`.
    #[must_use]
    pub fn offer(payload: impl Into<String>, sender: Mac, receiver: Mac) -> Self {
        Self::Offer(Envelope {
            payload: payload.into(),
            sender,
            receiver,
        })
    }

    /// Creates an `Answer` addressed from `sender` to `receiver`.
    #[must_use]
    pub fn answer(payload: impl Into<String>, sender: Mac, receiver: Mac) -> Self {
        Self::Answer(Envelope {
            payload: payload.into(),
            sender,
            receiver,
        })
    }

    /// Creates a `Candidate` addressed from `sender` to `receiver`.
    #[must_use]
    pub fn candidate(payload: impl Into<String>, sender: Mac, receiver: Mac) -> Self {
        Self::Candidate(Envelope {
            payload: payload.into(),
            sender,
            receiver,
        })
    }

    /// Creates an `Exited` message.
    #[must_use]
    pub const fn exited(mac: Mac) -> Self {
        Self::Exited { mac }
    }

    /// Creates a `Resignation` naming the peer that left.
    #[must_use]
    pub const fn resignation(mac: Mac) -> Self {
        Self::Resignation { mac }
    }

    /// Returns the wire opcode for this message.
    ///
    /// # Examples
    ///
    /// ```
    /// use rdv_common::message::{Message, OPCODE_READY};
    /// use rdv_common::Mac;
    /// assert_eq!(Message::ready(Mac::new("m")).opcode(), OPCODE_READY);
    /// ```
    #[must_use]
    pub const fn opcode(&self) -> u64 {
        match self {
            Self::Application { .. } => OPCODE_APPLICATION,
            Self::Acceptance => OPCODE_ACCEPTANCE,
            Self::Rejection => OPCODE_REJECTION,
            Self::Ready { .. } => OPCODE_READY,
            Self::Introduction { .. } => OPCODE_INTRODUCTION,
            Self::Offer(_) => OPCODE_OFFER,
            Self::Answer(_) => OPCODE_ANSWER,
            Self::Candidate(_) => OPCODE_CANDIDATE,
            Self::Exited { .. } => OPCODE_EXITED,
            Self::Resignation { .. } => OPCODE_RESIGNATION,
        }
    }

    /// Serializes this message into the JSON text sent over the transport.
    ///
    /// # Examples
    ///
    /// ```
    /// use rdv_common::message::Message;
    /// let text = Message::Acceptance.encode();
    /// assert_eq!(text, r#"{"opcode":1}"#);
    /// ```
    #[must_use]
    pub fn encode(&self) -> String {
        let mut obj = Map::with_capacity(4);
        obj.insert("opcode".to_owned(), Value::from(self.opcode()));
        match self {
            Self::Application { community, mac } => {
                obj.insert("community".to_owned(), Value::from(community.as_str()));
                obj.insert("mac".to_owned(), Value::from(mac.as_str()));
            }
            Self::Acceptance | Self::Rejection => {}
            Self::Ready { mac }
            | Self::Introduction { mac }
            | Self::Exited { mac }
            | Self::Resignation { mac } => {
                obj.insert("mac".to_owned(), Value::from(mac.as_str()));
            }
            Self::Offer(envelope) | Self::Answer(envelope) | Self::Candidate(envelope) => {
                obj.insert("payload".to_owned(), Value::from(envelope.payload.as_str()));
                obj.insert("senderMac".to_owned(), Value::from(envelope.sender.as_str()));
                obj.insert(
                    "receiverMac".to_owned(),
                    Value::from(envelope.receiver.as_str()),
                );
            }
        }
        Value::Object(obj).to_string()
    }

    /// Parses one transport frame into a typed `Message`.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Malformed`] when the text is not a JSON object
    /// with an integer `opcode`, [`MessageError::UnknownOpcode`] for opcodes
    /// outside the protocol, and [`MessageError::MissingField`] when a field
    /// the opcode requires is absent or empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use rdv_common::message::Message;
    /// let parsed = Message::parse(r#"{"opcode":1}"#).unwrap();
    /// assert_eq!(parsed, Message::Acceptance);
    /// ```
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let wire: Wire = serde_json::from_str(text)?;
        let opcode = wire.opcode.ok_or(MessageError::MissingField("opcode"))?;
        match opcode {
            OPCODE_APPLICATION => Ok(Self::Application {
                community: require_community(wire.community)?,
                mac: require_mac(wire.mac, "mac")?,
            }),
            OPCODE_ACCEPTANCE => Ok(Self::Acceptance),
            OPCODE_REJECTION => Ok(Self::Rejection),
            OPCODE_READY => Ok(Self::Ready {
                mac: require_mac(wire.mac, "mac")?,
            }),
            OPCODE_INTRODUCTION => Ok(Self::Introduction {
                mac: require_mac(wire.mac, "mac")?,
            }),
            OPCODE_OFFER => Ok(Self::Offer(require_envelope(wire)?)),
            OPCODE_ANSWER => Ok(Self::Answer(require_envelope(wire)?)),
            OPCODE_CANDIDATE => Ok(Self::Candidate(require_envelope(wire)?)),
            OPCODE_EXITED => Ok(Self::Exited {
                mac: require_mac(wire.mac, "mac")?,
            }),
            OPCODE_RESIGNATION => Ok(Self::Resignation {
                mac: require_mac(wire.mac, "mac")?,
            }),
            other => Err(MessageError::UnknownOpcode(other)),
        }
    }
}
