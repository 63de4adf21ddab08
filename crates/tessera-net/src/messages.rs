//! Wire message types.
//!
//! Every frame is a JSON object `{type, id, to, ...body}`. `id` is the
//! deduplication key and `to` lists the peers that have already seen the
//! message, so relays can skip them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use tessera_core::VerificationRecord;

use crate::error::{NetError, Result};

/// Identifier of a peer in the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random peer ID.
    pub fn random() -> Self {
        Self(random_hex())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier of a message; the deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random message ID.
    pub fn random() -> Self {
        Self(random_hex())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn random_hex() -> String {
    use rand::Rng;
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Role of a peer in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    /// Long-lived relay; receives cross-server broadcasts.
    Server,
    /// Edge peer; only receives ordinary broadcasts.
    Client,
}

/// What a peer says about itself in `ping`/`pong`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDescriptor {
    pub peer_id: PeerId,
    pub kind: PeerKind,
}

impl PeerDescriptor {
    pub fn new(peer_id: PeerId, kind: PeerKind) -> Self {
        Self { peer_id, kind }
    }

    pub fn server(peer_id: PeerId) -> Self {
        Self::new(peer_id, PeerKind::Server)
    }

    pub fn client(peer_id: PeerId) -> Self {
        Self::new(peer_id, PeerKind::Client)
    }
}

/// Message size limits.
pub mod limits {
    /// Max encoded frame size in bytes.
    pub const MAX_FRAME_BYTES: usize = 1 << 20;
    /// Max entries in `to`.
    pub const MAX_SEEN_BY: usize = 256;
    /// Max key length carried by get/subscribe.
    pub const MAX_KEY_BYTES: usize = tessera_core::keyspace::MAX_KEY_LEN;
}

/// Message payloads, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MessageBody {
    /// A plain record write.
    Put { record: VerificationRecord },
    /// A record whose value is a CRDT change log.
    CrdtPut { record: VerificationRecord },
    /// Ask for the record under `key`.
    Get { key: String },
    /// Ask for the CRDT record under `key`.
    CrdtGet { key: String },
    /// Ask to be sent the current and future records under `key`.
    Subscribe { key: String },
    /// Topology hello.
    Ping { peer: PeerDescriptor },
    /// Reply to `ping`.
    Pong { peer: PeerDescriptor },
}

impl MessageBody {
    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::Put { .. } => "put",
            MessageBody::CrdtPut { .. } => "crdtPut",
            MessageBody::Get { .. } => "get",
            MessageBody::CrdtGet { .. } => "crdtGet",
            MessageBody::Subscribe { .. } => "subscribe",
            MessageBody::Ping { .. } => "ping",
            MessageBody::Pong { .. } => "pong",
        }
    }

    /// The key a message is about, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            MessageBody::Put { record } | MessageBody::CrdtPut { record } => Some(record.key.as_str()),
            MessageBody::Get { key } | MessageBody::CrdtGet { key } | MessageBody::Subscribe { key } => {
                Some(key.as_str())
            }
            MessageBody::Ping { .. } | MessageBody::Pong { .. } => None,
        }
    }
}

/// A framed wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: MessageId,
    #[serde(default)]
    pub to: Vec<PeerId>,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl WireMessage {
    /// Wrap a body with a fresh random id.
    pub fn new(body: MessageBody) -> Self {
        Self {
            id: MessageId::random(),
            to: Vec::new(),
            body,
        }
    }

    /// Record that `peer` has seen this message.
    pub fn seen_by(mut self, peer: PeerId) -> Self {
        if !self.to.contains(&peer) {
            self.to.push(peer);
        }
        self
    }

    /// Check if `peer` is known to have seen this message.
    pub fn was_seen_by(&self, peer: &PeerId) -> bool {
        self.to.contains(peer)
    }

    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }

    /// Check if this message respects size limits.
    pub fn validate_limits(&self) -> std::result::Result<(), &'static str> {
        if self.to.len() > limits::MAX_SEEN_BY {
            return Err("too many peers in to");
        }
        if let Some(key) = self.body.key() {
            if key.len() > limits::MAX_KEY_BYTES {
                return Err("key too long");
            }
        }
        Ok(())
    }

    /// Encode as a JSON frame.
    pub fn encode(&self) -> Result<Bytes> {
        let bytes = serde_json::to_vec(self).map_err(|e| NetError::InvalidMessage(e.to_string()))?;
        if bytes.len() > limits::MAX_FRAME_BYTES {
            return Err(NetError::MessageTooLarge {
                size: bytes.len(),
                max: limits::MAX_FRAME_BYTES,
            });
        }
        Ok(Bytes::from(bytes))
    }

    /// Decode and limit-check a JSON frame.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() > limits::MAX_FRAME_BYTES {
            return Err(NetError::MessageTooLarge {
                size: frame.len(),
                max: limits::MAX_FRAME_BYTES,
            });
        }
        let message: Self =
            serde_json::from_slice(frame).map_err(|e| NetError::InvalidMessage(e.to_string()))?;
        message
            .validate_limits()
            .map_err(|e| NetError::InvalidMessage(e.into()))?;
        Ok(message)
    }
}
