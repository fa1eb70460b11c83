//! Binary protocol for document synchronization and presence.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────┐
//! │ msg_type │ peer_id   │ clock    │ payload  │
//! │ 1 byte   │ 16 bytes  │ varint   │ variable │
//! └──────────┴───────────┴──────────┴──────────┘
//! ```
//!
//! The document a frame belongs to is not part of the frame: it is fixed
//! per connection by the endpoint path `/{room}/{document}` (see
//! [`DocumentKey`]).
//!
//! Handshake on every (re)connect:
//! ```text
//! client                              relay
//!   │── PeerJoined(info) ──────────────►│
//!   │── SyncStep1(client sv) ──────────►│
//!   │◄──────────── SyncStep2(diff) ─────│  sync-completion signal
//!   │◄──────────── SyncStep1(relay sv) ─│
//!   │── SyncStep2(diff) ───────────────►│  applied + rebroadcast
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message types for the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Yrs state vector for the sync handshake
    SyncStep1 = 1,
    /// Yrs state diff answering a state vector
    SyncStep2 = 2,
    /// Incremental document update
    Delta = 3,
    /// Presence frame (identity, cursor)
    Awareness = 4,
    /// Peer joined notification
    PeerJoined = 5,
    /// Peer left notification
    PeerLeft = 6,
    /// Heartbeat ping
    Ping = 7,
    /// Heartbeat pong
    Pong = 8,
}

/// Fixed cursor color palette.
pub const PALETTE: [&str; 12] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA07A", "#98D8C8", "#F7DC6F", "#BB8FCE", "#85C1E2",
    "#F8B500", "#FF6B9D", "#00D9FF", "#7B68EE",
];

/// Ephemeral display identity, generated once per session attachment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub display_name: String,
    /// Hex color from [`PALETTE`]
    pub color: String,
}

impl PeerIdentity {
    pub fn new(display_name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            color: color.into(),
        }
    }

    /// Fresh random identity: `User <0-999>` plus a palette color.
    pub fn generate() -> Self {
        Self::for_peer(Uuid::new_v4())
    }

    /// Identity derived from a peer id. Same id, same identity.
    pub fn for_peer(peer_id: Uuid) -> Self {
        let hash = peer_id.as_u128();
        let number = (hash & 0xFFFF_FFFF) % 1000;
        let color = PALETTE[((hash >> 32) % PALETTE.len() as u128) as usize];
        Self {
            display_name: format!("User {number}"),
            color: color.to_string(),
        }
    }
}

/// Peer identity with its connection id, carried by `PeerJoined`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: Uuid,
    pub identity: PeerIdentity,
}

impl PeerInfo {
    pub fn new(peer_id: Uuid, identity: PeerIdentity) -> Self {
        Self { peer_id, identity }
    }
}

/// Identity of a shared document: (room name, document name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    pub room: String,
    pub document: String,
}

impl DocumentKey {
    /// Document name used when a path names only a room.
    pub const DEFAULT_DOCUMENT: &'static str = "default";

    pub fn new(room: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            document: document.into(),
        }
    }

    /// Endpoint path for this document.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.room, self.document)
    }

    /// Parse `/{room}/{document}` or `/{room}`.
    pub fn from_path(path: &str) -> Result<Self, ProtocolError> {
        let path = path.split('?').next().unwrap_or_default();
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let room = segments
            .next()
            .ok_or_else(|| ProtocolError::InvalidPath(path.to_string()))?;
        let document = segments.next().unwrap_or(Self::DEFAULT_DOCUMENT);
        if segments.next().is_some() {
            return Err(ProtocolError::InvalidPath(path.to_string()));
        }
        Ok(Self::new(room, document))
    }
}

impl std::fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.room, self.document)
    }
}

/// Top-level protocol message.
///
/// Serialized with bincode for minimal overhead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    pub peer_id: Uuid,
    /// Sender clock; awareness frames use it for last-write-wins
    pub clock: u64,
    /// Message payload (varies by msg_type)
    pub payload: Vec<u8>,
}

impl SyncMessage {
    fn new(msg_type: MessageType, peer_id: Uuid, clock: u64, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            peer_id,
            clock,
            payload,
        }
    }

    /// Create a delta update message.
    pub fn delta(peer_id: Uuid, clock: u64, yrs_update: Vec<u8>) -> Self {
        Self::new(MessageType::Delta, peer_id, clock, yrs_update)
    }

    /// Create a sync step 1 (state vector request).
    pub fn sync_step1(peer_id: Uuid, state_vector: Vec<u8>) -> Self {
        Self::new(MessageType::SyncStep1, peer_id, 0, state_vector)
    }

    /// Create a sync step 2 (state diff response).
    pub fn sync_step2(peer_id: Uuid, state_diff: Vec<u8>) -> Self {
        Self::new(MessageType::SyncStep2, peer_id, 0, state_diff)
    }

    /// Create an awareness frame around an already-encoded presence payload.
    pub fn awareness(peer_id: Uuid, clock: u64, payload: Vec<u8>) -> Self {
        Self::new(MessageType::Awareness, peer_id, clock, payload)
    }

    /// Create a peer joined notification.
    pub fn peer_joined(info: &PeerInfo) -> Result<Self, ProtocolError> {
        let payload = encode_payload(info)?;
        Ok(Self::new(MessageType::PeerJoined, info.peer_id, 0, payload))
    }

    /// Create a peer left notification.
    pub fn peer_left(peer_id: Uuid) -> Self {
        Self::new(MessageType::PeerLeft, peer_id, 0, Vec::new())
    }

    /// Create a ping message.
    pub fn ping(peer_id: Uuid) -> Self {
        Self::new(MessageType::Ping, peer_id, 0, Vec::new())
    }

    /// Create a pong message.
    pub fn pong(peer_id: Uuid) -> Self {
        Self::new(MessageType::Pong, peer_id, 0, Vec::new())
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_payload(self)
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode_payload(bytes)
    }

    /// Parse peer info payload.
    pub fn peer_info(&self) -> Result<PeerInfo, ProtocolError> {
        if self.msg_type != MessageType::PeerJoined {
            return Err(ProtocolError::InvalidMessageType(self.msg_type));
        }
        decode_payload(&self.payload)
    }
}

pub(crate) fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ProtocolError::Serialization(e.to_string()))
}

pub(crate) fn decode_payload<T: serde::de::DeserializeOwned>(
    bytes: &[u8],
) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
    Ok(value)
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Invalid message type {0:?}")]
    InvalidMessageType(MessageType),
    #[error("Invalid document path {0:?}")]
    InvalidPath(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("No tokio runtime to run the connection on")]
    NoRuntime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_message_roundtrip() {
        let peer = Uuid::new_v4();
        let payload = vec![1, 2, 3, 4, 5];

        let msg = SyncMessage::delta(peer, 42, payload.clone());
        let decoded = SyncMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.msg_type, MessageType::Delta);
        assert_eq!(decoded.peer_id, peer);
        assert_eq!(decoded.clock, 42);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_peer_joined_carries_identity() {
        let peer = Uuid::new_v4();
        let info = PeerInfo::new(peer, PeerIdentity::new("User 7", "#4ECDC4"));

        let msg = SyncMessage::peer_joined(&info).unwrap();
        let decoded = SyncMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.msg_type, MessageType::PeerJoined);
        assert_eq!(decoded.peer_id, peer);
        assert_eq!(decoded.peer_info().unwrap(), info);
    }

    #[test]
    fn test_peer_info_on_wrong_type_fails() {
        let msg = SyncMessage::ping(Uuid::new_v4());
        assert_eq!(
            msg.peer_info(),
            Err(ProtocolError::InvalidMessageType(MessageType::Ping))
        );
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        assert!(SyncMessage::decode(&garbage).is_err());
    }

    #[test]
    fn test_delta_size_efficient() {
        let msg = SyncMessage::delta(Uuid::new_v4(), 1, vec![0u8; 50]);
        let encoded = msg.encode().unwrap();
        assert!(
            encoded.len() < 100,
            "Encoded size {} too large for 50-byte delta",
            encoded.len()
        );
    }

    #[test]
    fn test_message_type_values() {
        assert_eq!(MessageType::SyncStep1 as u8, 1);
        assert_eq!(MessageType::SyncStep2 as u8, 2);
        assert_eq!(MessageType::Delta as u8, 3);
        assert_eq!(MessageType::Awareness as u8, 4);
        assert_eq!(MessageType::PeerJoined as u8, 5);
        assert_eq!(MessageType::PeerLeft as u8, 6);
        assert_eq!(MessageType::Ping as u8, 7);
        assert_eq!(MessageType::Pong as u8, 8);
    }

    #[test]
    fn test_identity_stable_per_peer() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(PeerIdentity::for_peer(id), PeerIdentity::for_peer(id));
    }

    #[test]
    fn test_generated_identity_shape() {
        for _ in 0..50 {
            let identity = PeerIdentity::generate();
            let number: u32 = identity
                .display_name
                .strip_prefix("User ")
                .unwrap()
                .parse()
                .unwrap();
            assert!(number < 1000);
            assert!(PALETTE.contains(&identity.color.as_str()));
        }
    }

    #[test]
    fn test_document_key_paths() {
        let key = DocumentKey::new("notion-room", "notion-document");
        assert_eq!(key.path(), "/notion-room/notion-document");
        assert_eq!(DocumentKey::from_path(&key.path()).unwrap(), key);

        assert_eq!(
            DocumentKey::from_path("/lobby").unwrap(),
            DocumentKey::new("lobby", "default")
        );
        assert_eq!(
            DocumentKey::from_path("/lobby/notes?token=x").unwrap(),
            DocumentKey::new("lobby", "notes")
        );
        assert!(DocumentKey::from_path("/").is_err());
        assert!(DocumentKey::from_path("/a/b/c").is_err());
    }
}
