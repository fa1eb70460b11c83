//! Presence registry: ephemeral per-peer identity and cursor state.
//!
//! Presence travels on its own channel (`Awareness` frames) and never
//! touches document content.
//!
//! ## Architecture
//!
//! ```text
//! Local caret move
//!       │
//!       ▼
//! PresenceRegistry::publish_cursor()
//!       │  clock += 1
//!       ▼
//! AwarenessMessage::State { identity, cursor, clock }
//!       │
//!       ▼   (relay fan-out + replay cache)
//! Remote PresenceRegistry::handle_message()
//!       │  stale clock → ignored
//!       ▼
//! PresenceSnapshot (self excluded)
//! ```
//!
//! Every frame carries the complete local state, so the newest frame per
//! peer wins for every field at once. Entries disappear on `Leave`, on a
//! relay `PeerLeft`, or when the local transport drops.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::protocol::{decode_payload, encode_payload, PeerIdentity, ProtocolError, SyncMessage};

// ───────────────────────────────────────────────────────────────────
// Core types
// ───────────────────────────────────────────────────────────────────

/// Caret location: block index plus byte offset into the block text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CursorPoint {
    pub block: u32,
    pub offset: u32,
}

impl CursorPoint {
    pub fn new(block: u32, offset: u32) -> Self {
        Self { block, offset }
    }
}

/// Selection range shared with other peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CursorRange {
    pub anchor: CursorPoint,
    pub focus: CursorPoint,
}

impl CursorRange {
    pub fn caret(at: CursorPoint) -> Self {
        Self {
            anchor: at,
            focus: at,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }
}

/// What other peers see of one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerPresence {
    pub identity: PeerIdentity,
    pub cursor: Option<CursorRange>,
}

// ───────────────────────────────────────────────────────────────────
// Awareness messages
// ───────────────────────────────────────────────────────────────────

/// Presence frame payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AwarenessMessage {
    /// Full state of one peer.
    State {
        peer_id: Uuid,
        clock: u64,
        identity: PeerIdentity,
        cursor: Option<CursorRange>,
    },
    /// Orderly departure.
    Leave { peer_id: Uuid, clock: u64 },
}

impl AwarenessMessage {
    /// Encode to binary (bincode).
    #[inline(always)]
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_payload(self)
    }

    /// Decode from binary.
    #[inline(always)]
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode_payload(bytes)
    }

    pub fn peer_id(&self) -> Uuid {
        match self {
            AwarenessMessage::State { peer_id, .. } | AwarenessMessage::Leave { peer_id, .. } => {
                *peer_id
            }
        }
    }

    pub fn clock(&self) -> u64 {
        match self {
            AwarenessMessage::State { clock, .. } | AwarenessMessage::Leave { clock, .. } => *clock,
        }
    }

    /// Wrap in a transport frame.
    pub fn to_sync_message(&self) -> Result<SyncMessage, ProtocolError> {
        Ok(SyncMessage::awareness(
            self.peer_id(),
            self.clock(),
            self.encode()?,
        ))
    }
}

// ───────────────────────────────────────────────────────────────────
// Snapshot
// ───────────────────────────────────────────────────────────────────

/// Externally visible presence view. Never contains the local peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSnapshot {
    pub peers: BTreeMap<Uuid, PeerPresence>,
}

impl PresenceSnapshot {
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, peer_id: &Uuid) -> Option<&PeerPresence> {
        self.peers.get(peer_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Uuid, &PeerPresence)> {
        self.peers.iter()
    }
}

// ───────────────────────────────────────────────────────────────────
// Registry
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct RemotePeer {
    presence: PeerPresence,
    clock: u64,
}

/// Local and remote presence for one document attachment.
///
/// Never blocks: publishing only returns the frame to send, and handling a
/// frame is a map update.
#[derive(Debug)]
pub struct PresenceRegistry {
    local_peer_id: Uuid,
    local: PeerPresence,
    /// Monotonic counter stamped on outgoing frames.
    clock: u64,
    peers: HashMap<Uuid, RemotePeer>,
}

impl PresenceRegistry {
    pub fn new(local_peer_id: Uuid, identity: PeerIdentity) -> Self {
        Self {
            local_peer_id,
            local: PeerPresence {
                identity,
                cursor: None,
            },
            clock: 0,
            peers: HashMap::new(),
        }
    }

    pub fn local_peer_id(&self) -> Uuid {
        self.local_peer_id
    }

    pub fn local_identity(&self) -> &PeerIdentity {
        &self.local.identity
    }

    pub fn local_cursor(&self) -> Option<CursorRange> {
        self.local.cursor
    }

    /// Set the local identity and return the frame announcing it.
    pub fn publish_local(&mut self, identity: PeerIdentity) -> AwarenessMessage {
        self.local.identity = identity;
        self.current_state()
    }

    /// Set (or clear) the local selection and return the frame announcing it.
    pub fn publish_cursor(&mut self, cursor: Option<CursorRange>) -> AwarenessMessage {
        self.local.cursor = cursor;
        log::trace!("Local cursor now {cursor:?}");
        self.current_state()
    }

    /// Frame carrying the full local state under a fresh clock.
    pub fn current_state(&mut self) -> AwarenessMessage {
        self.clock += 1;
        AwarenessMessage::State {
            peer_id: self.local_peer_id,
            clock: self.clock,
            identity: self.local.identity.clone(),
            cursor: self.local.cursor,
        }
    }

    pub fn leave_message(&mut self) -> AwarenessMessage {
        self.clock += 1;
        AwarenessMessage::Leave {
            peer_id: self.local_peer_id,
            clock: self.clock,
        }
    }

    /// Fold a remote frame into the registry.
    ///
    /// Returns `true` when the visible snapshot changed. Own frames and
    /// frames older than the stored state are ignored.
    pub fn handle_message(&mut self, msg: &AwarenessMessage) -> bool {
        if msg.peer_id() == self.local_peer_id {
            return false;
        }

        match msg {
            AwarenessMessage::State {
                peer_id,
                clock,
                identity,
                cursor,
            } => {
                if let Some(existing) = self.peers.get(peer_id) {
                    if *clock <= existing.clock {
                        log::trace!("Ignoring stale presence from {peer_id} (clock {clock})");
                        return false;
                    }
                }
                let presence = PeerPresence {
                    identity: identity.clone(),
                    cursor: *cursor,
                };
                let changed = self
                    .peers
                    .get(peer_id)
                    .map_or(true, |existing| existing.presence != presence);
                if !self.peers.contains_key(peer_id) {
                    log::info!("Presence: {} ({peer_id}) joined", identity.display_name);
                }
                self.peers.insert(
                    *peer_id,
                    RemotePeer {
                        presence,
                        clock: *clock,
                    },
                );
                changed
            }
            AwarenessMessage::Leave { peer_id, .. } => self.remove_peer(peer_id),
        }
    }

    /// Drop a peer, e.g. when the relay reports its connection closed.
    pub fn remove_peer(&mut self, peer_id: &Uuid) -> bool {
        match self.peers.remove(peer_id) {
            Some(peer) => {
                log::info!(
                    "Presence: {} ({peer_id}) left",
                    peer.presence.identity.display_name
                );
                true
            }
            None => false,
        }
    }

    /// Forget every remote peer. Used when the local transport drops.
    pub fn clear_remote(&mut self) -> bool {
        let had_peers = !self.peers.is_empty();
        self.peers.clear();
        had_peers
    }

    pub fn peer(&self, peer_id: &Uuid) -> Option<&PeerPresence> {
        self.peers.get(peer_id).map(|p| &p.presence)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot {
            peers: self
                .peers
                .iter()
                .map(|(id, peer)| (*id, peer.presence.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    fn registry() -> PresenceRegistry {
        PresenceRegistry::new(Uuid::new_v4(), PeerIdentity::new("User 1", "#FF6B6B"))
    }

    #[test]
    fn test_awareness_message_roundtrip() {
        let msg = AwarenessMessage::State {
            peer_id: Uuid::new_v4(),
            clock: 3,
            identity: PeerIdentity::new("User 42", "#45B7D1"),
            cursor: Some(CursorRange::caret(CursorPoint::new(2, 7))),
        };
        let decoded = AwarenessMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_to_sync_message() {
        let mut reg = registry();
        let frame = reg.current_state().to_sync_message().unwrap();
        assert_eq!(frame.msg_type, MessageType::Awareness);
        assert_eq!(frame.peer_id, reg.local_peer_id());
        assert_eq!(frame.clock, 1);
        assert!(matches!(
            AwarenessMessage::decode(&frame.payload).unwrap(),
            AwarenessMessage::State { .. }
        ));
    }

    #[test]
    fn test_registry_ignores_self() {
        let mut reg = registry();
        let own = reg.current_state();
        assert!(!reg.handle_message(&own));
        assert_eq!(reg.peer_count(), 0);
        assert!(reg.snapshot().is_empty());
    }

    #[test]
    fn test_registry_tracks_remote_peer() {
        let mut local = registry();
        let mut remote = registry();

        assert!(local.handle_message(&remote.current_state()));
        let snapshot = local.snapshot();
        assert_eq!(snapshot.len(), 1);
        let peer = snapshot.get(&remote.local_peer_id()).unwrap();
        assert_eq!(peer.identity, *remote.local_identity());
        assert_eq!(peer.cursor, None);
    }

    #[test]
    fn test_cursor_updates_last_write_wins() {
        let mut local = registry();
        let mut remote = registry();

        let older = remote.publish_cursor(Some(CursorRange::caret(CursorPoint::new(0, 1))));
        let newer = remote.publish_cursor(Some(CursorRange::caret(CursorPoint::new(0, 5))));

        assert!(local.handle_message(&newer));
        assert!(!local.handle_message(&older));
        assert_eq!(
            local.peer(&remote.local_peer_id()).unwrap().cursor,
            Some(CursorRange::caret(CursorPoint::new(0, 5)))
        );
    }

    #[test]
    fn test_publish_local_is_idempotent_for_viewers() {
        let mut local = registry();
        let mut remote = registry();
        let identity = remote.local_identity().clone();

        assert!(local.handle_message(&remote.publish_local(identity.clone())));
        assert!(!local.handle_message(&remote.publish_local(identity)));
        assert_eq!(local.peer_count(), 1);
    }

    #[test]
    fn test_leave_removes_peer() {
        let mut local = registry();
        let mut remote = registry();

        local.handle_message(&remote.current_state());
        assert!(local.handle_message(&remote.leave_message()));
        assert_eq!(local.peer_count(), 0);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut local = registry();
        let mut a = registry();
        let mut b = registry();
        local.handle_message(&a.current_state());
        local.handle_message(&b.current_state());

        assert!(local.remove_peer(&a.local_peer_id()));
        assert!(!local.remove_peer(&a.local_peer_id()));
        assert_eq!(local.peer_count(), 1);

        assert!(local.clear_remote());
        assert!(!local.clear_remote());
    }

    #[test]
    fn test_clock_is_monotonic() {
        let mut reg = registry();
        let first = reg.current_state().clock();
        let second = reg.publish_cursor(None).clock();
        let third = reg.leave_message().clock();
        assert!(first < second && second < third);
    }
}
