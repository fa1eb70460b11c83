//! Fan-out broadcast to the peers of one document room.
//!
//! Uses a tokio broadcast channel for O(1) send to all subscribers.
//! Each peer gets an independent receiver that buffers up to `capacity`
//! frames; echo filtering is the receiving connection's job.
//!
//! The group also keeps the latest awareness frame of every peer so a
//! newcomer can be shown who is already there.
//!
//! Performance target: 1,000 messages to 100 peers < 10ms

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{PeerInfo, ProtocolError, SyncMessage};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

/// A broadcast group for a single document room.
pub struct BroadcastGroup {
    /// Broadcast channel sender
    sender: broadcast::Sender<Arc<Vec<u8>>>,

    /// Connected peers in this room
    peers: RwLock<HashMap<Uuid, PeerInfo>>,

    /// Latest encoded awareness frame per peer
    awareness: RwLock<HashMap<Uuid, Arc<Vec<u8>>>>,

    /// Channel capacity (messages buffered per receiver)
    capacity: usize,

    /// Lock-free counters
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl BroadcastGroup {
    /// Create a new broadcast group with the given buffer capacity.
    ///
    /// `capacity` determines how many messages can be buffered per peer
    /// before lagging peers start dropping messages.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            peers: RwLock::new(HashMap::new()),
            awareness: RwLock::new(HashMap::new()),
            capacity,
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Add a peer to this broadcast group.
    ///
    /// Returns a receiver for this peer to consume messages.
    pub async fn add_peer(&self, info: PeerInfo) -> broadcast::Receiver<Arc<Vec<u8>>> {
        let mut peers = self.peers.write().await;
        peers.insert(info.peer_id, info);
        self.sender.subscribe()
    }

    /// Remove a peer and its cached awareness frame.
    pub async fn remove_peer(&self, peer_id: &Uuid) -> Option<PeerInfo> {
        self.awareness.write().await.remove(peer_id);
        self.peers.write().await.remove(peer_id)
    }

    /// Broadcast a message to every subscriber, sender included.
    ///
    /// Returns the number of receivers that got the message.
    pub fn broadcast(&self, msg: &SyncMessage) -> Result<usize, ProtocolError> {
        Ok(self.broadcast_raw(Arc::new(msg.encode()?)))
    }

    /// Broadcast pre-encoded bytes directly.
    pub fn broadcast_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        match self.sender.send(encoded) {
            Ok(count) => count,
            Err(_) => {
                self.messages_dropped.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    /// Remember the latest awareness frame of `peer_id`.
    pub async fn cache_awareness(&self, peer_id: Uuid, frame: Arc<Vec<u8>>) {
        self.awareness.write().await.insert(peer_id, frame);
    }

    /// Cached awareness frames of every peer except `exclude`.
    pub async fn awareness_frames(&self, exclude: &Uuid) -> Vec<Arc<Vec<u8>>> {
        self.awareness
            .read()
            .await
            .iter()
            .filter(|(id, _)| *id != exclude)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    /// Get the current peer count.
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Get all connected peer infos.
    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.peers.read().await.values().cloned().collect()
    }

    /// Check if a peer is connected.
    pub async fn has_peer(&self, peer_id: &Uuid) -> bool {
        self.peers.read().await.contains_key(peer_id)
    }

    /// Get broadcast statistics.
    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            active_peers: self.peers.read().await.len(),
        }
    }

    /// Get the channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
