//! WebSocket relay with path-based document routing.
//!
//! Architecture:
//! ```text
//! ws://host/{room}/{document}
//!
//! Client A ──┐
//!             ├── DocumentRoom ── Yrs Doc (in memory)
//! Client B ──┘        │
//!                     ├── BroadcastGroup (fan-out)
//!                     └── awareness cache (replayed to joiners)
//!                          ┌──────────┼───────────┐
//!                          ▼          ▼           ▼
//!                       Client A   Client B    Client C
//! ```
//!
//! Each document room maintains:
//! - A Yrs `Doc` holding the merged state of every peer
//! - A `BroadcastGroup` for fan-out to connected peers
//! - The latest awareness frame of each peer
//!
//! Rooms live only while at least one peer is connected; nothing is
//! persisted.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{ReadTxn, Transact};

use crate::broadcast::BroadcastGroup;
use crate::presence::AwarenessMessage;
use crate::protocol::{DocumentKey, MessageType, PeerIdentity, PeerInfo, SyncMessage};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum peers per room; further joins are refused
    pub max_peers_per_room: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// Expected client heartbeat interval in seconds. Connections silent
    /// for three intervals are closed.
    pub heartbeat_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:1234".to_string(),
            max_peers_per_room: 100,
            broadcast_capacity: 256,
            heartbeat_interval_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `WEFT_BIND` and `WEFT_MAX_PEERS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(bind) = std::env::var("WEFT_BIND") {
            config.bind_addr = bind;
        }
        if let Some(max) = std::env::var("WEFT_MAX_PEERS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.max_peers_per_room = max;
        }
        config
    }

    fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1) * 3)
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

/// Document room: Yrs Doc + broadcast group.
struct DocumentRoom {
    doc: yrs::Doc,
    broadcast: Arc<BroadcastGroup>,
}

impl DocumentRoom {
    fn new(broadcast_capacity: usize) -> Self {
        Self {
            doc: yrs::Doc::new(),
            broadcast: Arc::new(BroadcastGroup::new(broadcast_capacity)),
        }
    }
}

type Rooms = Arc<RwLock<HashMap<DocumentKey, DocumentRoom>>>;

/// The relay server.
pub struct SyncServer {
    config: ServerConfig,
    rooms: Rooms,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, rooms, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        rooms: Rooms,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), BoxError> {
        let mut requested: Option<DocumentKey> = None;
        let route = |req: &Request, resp: Response| match DocumentKey::from_path(req.uri().path()) {
            Ok(key) => {
                requested = Some(key);
                Ok(resp)
            }
            Err(e) => {
                let mut refusal = ErrorResponse::new(Some(e.to_string()));
                *refusal.status_mut() = StatusCode::BAD_REQUEST;
                Err(refusal)
            }
        };
        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, route).await?;
        let key = requested.ok_or("handshake finished without a document path")?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection from {addr} for {key}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut peer_id: Option<Uuid> = None;
        let mut broadcast_rx: Option<broadcast::Receiver<Arc<Vec<u8>>>> = None;
        let idle_timeout = config.idle_timeout();
        let idle = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle);

        let outcome = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        idle.as_mut().reset(Instant::now() + idle_timeout);
                        let bytes: Vec<u8> = match msg {
                            Some(Ok(Message::Binary(data))) => data.into(),
                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                                continue;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }
                            Some(Err(e)) => {
                                log::warn!("WebSocket error from {addr}: {e}");
                                break;
                            }
                            Some(Ok(_)) => continue,
                        };

                        let sync_msg = match SyncMessage::decode(&bytes) {
                            Ok(m) => m,
                            Err(e) => {
                                log::warn!("Failed to decode message from {addr}: {e}");
                                continue;
                            }
                        };
                        {
                            let mut s = stats.write().await;
                            s.total_messages += 1;
                            s.total_bytes += bytes.len() as u64;
                        }

                        match sync_msg.msg_type {
                            MessageType::PeerJoined => {
                                if peer_id.is_some() {
                                    log::debug!("Duplicate join from {addr} ignored");
                                    continue;
                                }
                                let info = sync_msg.peer_info().unwrap_or_else(|_| {
                                    let identity = PeerIdentity::for_peer(sync_msg.peer_id);
                                    PeerInfo::new(sync_msg.peer_id, identity)
                                });

                                let mut rooms_w = rooms.write().await;
                                let capacity = config.broadcast_capacity;
                                let room = rooms_w
                                    .entry(key.clone())
                                    .or_insert_with(|| DocumentRoom::new(capacity));
                                if room.broadcast.peer_count().await >= config.max_peers_per_room {
                                    let empty = room.broadcast.peer_count().await == 0;
                                    if empty {
                                        rooms_w.remove(&key);
                                    }
                                    drop(rooms_w);
                                    stats.write().await.rejected_connections += 1;
                                    log::warn!("Room {key} is full, refusing {}", info.peer_id);
                                    ws_sender.send(Message::Close(None)).await?;
                                    break;
                                }
                                broadcast_rx = Some(room.broadcast.add_peer(info.clone()).await);
                                peer_id = Some(info.peer_id);
                                let group = room.broadcast.clone();
                                let room_count = rooms_w.len();
                                drop(rooms_w);

                                for frame in group.awareness_frames(&info.peer_id).await {
                                    ws_sender.send(Message::Binary(frame.to_vec().into())).await?;
                                }
                                group.broadcast(&sync_msg)?;
                                stats.write().await.active_rooms = room_count;

                                log::info!(
                                    "Peer {} ({}) joined {key}",
                                    info.identity.display_name,
                                    info.peer_id
                                );
                            }

                            MessageType::SyncStep1 => {
                                let replies = {
                                    let rooms_r = rooms.read().await;
                                    match (peer_id, rooms_r.get(&key)) {
                                        (Some(_), Some(room)) => {
                                            let txn = room.doc.transact();
                                            match yrs::StateVector::decode_v1(&sync_msg.payload) {
                                                Ok(remote_sv) => Some((
                                                    txn.encode_diff_v1(&remote_sv),
                                                    txn.state_vector().encode_v1(),
                                                )),
                                                Err(e) => {
                                                    log::warn!("Bad state vector from {addr}: {e}");
                                                    None
                                                }
                                            }
                                        }
                                        _ => None,
                                    }
                                };
                                if let Some((diff, own_sv)) = replies {
                                    let step2 = SyncMessage::sync_step2(Uuid::nil(), diff);
                                    ws_sender.send(Message::Binary(step2.encode()?.into())).await?;
                                    let step1 = SyncMessage::sync_step1(Uuid::nil(), own_sv);
                                    ws_sender.send(Message::Binary(step1.encode()?.into())).await?;
                                    log::debug!("Answered handshake for {:?} on {key}", peer_id);
                                }
                            }

                            MessageType::SyncStep2 | MessageType::Delta => {
                                let group = {
                                    let rooms_r = rooms.read().await;
                                    match (peer_id, rooms_r.get(&key)) {
                                        (Some(_), Some(room)) => {
                                            match yrs::Update::decode_v1(&sync_msg.payload) {
                                                Ok(update) => {
                                                    let mut txn = room.doc.transact_mut();
                                                    match txn.apply_update(update) {
                                                        Ok(()) => Some(room.broadcast.clone()),
                                                        Err(e) => {
                                                            log::warn!(
                                                                "Rejected update from {addr}: {e}"
                                                            );
                                                            None
                                                        }
                                                    }
                                                }
                                                Err(e) => {
                                                    log::warn!(
                                                        "Undecodable update from {addr}: {e}"
                                                    );
                                                    None
                                                }
                                            }
                                        }
                                        _ => None,
                                    }
                                };
                                if let Some(group) = group {
                                    let relayed = SyncMessage::delta(
                                        sync_msg.peer_id,
                                        sync_msg.clock,
                                        sync_msg.payload,
                                    );
                                    group.broadcast(&relayed)?;
                                }
                            }

                            MessageType::Awareness => {
                                let Some(pid) = peer_id else { continue };
                                match AwarenessMessage::decode(&sync_msg.payload) {
                                    Ok(AwarenessMessage::State { identity, .. }) => {
                                        let name = &identity.display_name;
                                        log::trace!("Presence: {name} updated in {key}");
                                    }
                                    Ok(AwarenessMessage::Leave { .. }) => {
                                        log::info!("Presence: {pid} left {key}");
                                    }
                                    Err(e) => {
                                        log::warn!("Malformed awareness from {addr}: {e}");
                                        continue;
                                    }
                                }
                                let group = {
                                    let rooms_r = rooms.read().await;
                                    rooms_r.get(&key).map(|r| r.broadcast.clone())
                                };
                                if let Some(group) = group {
                                    let frame = Arc::new(bytes);
                                    group.cache_awareness(pid, frame.clone()).await;
                                    group.broadcast_raw(frame);
                                }
                            }

                            MessageType::Ping => {
                                let pong = SyncMessage::pong(Uuid::nil());
                                ws_sender.send(Message::Binary(pong.encode()?.into())).await?;
                            }

                            other => {
                                log::debug!("Unhandled message type from {addr}: {other:?}");
                            }
                        }
                    }

                    msg = async {
                        match broadcast_rx.as_mut() {
                            Some(rx) => rx.recv().await,
                            None => std::future::pending().await,
                        }
                    } => {
                        match msg {
                            Ok(data) => {
                                if let Ok(sync_msg) = SyncMessage::decode(&data) {
                                    if Some(sync_msg.peer_id) == peer_id {
                                        continue;
                                    }
                                }
                                ws_sender.send(Message::Binary(data.to_vec().into())).await?;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                log::warn!("Peer {peer_id:?} lagged by {n} messages");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }

                    _ = &mut idle => {
                        log::info!("Closing idle connection from {addr}");
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            Ok::<(), BoxError>(())
        }
        .await;

        // Cleanup runs whatever ended the loop
        if let Some(pid) = peer_id {
            let mut rooms_w = rooms.write().await;
            if let Some(room) = rooms_w.get(&key) {
                room.broadcast.remove_peer(&pid).await;
                let _ = room.broadcast.broadcast(&SyncMessage::peer_left(pid));

                if room.broadcast.peer_count().await == 0 {
                    rooms_w.remove(&key);
                    log::info!("Room {key} removed (empty)");
                }
            }
            log::info!("Peer {pid} disconnected from {key}");
            let room_count = rooms_w.len();
            drop(rooms_w);
            stats.write().await.active_rooms = room_count;
        }
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }

        outcome
    }

    /// Get relay statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Number of rooms with at least one connected peer.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
