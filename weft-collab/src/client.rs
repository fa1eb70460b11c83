//! WebSocket sync transport for one document.
//!
//! Provides:
//! - Connection lifecycle with automatic reconnect (capped exponential backoff)
//! - Status transitions and incoming frames as [`SyncEvent`]s
//! - Non-blocking sends for deltas, handshake steps, awareness and pings
//! - Periodic heartbeat
//!
//! The client does not own a document. It announces the peer on every
//! connect and surfaces the relay's half of the handshake
//! ([`SyncEvent::StateSynced`], [`SyncEvent::SyncRequested`]); the owner of
//! the document answers through the send methods.
//!
//! ```text
//!            ┌────────────── supervisor task ──────────────┐
//! send_*() ──► outgoing ──► ws writer                       │
//!            │              ws reader ──► SyncEvent ──► event_rx
//!            │  drop ──► Disconnected ──► backoff ──► Connecting
//!            └─────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::presence::AwarenessMessage;
use crate::protocol::{DocumentKey, MessageType, PeerInfo, ProtocolError, SyncMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Shut down for good; no further reconnects.
    Closed,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A connection attempt started
    Connecting,
    /// Connection established and the peer announced
    Connected,
    /// Connection lost or attempt failed
    Disconnected,
    /// Incremental update from a remote peer
    RemoteDelta {
        peer_id: Uuid,
        clock: u64,
        update: Vec<u8>,
    },
    /// Presence frame from a remote peer
    RemoteAwareness {
        peer_id: Uuid,
        message: AwarenessMessage,
    },
    /// A peer joined the document
    PeerJoined(PeerInfo),
    /// A peer's connection closed
    PeerLeft(Uuid),
    /// Relay answered our state vector with the updates we lack
    StateSynced(Vec<u8>),
    /// Relay sent its state vector and expects our diff
    SyncRequested(Vec<u8>),
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay base URL, e.g. `ws://127.0.0.1:1234`
    pub endpoint: String,
    /// Document to attach to
    pub key: DocumentKey,
    /// Interval between pings
    pub heartbeat_interval: Duration,
    /// First reconnect delay
    pub reconnect_initial: Duration,
    /// Reconnect delay cap
    pub reconnect_max: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>, key: DocumentKey) -> Self {
        Self {
            endpoint: endpoint.into(),
            key,
            heartbeat_interval: Duration::from_secs(30),
            reconnect_initial: Duration::from_millis(250),
            reconnect_max: Duration::from_secs(5),
        }
    }

    /// Full WebSocket URL for the configured document.
    pub fn url(&self) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), self.key.path())
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        (current * 2).min(self.reconnect_max)
    }
}

type Outgoing = Arc<Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>>;

/// The sync client.
pub struct SyncClient {
    config: ClientConfig,

    /// Our peer identity
    peer_info: PeerInfo,

    /// Clock stamped on outgoing deltas
    clock: Arc<AtomicU64>,

    /// Writer channel of the live connection; `None` while disconnected
    outgoing: Outgoing,

    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,

    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<SyncEvent>>,

    /// Event sender (held by the supervisor task)
    event_tx: mpsc::Sender<SyncEvent>,
}

impl SyncClient {
    pub fn new(peer_info: PeerInfo, config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            peer_info,
            clock: Arc::new(AtomicU64::new(0)),
            outgoing: Arc::new(Mutex::new(None)),
            state_tx: Arc::new(state_tx),
            state_rx,
            shutdown_tx: None,
            task: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Start the connection supervisor.
    ///
    /// Returns immediately; progress is reported through events. Calling
    /// this again while running is a no-op.
    pub fn connect(&mut self) -> Result<(), ProtocolError> {
        if self.task.is_some() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ProtocolError::NoRuntime)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = Supervisor {
            config: self.config.clone(),
            peer_info: self.peer_info.clone(),
            outgoing: self.outgoing.clone(),
            state_tx: self.state_tx.clone(),
            event_tx: self.event_tx.clone(),
            shutdown: shutdown_rx,
        };
        self.task = Some(runtime.spawn(supervisor.run()));
        self.shutdown_tx = Some(shutdown_tx);
        Ok(())
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Frames already handed to the connection are flushed first. Safe to
    /// call in any state, any number of times.
    pub fn disconnect(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
    }

    /// Wait for the supervisor task to finish after [`Self::disconnect`].
    pub async fn closed(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Send a document update to the relay.
    pub fn send_delta(&self, yrs_update: Vec<u8>) -> Result<(), ProtocolError> {
        let clock = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        self.send(&SyncMessage::delta(self.peer_info.peer_id, clock, yrs_update))
    }

    /// Send our state vector, asking for what we lack.
    pub fn send_sync_step1(&self, state_vector: Vec<u8>) -> Result<(), ProtocolError> {
        self.send(&SyncMessage::sync_step1(self.peer_info.peer_id, state_vector))
    }

    /// Send the updates the relay lacks.
    pub fn send_sync_step2(&self, state_diff: Vec<u8>) -> Result<(), ProtocolError> {
        self.send(&SyncMessage::sync_step2(self.peer_info.peer_id, state_diff))
    }

    /// Send a presence frame.
    pub fn send_awareness(&self, message: &AwarenessMessage) -> Result<(), ProtocolError> {
        self.send(&message.to_sync_message()?)
    }

    pub fn send_ping(&self) -> Result<(), ProtocolError> {
        self.send(&SyncMessage::ping(self.peer_info.peer_id))
    }

    /// Hand a frame to the live connection without waiting.
    ///
    /// Fails with [`ProtocolError::ConnectionClosed`] while disconnected;
    /// the frame is dropped.
    fn send(&self, msg: &SyncMessage) -> Result<(), ProtocolError> {
        let encoded = msg.encode()?;
        let outgoing = self
            .outgoing
            .lock()
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        match outgoing.as_ref() {
            Some(tx) => tx.send(encoded).map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Observe connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn peer_info(&self) -> &PeerInfo {
        &self.peer_info
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current delta clock value.
    pub fn clock(&self) -> u64 {
        self.clock.load(Ordering::Relaxed)
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ───────────────────────────────────────────────────────────────────
// Supervisor task
// ───────────────────────────────────────────────────────────────────

struct Supervisor {
    config: ClientConfig,
    peer_info: PeerInfo,
    outgoing: Outgoing,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    event_tx: mpsc::Sender<SyncEvent>,
    shutdown: watch::Receiver<bool>,
}

enum SessionEnd {
    Dropped,
    Shutdown,
}

impl Supervisor {
    async fn run(mut self) {
        let url = self.config.url();
        let mut backoff = self.config.reconnect_initial;

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            if !self.transition(ConnectionState::Connecting, SyncEvent::Connecting).await {
                break;
            }

            let attempt = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                attempt = tokio_tungstenite::connect_async(&url) => attempt,
            };

            match attempt {
                Ok((ws_stream, _)) => {
                    backoff = self.config.reconnect_initial;
                    log::info!("Connected to {url}");
                    let end = self.drive(ws_stream).await;
                    if let Ok(mut outgoing) = self.outgoing.lock() {
                        *outgoing = None;
                    }
                    if !self.disconnected().await {
                        break;
                    }
                    if matches!(end, SessionEnd::Shutdown) {
                        break;
                    }
                    log::warn!("Connection to {url} lost");
                }
                Err(e) => {
                    log::warn!("Connecting to {url} failed: {e}; retrying in {backoff:?}");
                    if !self.disconnected().await {
                        break;
                    }
                }
            }

            tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = self.config.next_backoff(backoff);
        }

        if let Ok(mut outgoing) = self.outgoing.lock() {
            *outgoing = None;
        }
        self.state_tx.send_replace(ConnectionState::Closed);
        log::debug!("Sync client for {} stopped", self.config.key);
    }

    /// Publish a state change. Returns `false` once nobody listens anymore.
    async fn transition(&self, state: ConnectionState, event: SyncEvent) -> bool {
        self.state_tx.send_replace(state);
        self.event_tx.send(event).await.is_ok()
    }

    async fn disconnected(&self) -> bool {
        self.transition(ConnectionState::Disconnected, SyncEvent::Disconnected)
            .await
    }

    async fn drive(
        &mut self,
        ws_stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> SessionEnd {
        let (mut writer, mut reader) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        // Announce first so the relay routes everything after it
        match SyncMessage::peer_joined(&self.peer_info).and_then(|m| m.encode()) {
            Ok(join) => {
                let _ = out_tx.send(join);
            }
            Err(e) => log::error!("Failed to encode join frame: {e}"),
        }
        match self.outgoing.lock() {
            Ok(mut outgoing) => *outgoing = Some(out_tx),
            Err(_) => return SessionEnd::Dropped,
        }
        if !self.transition(ConnectionState::Connected, SyncEvent::Connected).await {
            return SessionEnd::Shutdown;
        }

        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let own_id = self.peer_info.peer_id;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.changed() => {
                    // Flush frames queued before shutdown, e.g. a Leave frame
                    while let Ok(bytes) = out_rx.try_recv() {
                        if writer.send(Message::Binary(bytes.into())).await.is_err() {
                            break;
                        }
                    }
                    let _ = writer.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }

                Some(bytes) = out_rx.recv() => {
                    if let Err(e) = writer.send(Message::Binary(bytes.into())).await {
                        log::warn!("Write failed: {e}");
                        return SessionEnd::Dropped;
                    }
                }

                msg = reader.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            let sync_msg = match SyncMessage::decode(&bytes) {
                                Ok(m) => m,
                                Err(e) => {
                                    log::warn!("Dropping undecodable frame: {e}");
                                    continue;
                                }
                            };
                            if sync_msg.peer_id == own_id {
                                continue;
                            }
                            if sync_msg.msg_type == MessageType::Ping {
                                if let Ok(pong) = SyncMessage::pong(own_id).encode() {
                                    let _ = writer.send(Message::Binary(pong.into())).await;
                                }
                                continue;
                            }
                            if let Some(event) = to_event(sync_msg) {
                                if self.event_tx.send(event).await.is_err() {
                                    return SessionEnd::Shutdown;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return SessionEnd::Dropped,
                        Some(Err(e)) => {
                            log::warn!("WebSocket error: {e}");
                            return SessionEnd::Dropped;
                        }
                        Some(Ok(_)) => {}
                    }
                }

                _ = heartbeat.tick() => {
                    if let Ok(ping) = SyncMessage::ping(own_id).encode() {
                        if writer.send(Message::Binary(ping.into())).await.is_err() {
                            return SessionEnd::Dropped;
                        }
                    }
                }
            }
        }
    }
}

fn to_event(msg: SyncMessage) -> Option<SyncEvent> {
    match msg.msg_type {
        MessageType::Delta => Some(SyncEvent::RemoteDelta {
            peer_id: msg.peer_id,
            clock: msg.clock,
            update: msg.payload,
        }),
        MessageType::SyncStep1 => Some(SyncEvent::SyncRequested(msg.payload)),
        MessageType::SyncStep2 => Some(SyncEvent::StateSynced(msg.payload)),
        MessageType::Awareness => match AwarenessMessage::decode(&msg.payload) {
            Ok(message) => Some(SyncEvent::RemoteAwareness {
                peer_id: msg.peer_id,
                message,
            }),
            Err(e) => {
                log::warn!("Malformed awareness from {}: {e}", msg.peer_id);
                None
            }
        },
        MessageType::PeerJoined => msg.peer_info().ok().map(SyncEvent::PeerJoined),
        MessageType::PeerLeft => Some(SyncEvent::PeerLeft(msg.peer_id)),
        MessageType::Ping | MessageType::Pong => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PeerIdentity;

    fn client() -> SyncClient {
        let peer_id = Uuid::new_v4();
        SyncClient::new(
            PeerInfo::new(peer_id, PeerIdentity::for_peer(peer_id)),
            ClientConfig::new("ws://127.0.0.1:9", DocumentKey::new("room", "doc")),
        )
    }

    #[test]
    fn test_config_url() {
        let config = ClientConfig::new("ws://localhost:1234/", DocumentKey::new("a", "b"));
        assert_eq!(config.url(), "ws://localhost:1234/a/b");
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let config = ClientConfig::new("ws://x", DocumentKey::new("a", "b"));
        let mut delay = config.reconnect_initial;
        let mut seen = vec![delay];
        for _ in 0..6 {
            delay = config.next_backoff(delay);
            seen.push(delay);
        }
        assert_eq!(seen[1], Duration::from_millis(500));
        assert_eq!(*seen.last().unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn test_client_initial_state() {
        let client = client();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(client.clock(), 0);
    }

    #[test]
    fn test_sends_while_disconnected_are_dropped() {
        let client = client();
        assert_eq!(
            client.send_delta(vec![1, 2, 3]),
            Err(ProtocolError::ConnectionClosed)
        );
        assert_eq!(client.send_ping(), Err(ProtocolError::ConnectionClosed));
        assert_eq!(client.clock(), 1);
    }

    #[test]
    fn test_connect_outside_runtime_fails() {
        let mut client = client();
        assert_eq!(client.connect(), Err(ProtocolError::NoRuntime));
    }

    #[test]
    fn test_take_event_rx() {
        let mut client = client();
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_relay_reports_disconnected_then_closes() {
        let mut client = client();
        let mut events = client.take_event_rx().unwrap();
        client.connect().unwrap();

        assert_eq!(events.recv().await, Some(SyncEvent::Connecting));
        assert_eq!(events.recv().await, Some(SyncEvent::Disconnected));

        client.disconnect();
        client.disconnect();
        client.closed().await;
        assert_eq!(client.connection_state(), ConnectionState::Closed);
    }

    #[test]
    fn test_to_event_mapping() {
        let peer = Uuid::new_v4();
        assert_eq!(
            to_event(SyncMessage::sync_step1(Uuid::nil(), vec![1])),
            Some(SyncEvent::SyncRequested(vec![1]))
        );
        assert_eq!(
            to_event(SyncMessage::sync_step2(Uuid::nil(), vec![2])),
            Some(SyncEvent::StateSynced(vec![2]))
        );
        assert_eq!(
            to_event(SyncMessage::peer_left(peer)),
            Some(SyncEvent::PeerLeft(peer))
        );
        assert_eq!(to_event(SyncMessage::pong(peer)), None);
    }
}
