//! Editor session: one local model attached to one shared document over
//! one relay connection.
//!
//! ```text
//!   Idle ──start──► Connecting ──connected──► Syncing ──sync answer──► Ready
//!                       ▲   │                    │                       │
//!                       │   └───── timeout ──────┴──► ReadyUnsynced ─────┤
//!                       └──────────────── transport dropped ─────────────┘
//!   any state ──destroy──► Destroyed
//! ```
//!
//! `ReadyUnsynced` means the starter-content decision was taken on the
//! timeout; the next sync answer promotes the session to `Ready`.
//!
//! Local edits land in the [`BlockDocument`] first, are mirrored into the
//! [`SharedDocument`] inside one local transaction and the resulting update
//! goes out as a delta. Remote updates are applied under the remote origin,
//! then the model is rebuilt from the shared structure, so nothing remote
//! is ever re-sent as local. The local selection is pinned across the
//! rebuild and keeps pointing at the same characters.
//!
//! [`Session::undo`] and [`Session::redo`] step through this session's own
//! edits only; changes made by peers are never reverted.
//!
//! The starter content is written at most once per session, on whichever
//! comes first: the relay's sync answer or the sync timeout. Two peers that
//! both see an empty document before either seed arrives will both seed.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use uuid::Uuid;
use weft_collab::{
    AwarenessMessage, ClientConfig, CursorPoint, CursorRange, DocumentKey, PeerIdentity, PeerInfo,
    PresenceRegistry, PresenceSnapshot, ProtocolError, SyncClient, SyncEvent,
};
use weft_core::{
    Block, BlockDocument, Change, CollabError, EditError, EditOp, EditableModel, Position,
    Selection, SharedDocument, StickySelection,
};

use crate::render::RemoteCaret;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Relay base URL
    pub endpoint: String,
    pub key: DocumentKey,
    /// How long to wait for the relay's sync answer before deciding on
    /// starter content anyway
    pub sync_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:1234".to_string(),
            key: DocumentKey::new("notion-room", "notion-document"),
            sync_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `WEFT_ENDPOINT`, `WEFT_ROOM`, `WEFT_DOCUMENT`
    /// and `WEFT_SYNC_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(endpoint) = std::env::var("WEFT_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Ok(room) = std::env::var("WEFT_ROOM") {
            config.key.room = room;
        }
        if let Ok(document) = std::env::var("WEFT_DOCUMENT") {
            config.key.document = document;
        }
        if let Some(ms) = std::env::var("WEFT_SYNC_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.sync_timeout = Duration::from_millis(ms);
        }
        config
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            heartbeat_interval: self.heartbeat_interval,
            ..ClientConfig::new(self.endpoint.clone(), self.key.clone())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Syncing,
    Ready,
    ReadyUnsynced,
    Destroyed,
}

/// How the starter-content decision went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// The document was empty; starter blocks were written
    Seeded,
    /// Someone else's content was already there
    Adopted,
}

/// Notifications for the embedding UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    ConnectionChanged(bool),
    SeedDecided(SeedOutcome),
    /// The model was rebuilt from remote changes
    DocumentChanged,
    PresenceChanged(PresenceSnapshot),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is destroyed")]
    Destroyed,
    #[error("document is not ready for edits yet")]
    NotReady,
    #[error(transparent)]
    Edit(#[from] EditError),
    #[error(transparent)]
    Collab(#[from] CollabError),
    #[error(transparent)]
    Transport(#[from] ProtocolError),
}

/// Content written into a brand-new document.
pub fn starter_blocks() -> Vec<Block> {
    vec![
        Block::paragraph("Welcome to the block editor!"),
        Block::paragraph("Type / to open the block menu."),
    ]
}

/// Evaluate-once guard for the starter-content decision.
#[derive(Debug, Default)]
struct SeedGate {
    outcome: Option<SeedOutcome>,
    discarded: bool,
}

impl SeedGate {
    fn is_decided(&self) -> bool {
        self.outcome.is_some()
    }

    /// Decide on the first call only; later calls return `None`.
    fn decide(&mut self, shared: &SharedDocument, starter: &[Block]) -> Option<SeedOutcome> {
        if self.discarded || self.outcome.is_some() {
            return None;
        }
        let outcome = if shared.seed_if_empty(starter) {
            SeedOutcome::Seeded
        } else {
            SeedOutcome::Adopted
        };
        self.outcome = Some(outcome);
        Some(outcome)
    }

    /// Teardown before the decision: never decide afterwards.
    fn discard(&mut self) {
        self.discarded = true;
    }
}

pub struct Session {
    config: SessionConfig,
    state: SessionState,
    model: BlockDocument,
    shared: SharedDocument,
    client: SyncClient,
    events: Option<mpsc::Receiver<SyncEvent>>,
    presence: PresenceRegistry,
    seed: SeedGate,
    sync_deadline: Option<Instant>,
    connected: watch::Sender<bool>,
    notices: VecDeque<SessionEvent>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        Self::with_peer(config, Uuid::new_v4())
    }

    /// Session with a fixed peer id; the display identity derives from it.
    pub fn with_peer(config: SessionConfig, peer_id: Uuid) -> Result<Self, SessionError> {
        let identity = PeerIdentity::for_peer(peer_id);
        let shared = SharedDocument::new()?;
        let mut client = SyncClient::new(
            PeerInfo::new(peer_id, identity.clone()),
            config.client_config(),
        );
        let events = client.take_event_rx();
        let (connected, _) = watch::channel(false);

        Ok(Self {
            config,
            state: SessionState::Idle,
            model: BlockDocument::new(),
            shared,
            client,
            events,
            presence: PresenceRegistry::new(peer_id, identity),
            seed: SeedGate::default(),
            sync_deadline: None,
            connected,
            notices: VecDeque::new(),
        })
    }

    /// Open the connection and arm the sync timeout.
    pub fn start(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Destroyed => return Err(SessionError::Destroyed),
            _ => return Ok(()),
        }
        self.client.connect()?;
        self.sync_deadline = Some(Instant::now() + self.config.sync_timeout);
        self.set_state(SessionState::Connecting);
        log::info!(
            "Session {} attaching to {} as {}",
            self.peer_id(),
            self.config.key,
            self.identity().display_name
        );
        Ok(())
    }

    /// Wait for the next notification, processing transport traffic and the
    /// sync timeout meanwhile. Returns `None` once destroyed.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if let Some(notice) = self.notices.pop_front() {
                return Some(notice);
            }
            if self.state == SessionState::Destroyed {
                return None;
            }
            let deadline = self.sync_deadline;
            let wake_at = deadline.unwrap_or_else(Instant::now);
            let events = self.events.as_mut()?;

            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => return None,
                },
                _ = tokio::time::sleep_until(wake_at), if deadline.is_some() => {
                    self.on_sync_timeout();
                }
            }
        }
    }

    /// Process whatever the transport already delivered, without waiting.
    pub fn pump(&mut self) -> Vec<SessionEvent> {
        if self
            .sync_deadline
            .is_some_and(|deadline| deadline <= Instant::now())
        {
            self.on_sync_timeout();
        }
        while let Some(event) = self.events.as_mut().and_then(|rx| rx.try_recv().ok()) {
            self.handle_transport_event(event);
        }
        self.notices.drain(..).collect()
    }

    fn handle_transport_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Connecting => {}
            SyncEvent::Connected => {
                self.set_connected(true);
                if let Err(e) = self.client.send_sync_step1(self.shared.state_vector()) {
                    log::debug!("Handshake not sent: {e}");
                }
                let state = self.presence.current_state();
                self.publish(&state);
                self.set_state(SessionState::Syncing);
            }
            SyncEvent::Disconnected => {
                if !self.set_connected(false) {
                    return;
                }
                if self.presence.clear_remote() {
                    self.notices
                        .push_back(SessionEvent::PresenceChanged(self.presence.snapshot()));
                }
                self.set_state(SessionState::Connecting);
            }
            SyncEvent::RemoteDelta { peer_id, update, .. } => {
                self.apply_remote(&update, peer_id);
            }
            SyncEvent::StateSynced(diff) => {
                self.apply_remote(&diff, Uuid::nil());
                log::debug!("Sync answer received for {}", self.config.key);
                self.decide_seed();
                self.set_state(SessionState::Ready);
            }
            SyncEvent::SyncRequested(state_vector) => match self.shared.diff_since(&state_vector) {
                Ok(diff) => {
                    if let Err(e) = self.client.send_sync_step2(diff) {
                        log::debug!("Handshake answer not sent: {e}");
                    }
                }
                Err(e) => log::warn!("Relay sent a bad state vector: {e}"),
            },
            SyncEvent::RemoteAwareness { message, .. } => {
                if self.presence.handle_message(&message) {
                    self.notices
                        .push_back(SessionEvent::PresenceChanged(self.presence.snapshot()));
                }
            }
            SyncEvent::PeerJoined(info) => {
                log::debug!("{} ({}) joined", info.identity.display_name, info.peer_id);
            }
            SyncEvent::PeerLeft(peer_id) => {
                if self.presence.remove_peer(&peer_id) {
                    self.notices
                        .push_back(SessionEvent::PresenceChanged(self.presence.snapshot()));
                }
            }
        }
    }

    fn apply_remote(&mut self, update: &[u8], from: Uuid) {
        let pinned = self.pin_selection();
        if let Err(e) = self.shared.apply_remote(update) {
            log::warn!("Dropping update from {from}: {e}");
            return;
        }
        if self.shared.take_remote_dirty() {
            self.rebuild_model(pinned);
        }
    }

    fn pin_selection(&self) -> Option<StickySelection> {
        self.model
            .selection()
            .and_then(|selection| self.shared.stick_selection(selection))
    }

    /// Re-read the model from the shared structure, restoring the pinned
    /// selection. A selection whose block vanished is only clamped.
    fn rebuild_model(&mut self, pinned: Option<StickySelection>) {
        self.model.replace_blocks(self.shared.materialize());
        if let Some(selection) = pinned.and_then(|p| self.shared.resolve_selection(&p)) {
            self.model.set_selection(Some(selection));
        }
        self.publish_cursor();
        self.notices.push_back(SessionEvent::DocumentChanged);
    }

    /// Revert this session's most recent edit batch. Returns whether
    /// anything changed.
    pub fn undo(&mut self) -> Result<bool, SessionError> {
        self.step_history(SharedDocument::undo)
    }

    /// Re-apply the most recently undone batch.
    pub fn redo(&mut self) -> Result<bool, SessionError> {
        self.step_history(SharedDocument::redo)
    }

    fn step_history<F>(&mut self, step: F) -> Result<bool, SessionError>
    where
        F: FnOnce(&mut SharedDocument) -> Result<bool, CollabError>,
    {
        self.ensure_editable()?;
        let pinned = self.pin_selection();
        if !step(&mut self.shared)? {
            return Ok(false);
        }
        self.rebuild_model(pinned);
        self.flush_outgoing();
        Ok(true)
    }

    fn ensure_editable(&self) -> Result<(), SessionError> {
        if self.state == SessionState::Destroyed {
            return Err(SessionError::Destroyed);
        }
        if !self.seed.is_decided() {
            return Err(SessionError::NotReady);
        }
        Ok(())
    }

    fn on_sync_timeout(&mut self) {
        self.sync_deadline = None;
        if self.seed.is_decided() {
            return;
        }
        log::info!("No sync answer for {} in time, deciding anyway", self.config.key);
        self.decide_seed();
        self.set_state(SessionState::ReadyUnsynced);
    }

    fn decide_seed(&mut self) {
        self.sync_deadline = None;
        let Some(outcome) = self.seed.decide(&self.shared, &starter_blocks()) else {
            return;
        };
        match outcome {
            SeedOutcome::Seeded => log::info!("Seeded starter content into {}", self.config.key),
            SeedOutcome::Adopted => log::info!(
                "Adopted existing content of {} ({} blocks)",
                self.config.key,
                self.shared.len()
            ),
        }
        self.flush_outgoing();
        self.model.replace_blocks(self.shared.materialize());
        self.notices.push_back(SessionEvent::SeedDecided(outcome));
        self.notices.push_back(SessionEvent::DocumentChanged);
    }

    /// Send updates produced by local transactions. While offline they are
    /// dropped here; the next handshake carries them instead.
    fn flush_outgoing(&mut self) {
        for update in self.shared.take_outgoing() {
            if let Err(e) = self.client.send_delta(update) {
                log::debug!("Delta held for the next handshake: {e}");
            }
        }
    }

    fn publish(&self, message: &AwarenessMessage) {
        if let Err(e) = self.client.send_awareness(message) {
            log::trace!("Presence not sent: {e}");
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        log::info!("Session {:?} -> {:?}", self.state, state);
        self.state = state;
        self.notices.push_back(SessionEvent::StateChanged(state));
    }

    /// Returns whether the indicator changed.
    fn set_connected(&mut self, connected: bool) -> bool {
        if *self.connected.borrow() == connected {
            return false;
        }
        self.connected.send_replace(connected);
        self.notices.push_back(SessionEvent::ConnectionChanged(connected));
        true
    }

    /// Move the local selection and announce the caret to peers.
    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.model.set_selection(selection);
        self.publish_cursor();
    }

    fn publish_cursor(&mut self) {
        let cursor = self.model.selection().map(|sel| CursorRange {
            anchor: to_cursor_point(sel.anchor),
            focus: to_cursor_point(sel.focus),
        });
        if cursor == self.presence.local_cursor() {
            return;
        }
        let message = self.presence.publish_cursor(cursor);
        self.publish(&message);
    }

    /// Replace the local display identity and announce it.
    pub fn publish_identity(&mut self, identity: PeerIdentity) {
        let message = self.presence.publish_local(identity);
        self.publish(&message);
    }

    /// Tear the session down. Safe from any state, any number of times.
    pub fn destroy(&mut self) {
        if self.state == SessionState::Destroyed {
            return;
        }
        self.sync_deadline = None;
        self.seed.discard();
        let leave = self.presence.leave_message();
        self.publish(&leave);
        self.client.disconnect();
        self.shared.detach();
        self.events = None;
        self.presence.clear_remote();
        self.connected.send_replace(false);
        self.notices.clear();
        log::info!("Session {} on {} destroyed", self.peer_id(), self.config.key);
        self.state = SessionState::Destroyed;
    }

    pub fn model(&self) -> &BlockDocument {
        &self.model
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Connected and synced since the last (re)connect.
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Observe the connection indicator.
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    pub fn seed_outcome(&self) -> Option<SeedOutcome> {
        self.seed.outcome
    }

    pub fn presence_snapshot(&self) -> PresenceSnapshot {
        self.presence.snapshot()
    }

    /// Remote peers, excluding this session.
    pub fn peer_count(&self) -> usize {
        self.presence.peer_count()
    }

    /// Remote carets that fall inside the current model.
    pub fn remote_carets(&self) -> Vec<RemoteCaret> {
        self.presence
            .snapshot()
            .iter()
            .filter_map(|(_, peer)| {
                let focus = peer.cursor?.focus;
                let block = focus.block as usize;
                (block < self.model.len()).then(|| RemoteCaret {
                    name: peer.identity.display_name.clone(),
                    color: peer.identity.color.clone(),
                    at: Position::new(block, focus.offset as usize),
                })
            })
            .collect()
    }

    pub fn identity(&self) -> &PeerIdentity {
        self.presence.local_identity()
    }

    pub fn peer_id(&self) -> Uuid {
        self.presence.local_peer_id()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Encoded full state of the shared document.
    pub fn encode_state(&self) -> Vec<u8> {
        self.shared.encode_state()
    }
}

impl EditableModel for Session {
    type Error = SessionError;

    fn document(&self) -> &BlockDocument {
        &self.model
    }

    /// Apply locally, mirror into the shared document, send the delta.
    fn apply_edits(&mut self, ops: &[EditOp]) -> Result<Vec<Change>, SessionError> {
        self.ensure_editable()?;
        let changes = self.model.apply_edits(ops)?;
        if let Err(e) = self.shared.mirror(&changes) {
            log::error!("Mirroring local edit failed, rebuilding from shared state: {e}");
            self.model.replace_blocks(self.shared.materialize());
            return Err(e.into());
        }
        self.flush_outgoing();
        self.publish_cursor();
        Ok(changes)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.config.key)
            .field("state", &self.state)
            .field("connected", &self.is_connected())
            .field("blocks", &self.model.len())
            .field("peers", &self.presence.peer_count())
            .finish()
    }
}

fn to_cursor_point(pos: Position) -> CursorPoint {
    CursorPoint::new(
        u32::try_from(pos.block).unwrap_or(u32::MAX),
        u32::try_from(pos.offset).unwrap_or(u32::MAX),
    )
}
