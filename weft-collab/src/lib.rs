//! # weft-collab: Real-time sync layer for weft documents
//!
//! Provides WebSocket-based multiplayer editing using CRDT synchronization
//! and ephemeral presence.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket       ┌─────────────┐
//! │ SyncClient  │ ◄─────────────────► │ SyncServer  │
//! │ (per peer)  │  /{room}/{document} │ (relay)     │
//! └──────┬──────┘                     └──────┬──────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌─────────────┐
//! │ Yrs Doc     │                     │ Yrs Doc     │
//! │ (session)   │                     │ (per room)  │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                                    ┌───────┴───────┐
//!                                    │ BroadcastGroup│
//!                                    │ (fan-out)     │
//!                                    └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Binary wire protocol (bincode-encoded SyncMessage)
//! - [`presence`]: Awareness frames and the per-session presence registry
//! - [`broadcast`]: Per-document fan-out with awareness cache
//! - [`server`]: WebSocket relay
//! - [`client`]: Reconnecting WebSocket transport
//!
//! ## Performance Targets
//!
//! | Metric | Target |
//! |--------|--------|
//! | Delta serialization | <500ns |
//! | Broadcast 1K msgs × 100 peers | <10ms |

pub mod broadcast;
pub mod client;
pub mod presence;
pub mod protocol;
pub mod server;

pub use broadcast::{BroadcastGroup, BroadcastStats};
pub use client::{ClientConfig, ConnectionState, SyncClient, SyncEvent};
pub use presence::{
    AwarenessMessage, CursorPoint, CursorRange, PeerPresence, PresenceRegistry, PresenceSnapshot,
};
pub use protocol::{
    DocumentKey, MessageType, PeerIdentity, PeerInfo, ProtocolError, SyncMessage, PALETTE,
};
pub use server::{ServerConfig, ServerStats, SyncServer};
