//! # coscribe-collab — real-time collaboration layer for coscribe
//!
//! WebSocket-based multiplayer plaintext editing over the CRDT engine in
//! `coscribe-text`, with live cursor/presence fan-out and durable snapshot
//! persistence.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    WebSocket (JSON)    ┌──────────────┐
//! │ CollabClient │ ◄────────────────────► │ CollabServer │
//! │ (per user)   │                        │ (transport)  │
//! └──────┬───────┘                        └──────┬───────┘
//!        │                                       │ admission: AccessPolicy
//!        ▼                                       ▼
//! ┌──────────────┐                        ┌──────────────┐
//! │ mirror CRDT  │                        │ DocumentHub  │
//! └──────────────┘                        └──────┬───────┘
//!                                                │ one router per document
//!                                         ┌──────┴────────┐
//!                                         │ Router (doc)  │
//!                                         │  sequence     │──► ContentStore
//!                                         │  registry     │    (Memory/Rocks)
//!                                         └──────┬────────┘
//!                                    deltas ┌────┴────┐ deltas
//!                                           ▼         ▼
//!                                       Client A  Client B
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire envelope and close codes
//! - [`access`] — admission boundary (auth + document ACL)
//! - [`session`] — per-document participant registry and presence
//! - [`router`] — the per-document serial pipeline
//! - [`hub`] — process-wide document-session owner
//! - [`storage`] — content store boundary, blob codec, RocksDB backend
//! - [`server`] — WebSocket transport adapter
//! - [`client`] — sync client with a local mirror sequence

pub mod access;
pub mod client;
pub mod hub;
pub mod protocol;
pub mod router;
pub mod server;
pub mod session;
pub mod storage;

// Re-exports for convenience
pub use access::{AccessError, AccessPolicy, Identity, OpenDoor, TokenBook};
pub use client::{ClientEvent, CollabClient, ConnectionState};
pub use hub::DocumentHub;
pub use protocol::{close, ClientFrame, ProtocolError, ServerFrame};
pub use router::{RouterConfig, RouterMsg};
pub use server::{CollabServer, ServerConfig, ServerStats};
pub use session::{
    ParticipantColor, PresenceStatus, PresenceSummary, SessionRegistry, AWAY_WINDOW,
    ONLINE_WINDOW,
};
pub use storage::{
    decode_snapshot, encode_snapshot, ContentStore, MemoryStore, RocksStore, StoreConfig,
    StoreError, StoredContent,
};
