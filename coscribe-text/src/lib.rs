//! # coscribe-text — ordered-sequence CRDT for collaborative plaintext
//!
//! The replication engine behind coscribe: a tombstone-aware character
//! sequence whose elements carry globally comparable positions, so edits
//! from any number of replicas merge deterministically without a central
//! lock.
//!
//! ## Architecture
//!
//! ```text
//! insert(index, 'x')                apply_remote(Character)
//!        │                                  │
//!        ▼                                  ▼
//! ┌──────────────────┐  binary search ┌─────────────────────┐
//! │ PositionGenerator│ ──────────────►│ ReplicatedSequence  │
//! │ (strictly-between│                │ (sorted, tombstoned)│
//! │  path allocation)│                └──────────┬──────────┘
//! └──────────────────┘                           │
//!                                               ▼
//!                                      DocumentSnapshot
//!                                      (text + characters + version)
//! ```
//!
//! ## Modules
//!
//! - [`position`] — variable-depth order keys and the strictly-between
//!   allocator
//! - [`sequence`] — the replicated sequence itself
//! - [`snapshot`] — the persisted/synced document form
//!
//! No I/O, no async: this crate is pure data structure, exercised by the
//! session layer in `coscribe-collab`.

pub mod position;
pub mod sequence;
pub mod snapshot;

pub use position::{Position, PositionGenerator, Segment, SiteId, DIGIT_BASE};
pub use sequence::{Character, RemoteApply, ReplicatedSequence};
pub use snapshot::DocumentSnapshot;
