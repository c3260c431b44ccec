//! Persisted form of a replicated document.

use serde::{Deserialize, Serialize};

use crate::sequence::Character;

/// Full document state as written to storage and sent in `init` /
/// `sync_response` frames.
///
/// `text` is a derived convenience field for consumers that only render;
/// `characters` (tombstones included) is the source of truth. `version`
/// increments on every committed content mutation and serves as an
/// optimistic freshness marker, not a lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub text: String,
    pub characters: Vec<Character>,
    pub version: u64,
}

impl DocumentSnapshot {
    /// The empty document every unknown id resolves to.
    pub fn empty() -> Self {
        Self::default()
    }
}
