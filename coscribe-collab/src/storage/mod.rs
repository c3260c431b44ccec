//! Durable storage boundary for document snapshots.
//!
//! The storage engine is an external collaborator: all the session layer
//! needs is a get/set of an opaque blob per document id, plus a write
//! generation used as an optimistic freshness marker. Two implementations:
//!
//! - [`MemoryStore`] — in-process map, for tests and storage-less servers
//! - [`RocksStore`] — RocksDB column families, for real deployments
//!
//! Blobs are bincode-encoded [`DocumentSnapshot`]s behind LZ4 frame
//! compression (see [`blob`]).

pub mod blob;
pub mod rocks;

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

pub use blob::{decode_snapshot, encode_snapshot};
pub use rocks::{RocksStore, StoreConfig};

/// A stored blob plus the write generation it was saved under.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredContent {
    pub blob: Vec<u8>,
    pub generation: u64,
}

/// Storage errors. Never fatal to a session: the router logs them and
/// retries on the next periodic tick.
#[derive(Debug, Clone)]
pub enum StoreError {
    Database(String),
    Codec(String),
    Io(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Database(e) => write!(f, "database error: {e}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// The persistence collaborator interface.
///
/// `expected_generation` is what the writer believes is currently stored.
/// A mismatch is logged as a stale-writer warning but the write still
/// proceeds — freshness marker, not a lock. Methods are synchronous; both
/// backends complete in microseconds and are called inline from the
/// router, the way the parent project drives its store.
pub trait ContentStore: Send + Sync {
    fn load_content(&self, doc_id: Uuid) -> Result<Option<StoredContent>, StoreError>;

    fn save_content(
        &self,
        doc_id: Uuid,
        blob: &[u8],
        expected_generation: u64,
    ) -> Result<u64, StoreError>;
}

/// In-memory store: a mutexed map of `doc_id → (blob, generation)`.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<Uuid, StoredContent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents with stored content.
    pub fn document_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl ContentStore for MemoryStore {
    fn load_content(&self, doc_id: Uuid) -> Result<Option<StoredContent>, StoreError> {
        Ok(self.entries.lock().unwrap().get(&doc_id).cloned())
    }

    fn save_content(
        &self,
        doc_id: Uuid,
        blob: &[u8],
        expected_generation: u64,
    ) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        let current = entries.get(&doc_id).map(|e| e.generation).unwrap_or(0);
        if current != expected_generation {
            log::warn!(
                "stale write for doc {doc_id}: stored generation {current}, expected {expected_generation}"
            );
        }
        let generation = current.max(expected_generation) + 1;
        entries.insert(
            doc_id,
            StoredContent {
                blob: blob.to_vec(),
                generation,
            },
        );
        Ok(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        let doc = Uuid::new_v4();
        assert_eq!(store.load_content(doc).unwrap(), None);

        let g1 = store.save_content(doc, b"one", 0).unwrap();
        assert_eq!(g1, 1);
        let loaded = store.load_content(doc).unwrap().unwrap();
        assert_eq!(loaded.blob, b"one");
        assert_eq!(loaded.generation, 1);

        let g2 = store.save_content(doc, b"two", g1).unwrap();
        assert_eq!(g2, 2);
        assert_eq!(store.document_count(), 1);
    }

    #[test]
    fn test_stale_write_still_lands() {
        let store = MemoryStore::new();
        let doc = Uuid::new_v4();
        store.save_content(doc, b"fresh", 0).unwrap();
        // A writer with a stale generation overwrites anyway; the marker
        // only produces a warning, never a rejection.
        let g = store.save_content(doc, b"stale-writer", 0).unwrap();
        assert_eq!(g, 2);
        assert_eq!(store.load_content(doc).unwrap().unwrap().blob, b"stale-writer");
    }
}
