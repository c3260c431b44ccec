//! RocksDB-backed content store.
//!
//! Column families:
//! - `content` — snapshot blobs (already LZ4-compressed by the blob codec,
//!   so the CF itself stores them raw)
//! - `meta`    — per-document write generation and bookkeeping
//!
//! Point lookups dominate (one document loaded per session activation), so
//! both families get bloom filters and a shared block cache.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 3

use std::path::PathBuf;
use std::time::SystemTime;

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    MultiThreaded, Options, WriteBatch,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ContentStore, StoreError, StoredContent};

const CF_CONTENT: &str = "content";
const CF_META: &str = "meta";
const COLUMN_FAMILIES: &[&str] = &[CF_CONTENT, CF_META];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes
    pub block_cache_size: usize,
    /// Bloom filter bits per key
    pub bloom_filter_bits: f64,
    /// Max open files for RocksDB
    pub max_open_files: i32,
    /// Write buffer size per column family
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("coscribe_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10.0,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small-cache config for tests against a temp directory.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10.0,
            max_open_files: 64,
            write_buffer_size: 1024 * 1024,
        }
    }
}

/// Per-document bookkeeping stored in the `meta` family.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContentMeta {
    generation: u64,
    blob_size: u64,
    updated_at: u64,
}

impl ContentMeta {
    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Codec(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        Ok(meta)
    }
}

/// RocksDB-backed document content store.
pub struct RocksStore {
    db: DBWithThreadMode<MultiThreaded>,
}

impl RocksStore {
    /// Open (creating if missing) the store at the configured path.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(parallelism());

        let cache = Cache::new_lru_cache(config.block_cache_size);
        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config, &cache)))
            .collect();

        let db = DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        Ok(Self { db })
    }

    fn cf_options(name: &str, config: &StoreConfig, cache: &Cache) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_block_cache(cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.optimize_for_point_lookup(config.block_cache_size as u64);

        match name {
            // Blobs arrive pre-compressed; recompressing wastes cycles.
            CF_CONTENT => opts.set_compression_type(DBCompressionType::None),
            _ => opts.set_compression_type(DBCompressionType::Lz4),
        }

        opts
    }

    fn meta_of(&self, doc_id: Uuid) -> Result<Option<ContentMeta>, StoreError> {
        let cf = self
            .db
            .cf_handle(CF_META)
            .ok_or_else(|| StoreError::Database("missing meta column family".into()))?;
        match self.db.get_cf(&cf, doc_id.as_bytes())? {
            Some(bytes) => Ok(Some(ContentMeta::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All document ids with stored content.
    pub fn list_documents(&self) -> Result<Vec<Uuid>, StoreError> {
        let cf = self
            .db
            .cf_handle(CF_CONTENT)
            .ok_or_else(|| StoreError::Database("missing content column family".into()))?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (key, _) = item?;
            if key.len() == 16 {
                let mut buf = [0u8; 16];
                buf.copy_from_slice(&key);
                ids.push(Uuid::from_bytes(buf));
            }
        }
        Ok(ids)
    }
}

impl ContentStore for RocksStore {
    fn load_content(&self, doc_id: Uuid) -> Result<Option<StoredContent>, StoreError> {
        let cf = self
            .db
            .cf_handle(CF_CONTENT)
            .ok_or_else(|| StoreError::Database("missing content column family".into()))?;
        let blob = match self.db.get_cf(&cf, doc_id.as_bytes())? {
            Some(blob) => blob,
            None => return Ok(None),
        };
        let generation = self.meta_of(doc_id)?.map(|m| m.generation).unwrap_or(0);
        Ok(Some(StoredContent { blob, generation }))
    }

    fn save_content(
        &self,
        doc_id: Uuid,
        blob: &[u8],
        expected_generation: u64,
    ) -> Result<u64, StoreError> {
        let content_cf = self
            .db
            .cf_handle(CF_CONTENT)
            .ok_or_else(|| StoreError::Database("missing content column family".into()))?;
        let meta_cf = self
            .db
            .cf_handle(CF_META)
            .ok_or_else(|| StoreError::Database("missing meta column family".into()))?;

        let current = self.meta_of(doc_id)?.map(|m| m.generation).unwrap_or(0);
        if current != expected_generation {
            log::warn!(
                "stale write for doc {doc_id}: stored generation {current}, expected {expected_generation}"
            );
        }
        let generation = current.max(expected_generation) + 1;
        let meta = ContentMeta {
            generation,
            blob_size: blob.len() as u64,
            updated_at: unix_seconds(),
        };

        // One atomic batch so blob and generation never diverge.
        let mut batch = WriteBatch::default();
        batch.put_cf(&content_cf, doc_id.as_bytes(), blob);
        batch.put_cf(&meta_cf, doc_id.as_bytes(), meta.encode()?);
        self.db.write(batch)?;

        Ok(generation)
    }
}

fn parallelism() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(2)
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
