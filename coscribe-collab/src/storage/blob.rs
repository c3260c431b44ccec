//! Snapshot blob codec: bincode behind LZ4 frame compression.
//!
//! Snapshots are mostly positions and repeated site ids, which LZ4 folds
//! up well; decompression stays cheap enough to run inline on session
//! activation.

use coscribe_text::DocumentSnapshot;

use super::StoreError;

/// Encode a snapshot to its stored form.
pub fn encode_snapshot(snapshot: &DocumentSnapshot) -> Result<Vec<u8>, StoreError> {
    let raw = bincode::serde::encode_to_vec(snapshot, bincode::config::standard())
        .map_err(|e| StoreError::Codec(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&raw))
}

/// Decode a stored blob back into a snapshot.
pub fn decode_snapshot(blob: &[u8]) -> Result<DocumentSnapshot, StoreError> {
    let raw = lz4_flex::decompress_size_prepended(blob)
        .map_err(|e| StoreError::Codec(e.to_string()))?;
    let (snapshot, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())
        .map_err(|e| StoreError::Codec(e.to_string()))?;
    Ok(snapshot)
}
