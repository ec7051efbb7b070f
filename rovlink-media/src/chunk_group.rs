//! Chunk grouping
//!
//! A [`ChunkGroup`] is a derived, read-only view of every stored chunk
//! sharing one recording hash, used for export and deletion. Ordering inside
//! a group is always re-derived from the numeric key suffix, never from
//! storage iteration order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::VideoResult;
use crate::storage::ChunkStorage;

/// One chunk as found in temporary storage
#[derive(Debug, Clone)]
pub struct StoredChunk {
    /// Full storage key (`<hash>_<sequence>`)
    pub key: String,
    /// Sequence number parsed from the key
    pub sequence: u64,
    /// Payload size in bytes
    pub size: u64,
    /// On-disk timestamp, when the platform exposes one
    pub modified_at: Option<DateTime<Utc>>,
}

/// Materialized view of all stored chunks of one recording
#[derive(Debug, Clone)]
pub struct ChunkGroup {
    /// Recording hash shared by every chunk in the group
    pub hash: String,
    /// Chunks in ascending sequence order
    pub chunks: Vec<StoredChunk>,
    /// Total payload size of the group in bytes
    pub total_size: u64,
    /// Best known start time of the recording
    pub first_chunk_date: Option<DateTime<Utc>>,
}

/// Group every stored chunk by recording hash.
///
/// Non-chunk keys (thumbnails, malformed names) are filtered out; keys that
/// vanish between listing and stat are skipped.
pub async fn collect_groups(storage: &ChunkStorage) -> VideoResult<HashMap<String, ChunkGroup>> {
    let mut grouped: HashMap<String, Vec<StoredChunk>> = HashMap::new();

    for key in storage.keys().await? {
        let Some((hash, sequence)) = ChunkStorage::parse_chunk_key(&key) else {
            continue;
        };
        let hash = hash.to_string();

        let size = match storage.size_of(&key).await {
            Ok(size) => size,
            Err(e) => {
                debug!(key, "skipping chunk that disappeared during grouping: {e}");
                continue;
            }
        };
        let modified_at = storage.modified_at(&key).await.unwrap_or(None);

        grouped.entry(hash).or_default().push(StoredChunk {
            key,
            sequence,
            size,
            modified_at,
        });
    }

    let mut groups = HashMap::with_capacity(grouped.len());
    for (hash, mut chunks) in grouped {
        chunks.sort_by_key(|chunk| chunk.sequence);
        let total_size = chunks.iter().map(|chunk| chunk.size).sum();
        let first_chunk_date = resolve_first_chunk_date(&chunks);
        groups.insert(
            hash.clone(),
            ChunkGroup {
                hash,
                chunks,
                total_size,
                first_chunk_date,
            },
        );
    }
    Ok(groups)
}

/// Remove every chunk key belonging to `hash`. Returns how many were removed.
pub async fn delete_group(storage: &ChunkStorage, hash: &str) -> VideoResult<usize> {
    let mut removed = 0;
    for key in storage.keys().await? {
        match ChunkStorage::parse_chunk_key(&key) {
            Some((chunk_hash, _)) if chunk_hash == hash => {
                storage.remove(&key).await?;
                removed += 1;
            }
            _ => {}
        }
    }
    Ok(removed)
}

/// Remove every chunk key of every group. Returns how many were removed.
pub async fn delete_all_groups(storage: &ChunkStorage) -> VideoResult<usize> {
    let mut removed = 0;
    for key in storage.keys().await? {
        if ChunkStorage::parse_chunk_key(&key).is_some() {
            storage.remove(&key).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Resolve the best known start time of a recording from its chunks.
///
/// Seeded from chunk 0's timestamp when present, otherwise from the first
/// chunk observed. Once a valid (non-epoch-zero) value exists the date only
/// ever moves earlier: a later timestamp never replaces an earlier one.
pub fn resolve_first_chunk_date(chunks: &[StoredChunk]) -> Option<DateTime<Utc>> {
    let mut date = chunks
        .iter()
        .find(|chunk| chunk.sequence == 0)
        .and_then(|chunk| chunk.modified_at)
        .or_else(|| chunks.first().and_then(|chunk| chunk.modified_at));

    for chunk in chunks {
        let Some(at) = chunk.modified_at else { continue };
        if at.timestamp_millis() == 0 {
            continue;
        }
        date = Some(match date {
            Some(current) if current.timestamp_millis() != 0 => current.min(at),
            _ => at,
        });
    }
    date
}
