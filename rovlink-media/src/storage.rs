//! Temporary chunk storage
//!
//! A filesystem-backed key-value store shared by every live recording.
//! Chunks are keyed `"<hash>_<sequenceNumber>"`; thumbnails live under
//! `"thumbnail_<name>"` keys in the same namespace and are never parsed as
//! chunks. The file modification time doubles as the chunk's on-disk
//! timestamp for first-chunk-date resolution.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::debug;

use crate::error::{VideoProcessingError, VideoResult};

/// Key prefix for thumbnail entries sharing the chunk namespace
pub const THUMBNAIL_PREFIX: &str = "thumbnail_";

/// Filesystem-backed key-value store for temporary chunks
#[derive(Debug, Clone)]
pub struct ChunkStorage {
    root: PathBuf,
}

impl ChunkStorage {
    /// Open (and create if needed) chunk storage rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> VideoResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "chunk storage opened");
        Ok(Self { root })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build the storage key of one chunk
    pub fn chunk_key(hash: &str, sequence: u64) -> String {
        format!("{hash}_{sequence}")
    }

    /// Parse a storage key into `(hash, sequence)`.
    ///
    /// Returns `None` for thumbnails and keys that do not follow the
    /// `<hash>_<sequenceNumber>` naming. The hash itself may contain
    /// underscores; the sequence is the final numeric suffix.
    pub fn parse_chunk_key(key: &str) -> Option<(&str, u64)> {
        if key.starts_with(THUMBNAIL_PREFIX) {
            return None;
        }
        let (hash, suffix) = key.rsplit_once('_')?;
        if hash.is_empty() {
            return None;
        }
        let sequence = suffix.parse::<u64>().ok()?;
        Some((hash, sequence))
    }

    /// Store a value under `key`, replacing any previous value
    pub async fn put(&self, key: &str, payload: &[u8]) -> VideoResult<()> {
        fs::write(self.entry_path(key)?, payload).await?;
        Ok(())
    }

    /// Read the value stored under `key`
    pub async fn get(&self, key: &str) -> VideoResult<Bytes> {
        let payload = fs::read(self.entry_path(key)?).await?;
        Ok(Bytes::from(payload))
    }

    /// Remove the value stored under `key`
    pub async fn remove(&self, key: &str) -> VideoResult<()> {
        fs::remove_file(self.entry_path(key)?).await?;
        Ok(())
    }

    /// Whether a value is stored under `key`
    pub async fn contains(&self, key: &str) -> bool {
        match self.entry_path(key) {
            Ok(path) => fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// List every key in the store, in unspecified order
    pub async fn keys(&self) -> VideoResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    keys.push(name.to_string());
                }
            }
        }
        Ok(keys)
    }

    /// Size in bytes of the value stored under `key`
    pub async fn size_of(&self, key: &str) -> VideoResult<u64> {
        let metadata = fs::metadata(self.entry_path(key)?).await?;
        Ok(metadata.len())
    }

    /// On-disk timestamp of the value stored under `key`, if the platform
    /// exposes one
    pub async fn modified_at(&self, key: &str) -> VideoResult<Option<DateTime<Utc>>> {
        let metadata = fs::metadata(self.entry_path(key)?).await?;
        Ok(metadata.modified().ok().map(DateTime::<Utc>::from))
    }

    fn entry_path(&self, key: &str) -> VideoResult<PathBuf> {
        // keys are flat names; a separator would escape the store root
        if key.is_empty() || key.contains(['/', '\\']) {
            return Err(VideoProcessingError::Storage {
                reason: format!("invalid storage key: {key:?}"),
            });
        }
        Ok(self.root.join(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_key_round_trip() {
        let key = ChunkStorage::chunk_key("abc123", 42);
        assert_eq!(key, "abc123_42");
        assert_eq!(ChunkStorage::parse_chunk_key(&key), Some(("abc123", 42)));
    }

    #[test]
    fn test_parse_rejects_non_chunk_keys() {
        assert_eq!(ChunkStorage::parse_chunk_key("thumbnail_video1"), None);
        assert_eq!(ChunkStorage::parse_chunk_key("thumbnail_7"), None);
        assert_eq!(ChunkStorage::parse_chunk_key("no-separator"), None);
        assert_eq!(ChunkStorage::parse_chunk_key("hash_notanumber"), None);
        assert_eq!(ChunkStorage::parse_chunk_key("_7"), None);
    }

    #[test]
    fn test_parse_keeps_underscored_hashes() {
        assert_eq!(
            ChunkStorage::parse_chunk_key("front_camera_7"),
            Some(("front_camera", 7))
        );
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = ChunkStorage::open(dir.path()).await.expect("open");

        storage.put("hash_0", b"payload").await.expect("put");
        assert!(storage.contains("hash_0").await);
        assert_eq!(storage.get("hash_0").await.expect("get").as_ref(), b"payload");
        assert_eq!(storage.size_of("hash_0").await.expect("size"), 7);

        storage.remove("hash_0").await.expect("remove");
        assert!(!storage.contains("hash_0").await);
    }

    #[tokio::test]
    async fn test_keys_lists_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = ChunkStorage::open(dir.path()).await.expect("open");

        storage.put("hash_0", b"a").await.expect("put");
        storage.put("hash_1", b"b").await.expect("put");
        storage.put("thumbnail_video", b"c").await.expect("put");

        let mut keys = storage.keys().await.expect("keys");
        keys.sort();
        assert_eq!(keys, vec!["hash_0", "hash_1", "thumbnail_video"]);
    }

    #[tokio::test]
    async fn test_separators_in_keys_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = ChunkStorage::open(dir.path()).await.expect("open");
        assert!(storage.put("../escape", b"x").await.is_err());
    }
}
