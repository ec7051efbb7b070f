//! Orphaned-recording detection and reprocessing
//!
//! Every recording registers itself as "unprocessed" while chunks are
//! arriving and stays registered until its output container is finalized. A
//! crash leaves the entry behind; on the next start the recovery manager
//! finds entries that are neither actively recorded nor actively processed
//! and pushes their stored chunks back through the regular processing
//! pipeline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::chunk_group::{self, ChunkGroup};
use crate::error::{VideoProcessingError, VideoResult};
use crate::processor::{LiveVideoProcessor, ProcessorConfig};
use crate::sink::ChunkSink;
use crate::storage::ChunkStorage;

/// File name of the persisted registry inside the chunk storage root
pub const REGISTRY_FILE_NAME: &str = "unprocessed_videos.json";

/// Default window after which a silent recording counts as orphaned
pub const DEFAULT_ORPHAN_TIMEOUT: Duration = Duration::from_secs(10);

/// One recording that has not been fully processed yet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnprocessedVideoEntry {
    /// Stable hash assigned when the recording started
    pub hash: String,
    /// Target output file name
    pub file_name: String,
    /// Whether processed chunks are kept in temporary storage as backup
    pub keep_backup: bool,
    /// When the recording started
    pub date_start: DateTime<Utc>,
    /// Last time a chunk of this recording was stored
    pub date_last_recording_update: DateTime<Utc>,
    /// When the recording finished; `None` while still in progress
    pub date_finish: Option<DateTime<Utc>>,
    /// Last time processing made progress on this recording
    pub date_last_processing_update: Option<DateTime<Utc>>,
}

impl UnprocessedVideoEntry {
    /// Classify this entry at `now`.
    ///
    /// A recording is failed/orphaned iff it is neither actively recorded
    /// (chunk stored within `timeout` while unfinished) nor actively
    /// processed (processing progress within `timeout` while finished but
    /// unprocessed). The dual window avoids reclaiming a recording that is
    /// merely slow while still reclaiming one abandoned by a crash.
    pub fn is_failed_at(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let timeout = chrono::Duration::from_std(timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(10));

        let actively_recording = self.date_finish.is_none()
            && now.signed_duration_since(self.date_last_recording_update) < timeout;
        let actively_processing = self.date_finish.is_some()
            && self
                .date_last_processing_update
                .map(|at| now.signed_duration_since(at) < timeout)
                .unwrap_or(false);

        !actively_recording && !actively_processing
    }
}

/// Persisted registry of unprocessed recordings, keyed by hash
#[derive(Debug)]
pub struct UnprocessedVideoRegistry {
    path: PathBuf,
    entries: Mutex<HashMap<String, UnprocessedVideoEntry>>,
}

impl UnprocessedVideoRegistry {
    /// Load the registry from the chunk storage root, starting empty when no
    /// registry file exists yet.
    pub async fn load(storage_root: &Path) -> VideoResult<Self> {
        let path = storage_root.join(REGISTRY_FILE_NAME);
        let entries = match fs::read(&path).await {
            Ok(raw) => serde_json::from_slice::<HashMap<String, UnprocessedVideoEntry>>(&raw)
                .map_err(|e| VideoProcessingError::Registry {
                    reason: format!("failed to parse {}: {e}", path.display()),
                })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(count = entries.len(), "unprocessed-video registry loaded");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Register a recording that just started
    pub async fn register(&self, hash: &str, file_name: &str, keep_backup: bool) {
        let now = Utc::now();
        self.entries.lock().insert(
            hash.to_string(),
            UnprocessedVideoEntry {
                hash: hash.to_string(),
                file_name: file_name.to_string(),
                keep_backup,
                date_start: now,
                date_last_recording_update: now,
                date_finish: None,
                date_last_processing_update: None,
            },
        );
        self.persist().await;
    }

    /// Record that a chunk of this recording was just stored
    pub async fn touch_recording(&self, hash: &str) {
        {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get_mut(hash) {
                entry.date_last_recording_update = Utc::now();
            }
        }
        self.persist().await;
    }

    /// Record that the recording stopped producing chunks
    pub async fn mark_finished(&self, hash: &str) {
        {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get_mut(hash) {
                entry.date_finish = Some(Utc::now());
            }
        }
        self.persist().await;
    }

    /// Record that processing made progress on this recording
    pub async fn touch_processing(&self, hash: &str) {
        {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get_mut(hash) {
                entry.date_last_processing_update = Some(Utc::now());
            }
        }
        self.persist().await;
    }

    /// Drop a recording from the registry (processed or discarded)
    pub async fn remove(&self, hash: &str) {
        self.entries.lock().remove(hash);
        self.persist().await;
    }

    /// Snapshot of every registered entry
    pub fn entries(&self) -> Vec<UnprocessedVideoEntry> {
        self.entries.lock().values().cloned().collect()
    }

    /// Entry for one hash, if registered
    pub fn get(&self, hash: &str) -> Option<UnprocessedVideoEntry> {
        self.entries.lock().get(hash).cloned()
    }

    /// Entries classified as failed/orphaned at the current time
    pub fn failed_entries(&self, timeout: Duration) -> Vec<UnprocessedVideoEntry> {
        let now = Utc::now();
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.is_failed_at(now, timeout))
            .cloned()
            .collect()
    }

    /// Number of registered entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    async fn persist(&self) {
        let snapshot = { self.entries.lock().clone() };
        let encoded = match serde_json::to_vec_pretty(&snapshot) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("failed to encode unprocessed-video registry: {e}");
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, encoded).await {
            warn!(path = %self.path.display(), "failed to persist registry: {e}");
        }
    }
}

/// Configuration for orphan detection
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Window after which a silent recording counts as orphaned.
    ///
    /// Preserved as a configurable default; there is no stated rationale for
    /// the specific value beyond the original behaviour.
    pub orphan_timeout: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            orphan_timeout: DEFAULT_ORPHAN_TIMEOUT,
        }
    }
}

/// Outcome of a recovery pass
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Hashes whose output was completed
    pub recovered: Vec<String>,
    /// Per-recording failures; siblings are unaffected
    pub failed: Vec<(String, VideoProcessingError)>,
}

/// Startup recovery driver for recordings interrupted mid-flight
pub struct RecoveryManager {
    storage: Arc<ChunkStorage>,
    registry: Arc<UnprocessedVideoRegistry>,
    sink: Arc<dyn ChunkSink>,
    config: RecoveryConfig,
    processor_config: ProcessorConfig,
}

impl RecoveryManager {
    /// Create a recovery manager over shared storage, registry and sink
    pub fn new(
        storage: Arc<ChunkStorage>,
        registry: Arc<UnprocessedVideoRegistry>,
        sink: Arc<dyn ChunkSink>,
        config: RecoveryConfig,
        processor_config: ProcessorConfig,
    ) -> Self {
        Self {
            storage,
            registry,
            sink,
            config,
            processor_config,
        }
    }

    /// Reprocess every orphaned recording that still has stored chunks.
    ///
    /// Orphans without any stored chunk are discarded immediately and
    /// reported as failed — there is nothing to recover. Failures are
    /// isolated per recording: one recording's error never aborts its
    /// siblings.
    pub async fn process_interrupted_recordings(&self) -> VideoResult<RecoveryReport> {
        let orphans = self.registry.failed_entries(self.config.orphan_timeout);
        if orphans.is_empty() {
            debug!("no orphaned recordings found");
            return Ok(RecoveryReport::default());
        }
        info!(count = orphans.len(), "recovering orphaned recordings");

        let groups = chunk_group::collect_groups(&self.storage).await?;
        let mut report = RecoveryReport::default();
        for entry in orphans {
            match self.recover_one(&entry, groups.get(&entry.hash)).await {
                Ok(()) => {
                    info!(hash = %entry.hash, "recording recovered");
                    report.recovered.push(entry.hash);
                }
                Err(e) => {
                    error!(hash = %entry.hash, "recovery failed: {e}");
                    report.failed.push((entry.hash, e));
                }
            }
        }
        Ok(report)
    }

    async fn recover_one(
        &self,
        entry: &UnprocessedVideoEntry,
        group: Option<&ChunkGroup>,
    ) -> VideoResult<()> {
        let Some(group) = group.filter(|group| !group.chunks.is_empty()) else {
            self.registry.remove(&entry.hash).await;
            return Err(VideoProcessingError::NothingToRecover {
                hash: entry.hash.clone(),
            });
        };

        let mut processor = LiveVideoProcessor::new(
            entry.hash.clone(),
            entry.file_name.clone(),
            entry.keep_backup,
            Arc::clone(&self.sink),
            Arc::clone(&self.storage),
            Some(Arc::clone(&self.registry)),
            self.processor_config.clone(),
        );

        // chunks re-enter with their original sequence numbers; the queue's
        // skip-ahead policy deals with sequences lost to the crash
        for chunk in &group.chunks {
            let payload = self.storage.get(&chunk.key).await?;
            processor.add_chunk(payload, chunk.sequence).await?;
        }
        processor.stop_processing().await
    }

    /// Remove stored chunks and registry entries for the orphaned set, or for
    /// every registered recording when `include_not_failed` is set. Returns
    /// the hashes that were discarded.
    pub async fn discard_unprocessed_videos(
        &self,
        include_not_failed: bool,
    ) -> VideoResult<Vec<String>> {
        let targets = if include_not_failed {
            self.registry.entries()
        } else {
            self.registry.failed_entries(self.config.orphan_timeout)
        };

        let mut discarded = Vec::with_capacity(targets.len());
        for entry in targets {
            let removed = chunk_group::delete_group(&self.storage, &entry.hash).await?;
            self.registry.remove(&entry.hash).await;
            debug!(hash = %entry.hash, chunks = removed, "unprocessed recording discarded");
            discarded.push(entry.hash);
        }
        Ok(discarded)
    }
}
