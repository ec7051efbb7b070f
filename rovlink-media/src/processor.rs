//! Live video processor
//!
//! One processor instance owns the chunk queue of one recording. Chunks may
//! arrive in any order; delivery to the sink is strictly sequential. The
//! first delivered chunk opens the output container, later chunks append, and
//! [`LiveVideoProcessor::stop_processing`] finalizes the container so it
//! closes cleanly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{VideoProcessingError, VideoResult};
use crate::recovery::UnprocessedVideoRegistry;
use crate::sink::{ChunkSink, SinkProcessId};
use crate::storage::ChunkStorage;

/// Default number of chunks allowed to backlog behind a missing sequence
/// before the processor skips ahead
pub const DEFAULT_SKIP_AHEAD_BACKLOG: usize = 5;

/// Tunables of the chunk queue
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// How many chunks may queue up behind a single missing sequence before
    /// the processor force-advances past the gap.
    ///
    /// Skipping trades a guaranteed-gapless recording for liveness: the
    /// missing chunk is abandoned so the backlog can drain instead of
    /// stalling forever. Raising the threshold waits longer for stragglers;
    /// lowering it favours liveness.
    pub skip_ahead_backlog: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            skip_ahead_backlog: DEFAULT_SKIP_AHEAD_BACKLOG,
        }
    }
}

/// Callback receiving fractional progress (0–100) during batch processing
pub type ProgressCallback = Box<dyn Fn(f64) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessorState {
    Processing,
    Inactive,
}

/// Ordered chunk queue and sink driver for one recording
pub struct LiveVideoProcessor {
    hash: String,
    file_name: String,
    keep_backup: bool,
    config: ProcessorConfig,
    sink: Arc<dyn ChunkSink>,
    storage: Arc<ChunkStorage>,
    registry: Option<Arc<UnprocessedVideoRegistry>>,
    state: ProcessorState,
    queue: BTreeMap<u64, Bytes>,
    next_sequence: u64,
    received_any: bool,
    process: Option<SinkProcessId>,
    output_path: Option<PathBuf>,
}

impl LiveVideoProcessor {
    /// Create a processor for one recording; it starts in the processing
    /// state and is ready to accept chunks.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hash: impl Into<String>,
        file_name: impl Into<String>,
        keep_backup: bool,
        sink: Arc<dyn ChunkSink>,
        storage: Arc<ChunkStorage>,
        registry: Option<Arc<UnprocessedVideoRegistry>>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            hash: hash.into(),
            file_name: file_name.into(),
            keep_backup,
            config,
            sink,
            storage,
            registry,
            state: ProcessorState::Processing,
            queue: BTreeMap::new(),
            next_sequence: 0,
            received_any: false,
            process: None,
            output_path: None,
        }
    }

    /// Recording hash this processor serves
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Target output file name
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Whether the processor still accepts chunks
    pub fn is_processing(&self) -> bool {
        self.state == ProcessorState::Processing
    }

    /// Highest sequence number delivered to the sink so far
    pub fn last_processed(&self) -> Option<u64> {
        self.next_sequence.checked_sub(1)
    }

    /// Where the output container is being written, once the first chunk
    /// opened it
    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    /// Queue a chunk and drain everything that became sequential.
    ///
    /// Chunks arriving while the processor is inactive are dropped with a
    /// warning; there is no buffering outside the processing state. A sink
    /// failure deactivates the processor and is returned to the caller — the
    /// output may be unusable and the recording stays registered for retry.
    pub async fn add_chunk(&mut self, payload: Bytes, sequence: u64) -> VideoResult<()> {
        if self.state != ProcessorState::Processing {
            warn!(
                hash = %self.hash,
                sequence,
                "dropping chunk for inactive processor"
            );
            return Ok(());
        }

        self.received_any = true;
        self.queue.insert(sequence, payload);
        match self.drain().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = ProcessorState::Inactive;
                Err(e)
            }
        }
    }

    /// Drain remaining sequential chunks, finalize the output container and
    /// deactivate. Safe to call when already inactive.
    pub async fn stop_processing(&mut self) -> VideoResult<()> {
        if self.state != ProcessorState::Processing {
            debug!(hash = %self.hash, "stop requested for inactive processor");
            return Ok(());
        }
        let result = self.finish().await;
        self.state = ProcessorState::Inactive;
        result
    }

    async fn finish(&mut self) -> VideoResult<()> {
        self.drain().await?;

        if !self.queue.is_empty() {
            warn!(
                hash = %self.hash,
                remaining = self.queue.len(),
                "discarding chunks that never became sequential"
            );
            self.queue.clear();
        }

        match self.process.take() {
            Some(process) => {
                self.sink
                    .finalize_video_recording(process)
                    .await
                    .map_err(|e| VideoProcessingError::Finalize {
                        hash: self.hash.clone(),
                        reason: e.to_string(),
                    })?;
                self.deregister().await;
                Ok(())
            }
            None if self.received_any => {
                // chunks arrived but none could be delivered in order
                Err(VideoProcessingError::Initialization {
                    hash: self.hash.clone(),
                    reason: "no sequential chunks were delivered to the sink".to_string(),
                })
            }
            None => {
                // nothing ever arrived; there is no output to keep
                self.deregister().await;
                Ok(())
            }
        }
    }

    async fn drain(&mut self) -> VideoResult<()> {
        loop {
            let Some((&head, _)) = self.queue.first_key_value() else {
                break;
            };

            if head < self.next_sequence {
                // stale duplicate below the delivery watermark
                debug!(hash = %self.hash, sequence = head, "dropping stale chunk");
                self.queue.pop_first();
            } else if head == self.next_sequence {
                if let Some((sequence, payload)) = self.queue.pop_first() {
                    self.deliver(sequence, payload).await?;
                    self.next_sequence = sequence + 1;
                }
            } else if self.queue.len() > self.config.skip_ahead_backlog {
                warn!(
                    hash = %self.hash,
                    missing = self.next_sequence,
                    backlog = self.queue.len(),
                    "skipping missing chunk to keep the recording live"
                );
                self.next_sequence += 1;
            } else {
                // the gap may still fill; wait for more arrivals
                break;
            }
        }
        Ok(())
    }

    async fn deliver(&mut self, sequence: u64, payload: Bytes) -> VideoResult<()> {
        match self.process {
            None => {
                let started = self
                    .sink
                    .start_video_recording(payload, &self.hash, &self.file_name, self.keep_backup)
                    .await
                    .map_err(|e| VideoProcessingError::Initialization {
                        hash: self.hash.clone(),
                        reason: e.to_string(),
                    })?;
                debug!(
                    hash = %self.hash,
                    sequence,
                    output = %started.output_path.display(),
                    "recording output initialized"
                );
                self.process = Some(started.process);
                self.output_path = Some(started.output_path);
            }
            Some(process) => {
                self.sink
                    .append_chunk(process, payload, sequence)
                    .await
                    .map_err(|e| VideoProcessingError::ChunkAppend {
                        hash: self.hash.clone(),
                        sequence,
                        reason: e.to_string(),
                    })?;
            }
        }

        if let Some(registry) = &self.registry {
            registry.touch_processing(&self.hash).await;
        }

        if !self.keep_backup {
            let key = ChunkStorage::chunk_key(&self.hash, sequence);
            if let Err(e) = self.storage.remove(&key).await {
                // the chunk may never have been staged in temporary storage
                debug!(hash = %self.hash, key, "could not delete processed chunk: {e}");
            }
        }
        Ok(())
    }

    async fn deregister(&self) {
        if let Some(registry) = &self.registry {
            registry.remove(&self.hash).await;
        }
    }

    /// Stream the chunks of an exported archive through the sink.
    ///
    /// Extracts the archive, opens the output from the first extracted chunk,
    /// appends the rest strictly in the extraction's reported order, finalizes
    /// the container, copies the telemetry side-file next to the output when
    /// one is present and removes the scratch directory. `progress` receives
    /// fractional progress (0–100) at each phase.
    pub async fn process_zip_file(
        sink: Arc<dyn ChunkSink>,
        archive_path: &Path,
        progress: ProgressCallback,
    ) -> VideoResult<PathBuf> {
        progress(0.0);
        let extracted = sink.extract_video_chunks_zip(archive_path).await?;
        progress(15.0);

        let total = extracted.chunk_paths.len();
        let first_path =
            extracted
                .chunk_paths
                .first()
                .ok_or_else(|| VideoProcessingError::Archive {
                    reason: format!("archive {} contains no chunks", archive_path.display()),
                })?;
        let first_chunk = Bytes::from(tokio::fs::read(first_path).await?);
        let started = sink
            .start_video_recording(first_chunk, &extracted.hash, &extracted.file_name, true)
            .await
            .map_err(|e| VideoProcessingError::Initialization {
                hash: extracted.hash.clone(),
                reason: e.to_string(),
            })?;
        progress(20.0);

        for (index, path) in extracted.chunk_paths.iter().enumerate().skip(1) {
            let payload = Bytes::from(tokio::fs::read(path).await?);
            sink.append_chunk(started.process, payload, index as u64)
                .await
                .map_err(|e| VideoProcessingError::ChunkAppend {
                    hash: extracted.hash.clone(),
                    sequence: index as u64,
                    reason: e.to_string(),
                })?;
            progress(20.0 + 65.0 * (index + 1) as f64 / total as f64);
        }

        sink.finalize_video_recording(started.process)
            .await
            .map_err(|e| VideoProcessingError::Finalize {
                hash: extracted.hash.clone(),
                reason: e.to_string(),
            })?;
        progress(90.0);

        if let Some(telemetry) = &extracted.telemetry_file_path {
            sink.copy_telemetry_file(telemetry, &started.output_path)
                .await?;
        }
        progress(95.0);

        sink.cleanup_temp_dir(&extracted.temp_dir).await?;
        progress(100.0);

        Ok(started.output_path)
    }
}
