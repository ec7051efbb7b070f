//! Chunk sink boundary
//!
//! The sink is the external collaborator that turns a sequence of chunks into
//! a finalized, playable media container. The first chunk opens the output
//! and yields an opaque [`SinkProcessId`]; every later append and the final
//! close require that handle, so a call can never target the wrong process.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::error::VideoResult;

/// Opaque handle identifying one live muxing process.
///
/// Minted by [`ChunkSink::start_video_recording`] and required by every
/// subsequent append/finalize call for the same recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkProcessId(Uuid);

impl SinkProcessId {
    /// Mint a fresh handle. Only sink implementations create these.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SinkProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SinkProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Result of opening an output container from a first chunk
#[derive(Debug, Clone)]
pub struct RecordingStart {
    /// Handle for subsequent append/finalize calls
    pub process: SinkProcessId,
    /// Where the output container is being written
    pub output_path: PathBuf,
}

/// Result of extracting a chunk archive
#[derive(Debug, Clone)]
pub struct ExtractedArchive {
    /// Extracted chunk files in the archive's reported entry order
    pub chunk_paths: Vec<PathBuf>,
    /// Telemetry side-file found in the archive, if any
    pub telemetry_file_path: Option<PathBuf>,
    /// Recording hash recovered from the chunk names
    pub hash: String,
    /// Output file name for the recording
    pub file_name: String,
    /// Scratch directory holding the extracted files; callers clean it up
    pub temp_dir: PathBuf,
}

/// External process boundary consuming chunks and producing playable output
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Open an output container from the first chunk of a recording
    async fn start_video_recording(
        &self,
        first_chunk: Bytes,
        hash: &str,
        file_name: &str,
        keep_backup: bool,
    ) -> VideoResult<RecordingStart>;

    /// Append a later chunk to an open output container
    async fn append_chunk(
        &self,
        process: SinkProcessId,
        chunk: Bytes,
        sequence: u64,
    ) -> VideoResult<()>;

    /// Signal end-of-input so the container can close cleanly
    async fn finalize_video_recording(&self, process: SinkProcessId) -> VideoResult<()>;

    /// Extract a chunk archive into a scratch directory
    async fn extract_video_chunks_zip(&self, archive_path: &Path) -> VideoResult<ExtractedArchive>;

    /// Copy a telemetry side-file to sit alongside a finished video
    async fn copy_telemetry_file(
        &self,
        source: &Path,
        destination_video_path: &Path,
    ) -> VideoResult<()>;

    /// Remove a scratch directory produced by archive extraction
    async fn cleanup_temp_dir(&self, path: &Path) -> VideoResult<()>;
}
