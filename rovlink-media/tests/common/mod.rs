//! Shared test support: an in-memory chunk sink recording every call it sees

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use rovlink_media::{
    ChunkSink, ExtractedArchive, RecordingStart, SinkProcessId, VideoProcessingError, VideoResult,
};

/// One observed sink invocation
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Start { hash: String, payload: Vec<u8> },
    Append { sequence: u64, payload: Vec<u8> },
    Finalize,
    CopyTelemetry { source: PathBuf, destination: PathBuf },
    Cleanup(PathBuf),
}

#[derive(Default)]
pub struct MockSink {
    pub calls: Mutex<Vec<SinkCall>>,
    /// Fail `start_video_recording` for this hash
    pub fail_start_for: Mutex<Option<String>>,
    /// Fail `append_chunk` at this sequence number
    pub fail_append_at: Mutex<Option<u64>>,
    /// Canned result for `extract_video_chunks_zip`
    pub extracted: Mutex<Option<ExtractedArchive>>,
}

impl MockSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    /// Sequence numbers of every `Append` call, in observation order
    pub fn appended_sequences(&self) -> Vec<u64> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                SinkCall::Append { sequence, .. } => Some(*sequence),
                _ => None,
            })
            .collect()
    }

    pub fn finalize_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, SinkCall::Finalize))
            .count()
    }
}

#[async_trait]
impl ChunkSink for MockSink {
    async fn start_video_recording(
        &self,
        first_chunk: Bytes,
        hash: &str,
        file_name: &str,
        _keep_backup: bool,
    ) -> VideoResult<RecordingStart> {
        if self.fail_start_for.lock().as_deref() == Some(hash) {
            return Err(VideoProcessingError::Muxer {
                reason: "simulated start failure".to_string(),
            });
        }
        self.calls.lock().push(SinkCall::Start {
            hash: hash.to_string(),
            payload: first_chunk.to_vec(),
        });
        Ok(RecordingStart {
            process: SinkProcessId::new(),
            output_path: PathBuf::from("outputs").join(file_name),
        })
    }

    async fn append_chunk(
        &self,
        _process: SinkProcessId,
        chunk: Bytes,
        sequence: u64,
    ) -> VideoResult<()> {
        if *self.fail_append_at.lock() == Some(sequence) {
            return Err(VideoProcessingError::Muxer {
                reason: "simulated append failure".to_string(),
            });
        }
        self.calls.lock().push(SinkCall::Append {
            sequence,
            payload: chunk.to_vec(),
        });
        Ok(())
    }

    async fn finalize_video_recording(&self, _process: SinkProcessId) -> VideoResult<()> {
        self.calls.lock().push(SinkCall::Finalize);
        Ok(())
    }

    async fn extract_video_chunks_zip(&self, _archive_path: &Path) -> VideoResult<ExtractedArchive> {
        self.extracted
            .lock()
            .clone()
            .ok_or_else(|| VideoProcessingError::Archive {
                reason: "no extraction configured".to_string(),
            })
    }

    async fn copy_telemetry_file(
        &self,
        source: &Path,
        destination_video_path: &Path,
    ) -> VideoResult<()> {
        self.calls.lock().push(SinkCall::CopyTelemetry {
            source: source.to_path_buf(),
            destination: destination_video_path.to_path_buf(),
        });
        Ok(())
    }

    async fn cleanup_temp_dir(&self, path: &Path) -> VideoResult<()> {
        self.calls.lock().push(SinkCall::Cleanup(path.to_path_buf()));
        Ok(())
    }
}
