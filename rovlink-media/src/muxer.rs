//! Streaming muxer backed by an external ffmpeg process
//!
//! Each recording gets its own ffmpeg child writing a fragmented MP4: the
//! `frag_keyframe+empty_moov` flags place a complete moov atom at the front
//! and flush self-contained fragments as chunks stream in, so the output
//! stays playable up to the last flushed fragment even when the process (or
//! the whole application) dies mid-recording.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{VideoProcessingError, VideoResult};
use crate::sink::{ChunkSink, ExtractedArchive, RecordingStart, SinkProcessId};
use crate::storage::ChunkStorage;

/// Configuration for the ffmpeg-backed muxer
#[derive(Debug, Clone)]
pub struct StreamingMuxerConfig {
    /// Directory receiving finished output containers
    pub output_dir: PathBuf,
    /// Name or path of the ffmpeg binary
    pub ffmpeg_binary: String,
}

impl StreamingMuxerConfig {
    /// Muxer writing into `output_dir` using the `ffmpeg` found on PATH
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ffmpeg_binary: "ffmpeg".to_string(),
        }
    }
}

struct MuxProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    output_path: PathBuf,
}

/// [`ChunkSink`] implementation spawning one ffmpeg process per recording
pub struct StreamingMuxer {
    config: StreamingMuxerConfig,
    processes: DashMap<SinkProcessId, Arc<Mutex<MuxProcess>>>,
}

impl StreamingMuxer {
    /// Create a muxer with the given configuration
    pub fn new(config: StreamingMuxerConfig) -> Self {
        Self {
            config,
            processes: DashMap::new(),
        }
    }

    fn process_handle(&self, process: SinkProcessId) -> VideoResult<Arc<Mutex<MuxProcess>>> {
        self.processes
            .get(&process)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| VideoProcessingError::Muxer {
                reason: format!("unknown muxing process {process}"),
            })
    }
}

#[async_trait]
impl ChunkSink for StreamingMuxer {
    async fn start_video_recording(
        &self,
        first_chunk: Bytes,
        hash: &str,
        file_name: &str,
        keep_backup: bool,
    ) -> VideoResult<RecordingStart> {
        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        let output_path = self.config.output_dir.join(file_name);

        let mut child = Command::new(&self.config.ffmpeg_binary)
            .arg("-hide_banner")
            .args(["-loglevel", "error"])
            .arg("-y")
            .args(["-i", "pipe:0"])
            .args(["-c", "copy"])
            .args(["-movflags", "frag_keyframe+empty_moov+default_base_moof"])
            .args(["-f", "mp4"])
            .arg(&output_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| VideoProcessingError::Muxer {
                reason: format!("failed to spawn {}: {e}", self.config.ffmpeg_binary),
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| VideoProcessingError::Muxer {
            reason: "muxer stdin unavailable".to_string(),
        })?;
        stdin
            .write_all(&first_chunk)
            .await
            .map_err(|e| VideoProcessingError::Muxer {
                reason: format!("failed to write first chunk: {e}"),
            })?;

        let process = SinkProcessId::new();
        self.processes.insert(
            process,
            Arc::new(Mutex::new(MuxProcess {
                child,
                stdin: Some(stdin),
                output_path: output_path.clone(),
            })),
        );
        info!(
            %process,
            hash,
            keep_backup,
            output = %output_path.display(),
            "recording output opened"
        );
        Ok(RecordingStart {
            process,
            output_path,
        })
    }

    async fn append_chunk(
        &self,
        process: SinkProcessId,
        chunk: Bytes,
        sequence: u64,
    ) -> VideoResult<()> {
        let handle = self.process_handle(process)?;
        let mut mux = handle.lock().await;
        let stdin = mux
            .stdin
            .as_mut()
            .ok_or_else(|| VideoProcessingError::Muxer {
                reason: format!("muxing process {process} already finalized"),
            })?;
        stdin
            .write_all(&chunk)
            .await
            .map_err(|e| VideoProcessingError::Muxer {
                reason: format!("failed to write chunk {sequence}: {e}"),
            })?;
        Ok(())
    }

    async fn finalize_video_recording(&self, process: SinkProcessId) -> VideoResult<()> {
        let (_, handle) =
            self.processes
                .remove(&process)
                .ok_or_else(|| VideoProcessingError::Muxer {
                    reason: format!("unknown muxing process {process}"),
                })?;
        let mut mux = handle.lock().await;

        // dropping stdin signals end-of-input to ffmpeg
        drop(mux.stdin.take());
        let status = mux
            .child
            .wait()
            .await
            .map_err(|e| VideoProcessingError::Muxer {
                reason: format!("failed to wait for muxer exit: {e}"),
            })?;
        if !status.success() {
            return Err(VideoProcessingError::Muxer {
                reason: format!("muxer exited with {status}"),
            });
        }
        debug!(%process, output = %mux.output_path.display(), "recording finalized");
        Ok(())
    }

    async fn extract_video_chunks_zip(&self, archive_path: &Path) -> VideoResult<ExtractedArchive> {
        let archive_path = archive_path.to_path_buf();
        tokio::task::spawn_blocking(move || extract_archive_blocking(&archive_path))
            .await
            .map_err(|e| VideoProcessingError::Archive {
                reason: format!("extraction task failed: {e}"),
            })?
    }

    async fn copy_telemetry_file(
        &self,
        source: &Path,
        destination_video_path: &Path,
    ) -> VideoResult<()> {
        let destination = destination_video_path.with_extension("ass");
        tokio::fs::copy(source, &destination).await?;
        debug!(
            source = %source.display(),
            destination = %destination.display(),
            "telemetry overlay copied"
        );
        Ok(())
    }

    async fn cleanup_temp_dir(&self, path: &Path) -> VideoResult<()> {
        tokio::fs::remove_dir_all(path).await?;
        Ok(())
    }
}

/// Derive the recording file name from an archive path, stripping the
/// `_part<N>` suffix multi-part exports carry.
pub fn recording_name_from_archive(archive_path: &Path) -> String {
    let stem = archive_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("recovered");
    match stem.rsplit_once("_part") {
        Some((base, part))
            if !base.is_empty() && !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()) =>
        {
            base.to_string()
        }
        _ => stem.to_string(),
    }
}

fn extract_archive_blocking(archive_path: &Path) -> VideoResult<ExtractedArchive> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| VideoProcessingError::Archive {
        reason: format!("failed to open archive {}: {e}", archive_path.display()),
    })?;

    let temp_dir = tempfile::Builder::new()
        .prefix("rovlink-chunks-")
        .tempdir()?
        .into_path();

    let mut chunk_paths = Vec::new();
    let mut telemetry_file_path = None;
    let mut hash: Option<String> = None;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| VideoProcessingError::Archive {
                reason: format!("failed to read archive entry {index}: {e}"),
            })?;
        if entry.is_dir() {
            continue;
        }

        // keep only the final path component so crafted entries cannot
        // escape the scratch directory
        let entry_name = entry.name().to_string();
        let Some(file_name) = Path::new(&entry_name)
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
        else {
            warn!(entry = %entry_name, "skipping archive entry without a usable name");
            continue;
        };

        let destination = temp_dir.join(&file_name);
        let mut output = std::fs::File::create(&destination)?;
        std::io::copy(&mut entry, &mut output)?;

        if file_name.ends_with(".ass") {
            telemetry_file_path = Some(destination);
        } else if let Some((chunk_hash, _)) = ChunkStorage::parse_chunk_key(&file_name) {
            if hash.is_none() {
                hash = Some(chunk_hash.to_string());
            }
            chunk_paths.push(destination);
        } else {
            debug!(entry = %file_name, "ignoring non-chunk archive entry");
        }
    }

    let hash = hash.ok_or_else(|| VideoProcessingError::Archive {
        reason: format!("archive {} contains no chunks", archive_path.display()),
    })?;

    Ok(ExtractedArchive {
        chunk_paths,
        telemetry_file_path,
        hash,
        file_name: recording_name_from_archive(archive_path),
        temp_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_name_strips_part_suffix() {
        assert_eq!(
            recording_name_from_archive(Path::new("/tmp/dive-42_part2.zip")),
            "dive-42"
        );
        assert_eq!(
            recording_name_from_archive(Path::new("dive-42.zip")),
            "dive-42"
        );
        // "_part" without a number is part of the real name
        assert_eq!(
            recording_name_from_archive(Path::new("spare_part.zip")),
            "spare_part"
        );
    }
}
