//! Chunk lifecycle pipeline for the rovlink ground-control video system
//!
//! Everything between "a chunk of recorded media exists" and "a playable
//! container is on disk" lives here: temporary chunk storage, the ordered
//! chunk queue, the external muxer boundary, orphaned-recording recovery and
//! archive export/import of unfinished recordings.

#![warn(clippy::all)]

pub mod archive;
pub mod chunk_group;
pub mod error;
pub mod muxer;
pub mod processor;
pub mod recovery;
pub mod sink;
pub mod storage;

pub use archive::{export_group, export_group_with_limit, ARCHIVE_PART_MAX_BYTES};
pub use chunk_group::{collect_groups, delete_all_groups, delete_group, ChunkGroup, StoredChunk};
pub use error::{VideoProcessingError, VideoResult};
pub use muxer::{recording_name_from_archive, StreamingMuxer, StreamingMuxerConfig};
pub use processor::{
    LiveVideoProcessor, ProcessorConfig, ProgressCallback, DEFAULT_SKIP_AHEAD_BACKLOG,
};
pub use recovery::{
    RecoveryConfig, RecoveryManager, RecoveryReport, UnprocessedVideoEntry,
    UnprocessedVideoRegistry, DEFAULT_ORPHAN_TIMEOUT, REGISTRY_FILE_NAME,
};
pub use sink::{ChunkSink, ExtractedArchive, RecordingStart, SinkProcessId};
pub use storage::{ChunkStorage, THUMBNAIL_PREFIX};
