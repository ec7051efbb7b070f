//! Error types for the chunk processing pipeline
//!
//! The two classes that matter to callers are [`Initialization`] and
//! [`ChunkAppend`]: both mean the output file may be unusable or truncated,
//! are fatal to that recording's processing pass, and leave the recording in
//! the unprocessed registry so a later pass can retry it.
//!
//! [`Initialization`]: VideoProcessingError::Initialization
//! [`ChunkAppend`]: VideoProcessingError::ChunkAppend

use thiserror::Error;

/// Main error type for chunk processing operations
#[derive(Error, Debug)]
pub enum VideoProcessingError {
    /// The sink could not open the output container from the first chunk
    #[error("Failed to initialize recording output for {hash}: {reason}")]
    Initialization {
        /// Recording hash
        hash: String,
        /// Failure reason
        reason: String,
    },

    /// The sink rejected a chunk after the output was opened
    #[error("Failed to append chunk {sequence} of recording {hash}: {reason}")]
    ChunkAppend {
        /// Recording hash
        hash: String,
        /// Sequence number of the rejected chunk
        sequence: u64,
        /// Failure reason
        reason: String,
    },

    /// The sink could not close the output container
    #[error("Failed to finalize recording {hash}: {reason}")]
    Finalize {
        /// Recording hash
        hash: String,
        /// Failure reason
        reason: String,
    },

    /// An orphaned recording had no stored chunks left to recover
    #[error("Nothing to recover for recording {hash}: no stored chunks")]
    NothingToRecover {
        /// Recording hash
        hash: String,
    },

    /// Temporary chunk storage operation failed
    #[error("Chunk storage error: {reason}")]
    Storage {
        /// Failure reason
        reason: String,
    },

    /// Archive extraction or creation failed
    #[error("Archive error: {reason}")]
    Archive {
        /// Failure reason
        reason: String,
    },

    /// The external muxer process failed
    #[error("Muxer error: {reason}")]
    Muxer {
        /// Failure reason
        reason: String,
    },

    /// Unprocessed-recording registry could not be read or written
    #[error("Registry error: {reason}")]
    Registry {
        /// Failure reason
        reason: String,
    },

    /// I/O operation failed
    #[error("I/O error: {source}")]
    Io {
        /// Underlying error
        #[from]
        source: std::io::Error,
    },
}

/// Result type alias for chunk processing operations
pub type VideoResult<T> = Result<T, VideoProcessingError>;

impl VideoProcessingError {
    /// Whether the recording should stay in the unprocessed registry for a
    /// later retry pass
    pub fn leaves_recording_registered(&self) -> bool {
        match self {
            VideoProcessingError::Initialization { .. } => true,
            VideoProcessingError::ChunkAppend { .. } => true,
            VideoProcessingError::Finalize { .. } => true,
            VideoProcessingError::NothingToRecover { .. } => false,
            VideoProcessingError::Storage { .. } => true,
            VideoProcessingError::Archive { .. } => false,
            VideoProcessingError::Muxer { .. } => true,
            VideoProcessingError::Registry { .. } => true,
            VideoProcessingError::Io { .. } => true,
        }
    }
}
