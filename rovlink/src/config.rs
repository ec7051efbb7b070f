//! Configuration types and defaults

use std::path::PathBuf;

use rovlink_core::SessionConfig;
use rovlink_media::{ProcessorConfig, RecoveryConfig};
use rovlink_signaling::SignallerConfig;

/// Global rovlink configuration
///
/// Every timing and threshold the pipeline relies on is surfaced here with
/// its original default: the 1000 ms signalling reconnect delay, the 10 s
/// orphan timeouts and the 5-chunk skip-ahead backlog are configurable but
/// carry no stated rationale beyond preserved behaviour.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    /// Signalling server URL
    pub signalling_url: String,
    /// Control-channel behaviour
    pub signaller: SignallerConfig,
    /// Peer session configuration (ICE servers, allowlists, jitter target)
    pub session: SessionConfig,
    /// Chunk queue tunables
    pub processor: ProcessorConfig,
    /// Orphan detection tunables
    pub recovery: RecoveryConfig,
    /// Directory backing the temporary chunk store
    pub chunk_storage_dir: PathBuf,
    /// Directory receiving finished output containers
    pub output_dir: PathBuf,
    /// Keep processed chunks in temporary storage as backup
    pub keep_chunks_as_backup: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            signalling_url: "ws://127.0.0.1:6021".to_string(),
            signaller: SignallerConfig::default(),
            session: SessionConfig::default(),
            processor: ProcessorConfig::default(),
            recovery: RecoveryConfig::default(),
            chunk_storage_dir: PathBuf::from("video-chunks"),
            output_dir: PathBuf::from("videos"),
            keep_chunks_as_backup: false,
        }
    }
}
