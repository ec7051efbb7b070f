//! # rovlink — live video pipeline for ground-control stations
//!
//! rovlink is the video backbone of a ground-control application for remote
//! vehicles (ROVs, boats, drones): it negotiates peer-to-peer video from
//! remote producers through a signalling server and ingests the recorded
//! media as time-ordered chunks that are incrementally persisted, recovered
//! after a crash and muxed into a playable container — without losing
//! footage even when the process dies mid-recording.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use rovlink::{Consumer, GlobalConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     rovlink::init_tracing();
//!
//!     let (consumer, mut events) = Consumer::new(GlobalConfig::default()).await?;
//!
//!     // finish anything a previous run left behind
//!     consumer.recover_interrupted_recordings().await?;
//!
//!     consumer.connect().await?;
//!     while let Some(event) = events.next().await {
//!         println!("pipeline event: {event:?}");
//!     }
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use rovlink_core::{
    evaluate_candidate, extract_ipv4, CandidateDecision, JitterBufferTarget, NegotiationSender,
    RovlinkError, Session, SessionConfig, SessionIds, SessionState, MAX_JITTER_BUFFER_TARGET_MS,
};

#[cfg(feature = "media")]
pub use rovlink_media::{
    ChunkGroup, ChunkSink, ChunkStorage, ExtractedArchive, LiveVideoProcessor, ProcessorConfig,
    RecordingStart, RecoveryConfig, RecoveryManager, RecoveryReport, SinkProcessId, StoredChunk,
    StreamingMuxer, StreamingMuxerConfig, UnprocessedVideoEntry, UnprocessedVideoRegistry,
    VideoProcessingError, VideoResult,
};

#[cfg(feature = "signaling")]
pub use rovlink_signaling::{
    Answer, ListenerId, Message, Negotiation, Question, Signaller, SignallerConfig, StreamOverview,
};

// Public API modules
#[cfg(all(feature = "media", feature = "signaling"))]
pub mod config;
#[cfg(all(feature = "media", feature = "signaling"))]
pub mod consumer;
#[cfg(feature = "signaling")]
pub mod event;
#[cfg(feature = "signaling")]
pub mod stream;

// Re-export main API types
#[cfg(all(feature = "media", feature = "signaling"))]
pub use config::GlobalConfig;
#[cfg(all(feature = "media", feature = "signaling"))]
pub use consumer::{Consumer, Recording};
#[cfg(feature = "signaling")]
pub use event::{Event, EventStream};
#[cfg(feature = "signaling")]
pub use stream::StreamDirectory;

/// Install the tracing subscriber used by rovlink binaries and tests.
///
/// Respects `RUST_LOG` through an [`EnvFilter`], defaulting to `info`.
/// Calling it more than once is a no-op so tests can call it freely.
///
/// [`EnvFilter`]: tracing_subscriber::EnvFilter
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
