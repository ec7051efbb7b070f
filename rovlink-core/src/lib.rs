//! Core session layer for the rovlink ground-control video pipeline
//!
//! This crate owns the peer-to-peer half of the live video path: the
//! [`Session`] state machine wrapping a WebRTC peer connection, ICE candidate
//! screening, and the [`NegotiationSender`] seam through which sessions hand
//! their negotiation messages to the signalling channel.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod ice;
pub mod session;

pub use error::RovlinkError;
pub use ice::{evaluate_candidate, extract_ipv4, CandidateDecision};
pub use session::{
    JitterBufferTarget, NegotiationSender, Session, SessionConfig, SessionIds, SessionState,
    MAX_JITTER_BUFFER_TARGET_MS,
};
