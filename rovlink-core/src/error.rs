//! Error types for the rovlink session and signalling layers

use thiserror::Error;

/// Main error type for session and signalling operations
#[derive(Error, Debug)]
pub enum RovlinkError {
    /// Initialization error
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Reason for initialization failure
        reason: String,
    },

    /// Control-channel connection error
    #[error("Signalling connection failed for {url}: {reason}")]
    Connection {
        /// Signalling server URL
        url: String,
        /// Reason for connection failure
        reason: String,
    },

    /// Control-channel send failed
    #[error("Signalling send failed: {reason}")]
    SignallingSend {
        /// Reason for send failure
        reason: String,
    },

    /// A pending signalling request was abandoned before an answer arrived
    #[error("Signalling request interrupted: {request}")]
    RequestInterrupted {
        /// The request that was pending
        request: String,
    },

    /// Incoming control message could not be parsed
    #[error("Invalid signalling message: {reason}")]
    InvalidMessage {
        /// Parsing error description
        reason: String,
    },

    /// Peer connection setup or operation failed
    #[error("Peer connection error: {reason}")]
    PeerConnection {
        /// Reason for peer connection failure
        reason: String,
    },

    /// A step of the SDP negotiation chain was rejected
    #[error("Negotiation failed at {stage}: {reason}")]
    Negotiation {
        /// The negotiation step that rejected
        stage: String,
        /// Reason for rejection
        reason: String,
    },

    /// Invalid state for the attempted operation
    #[error("Invalid session state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },
}

impl RovlinkError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            RovlinkError::Initialization { .. } => "INITIALIZATION_FAILED",
            RovlinkError::Connection { .. } => "CONNECTION_FAILED",
            RovlinkError::SignallingSend { .. } => "SIGNALLING_SEND_FAILED",
            RovlinkError::RequestInterrupted { .. } => "REQUEST_INTERRUPTED",
            RovlinkError::InvalidMessage { .. } => "INVALID_MESSAGE",
            RovlinkError::PeerConnection { .. } => "PEER_CONNECTION_ERROR",
            RovlinkError::Negotiation { .. } => "NEGOTIATION_FAILED",
            RovlinkError::InvalidState { .. } => "INVALID_STATE",
        }
    }
}
