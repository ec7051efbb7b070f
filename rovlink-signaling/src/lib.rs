//! Signalling channel and wire protocol for the rovlink video pipeline
//!
//! Brokers session setup between remote video producers and this consumer
//! before any direct peer connection exists: peer-id assignment, stream
//! discovery, session creation and the ICE/SDP negotiation relay, all over a
//! single reconnecting WebSocket.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod protocol;
pub mod signaller;

pub use protocol::{
    Answer, AvailableStreamsContent, EndSessionContent, IceNegotiationContent,
    MediaNegotiationContent, Message, Negotiation, PeerIdContent, Question,
    SessionStartedContent, StartSessionContent, StreamOverview,
};
pub use signaller::{
    AnswerCallback, EndSessionCallback, ListenerId, NegotiationCallback, Signaller,
    SignallerConfig,
};
