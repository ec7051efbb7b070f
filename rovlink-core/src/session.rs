//! Peer session management
//!
//! A [`Session`] represents one negotiated peer-to-peer connection to a
//! remotely advertised video stream. It owns the underlying
//! [`RTCPeerConnection`], drives the offer/answer exchange initiated through
//! the signalling channel, screens remote ICE candidates against the
//! configured allowlists and surfaces track arrival and connection lifecycle
//! events to its owner.
//!
//! The session is an explicit state machine. Once it reaches
//! [`SessionState::Ended`] it never leaves it: all parent callbacks are
//! unlinked and further negotiation input is ignored.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

use crate::error::RovlinkError;
use crate::ice::{self, CandidateDecision};

/// Upper clamp for the jitter buffer target, in milliseconds
pub const MAX_JITTER_BUFFER_TARGET_MS: u32 = 4000;

/// Correlation ids shared by every negotiation message of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIds {
    /// Session id assigned by the signalling server
    pub session_id: String,
    /// Our consumer peer id
    pub consumer_id: String,
    /// The producer peer id advertising the stream
    pub producer_id: String,
}

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session created, no connectivity attempted yet
    New,
    /// Peer connection is negotiating connectivity
    Connecting,
    /// Media is flowing
    Connected,
    /// Connectivity was lost and may recover on its own
    Disconnected,
    /// The peer connection failed fatally
    Failed,
    /// The session was torn down; terminal
    Ended,
}

impl SessionState {
    fn can_enter(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Ended, _) => false,
            (_, Ended) => true,
            (New, Connecting) | (New, Failed) => true,
            (Connecting, Connected) | (Connecting, Disconnected) | (Connecting, Failed) => true,
            (Connected, Disconnected) | (Connected, Failed) => true,
            (Disconnected, Connecting) | (Disconnected, Connected) | (Disconnected, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::New => "new",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnected => "disconnected",
            SessionState::Failed => "failed",
            SessionState::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Jitter buffer tuning applied to the video receive path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JitterBufferTarget {
    /// Target depth in milliseconds, clamped to [0, 4000]
    pub target_ms: u16,
    /// Legacy playout-delay hint in seconds for engines predating the target API
    pub playout_delay_secs: f64,
}

impl JitterBufferTarget {
    /// Clamp a requested target to the supported range
    pub fn clamped(target_ms: u32) -> Self {
        let target_ms = target_ms.min(MAX_JITTER_BUFFER_TARGET_MS) as u16;
        Self {
            target_ms,
            playout_delay_secs: f64::from(target_ms) / 1000.0,
        }
    }
}

/// Outbound negotiation seam between a session and the signalling channel.
///
/// Send failures are logged and surfaced through the implementor's status
/// reporting, never returned: a dropped negotiation message must not unwind
/// into the peer connection event handlers.
#[async_trait]
pub trait NegotiationSender: Send + Sync {
    /// Forward a locally gathered ICE candidate, tagged with the session ids
    async fn send_ice_negotiation(&self, ids: &SessionIds, candidate: serde_json::Value);
    /// Forward a local session description, tagged with the session ids
    async fn send_media_negotiation(&self, ids: &SessionIds, description: serde_json::Value);
}

/// Configuration for establishing a session
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// STUN/TURN server URLs handed to the peer connection
    pub ice_servers: Vec<String>,
    /// When non-empty, remote candidates must contain one of these addresses
    pub allowed_ice_ips: Vec<String>,
    /// When non-empty, remote candidates must contain one of these protocol tokens
    pub allowed_ice_protocols: Vec<String>,
    /// Jitter buffer target applied when the session is created
    pub jitter_buffer_target_ms: Option<u32>,
}

/// Callback invoked when a remote track starts
pub type TrackCallback = Arc<dyn Fn(Arc<TrackRemote>, Arc<RTCRtpReceiver>) + Send + Sync>;
/// Callback invoked once the peer connection reaches the connected state
pub type ConnectedCallback = Arc<dyn Fn() + Send + Sync>;
/// Callback invoked when the session closes, with a reason
pub type CloseCallback = Arc<dyn Fn(&str) + Send + Sync>;
/// Callback invoked with human-readable status updates for UI surfacing
pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    on_track: Mutex<Option<TrackCallback>>,
    on_peer_connected: Mutex<Option<ConnectedCallback>>,
    on_close: Mutex<Option<CloseCallback>>,
    on_status: Mutex<Option<StatusCallback>>,
}

impl Callbacks {
    fn clear(&self) {
        *self.on_track.lock() = None;
        *self.on_peer_connected.lock() = None;
        *self.on_close.lock() = None;
        *self.on_status.lock() = None;
    }
}

/// One peer-to-peer media session to a remote stream
pub struct Session {
    ids: SessionIds,
    stream_name: String,
    peer_connection: Arc<RTCPeerConnection>,
    sender: Arc<dyn NegotiationSender>,
    state: Mutex<SessionState>,
    remote_ice_ips: Mutex<Vec<Ipv4Addr>>,
    allowed_ice_ips: Vec<String>,
    allowed_ice_protocols: Vec<String>,
    jitter_buffer: Mutex<Option<JitterBufferTarget>>,
    callbacks: Callbacks,
}

impl Session {
    /// Create a session and its receive-only peer connection.
    ///
    /// The connection is configured to receive a single video track. Event
    /// handlers are registered immediately; negotiation begins once the
    /// producer's offer arrives through [`Session::handle_media_negotiation`].
    pub async fn connect(
        ids: SessionIds,
        stream_name: impl Into<String>,
        sender: Arc<dyn NegotiationSender>,
        config: SessionConfig,
    ) -> Result<Arc<Self>, RovlinkError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| RovlinkError::Initialization {
                reason: format!("failed to register codecs: {e}"),
            })?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine).map_err(
            |e| RovlinkError::Initialization {
                reason: format!("failed to register interceptors: {e}"),
            },
        )?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config
                .ice_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            RovlinkError::PeerConnection {
                reason: format!("failed to create peer connection: {e}"),
            }
        })?);

        let transceiver_init = RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Recvonly,
            send_encodings: vec![],
        };
        peer_connection
            .add_transceiver_from_kind(RTPCodecType::Video, Some(transceiver_init))
            .await
            .map_err(|e| RovlinkError::PeerConnection {
                reason: format!("failed to add video transceiver: {e}"),
            })?;

        let session = Arc::new(Self {
            ids,
            stream_name: stream_name.into(),
            peer_connection,
            sender,
            state: Mutex::new(SessionState::New),
            remote_ice_ips: Mutex::new(Vec::new()),
            allowed_ice_ips: config.allowed_ice_ips,
            allowed_ice_protocols: config.allowed_ice_protocols,
            jitter_buffer: Mutex::new(config.jitter_buffer_target_ms.map(JitterBufferTarget::clamped)),
            callbacks: Callbacks::default(),
        });

        session.register_handlers();
        Ok(session)
    }

    /// Correlation ids of this session
    pub fn ids(&self) -> &SessionIds {
        &self.ids
    }

    /// Display name of the stream this session consumes
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// IPv4 addresses observed in remote ICE candidates, for diagnostics
    pub fn remote_ice_ips(&self) -> Vec<Ipv4Addr> {
        self.remote_ice_ips.lock().clone()
    }

    /// Register the track arrival callback
    pub fn set_on_track(&self, callback: TrackCallback) {
        *self.callbacks.on_track.lock() = Some(callback);
    }

    /// Register the connected callback
    pub fn set_on_peer_connected(&self, callback: ConnectedCallback) {
        *self.callbacks.on_peer_connected.lock() = Some(callback);
    }

    /// Register the close callback
    pub fn set_on_close(&self, callback: CloseCallback) {
        *self.callbacks.on_close.lock() = Some(callback);
    }

    /// Register the status callback
    pub fn set_on_status(&self, callback: StatusCallback) {
        *self.callbacks.on_status.lock() = Some(callback);
    }

    /// Set the jitter buffer target for the video receive path.
    ///
    /// The requested value is clamped to [0, 4000] ms and the clamped value is
    /// returned. The legacy playout-delay hint (seconds) is derived from the
    /// same value for engines that predate the target API; consumers of
    /// [`Session::set_on_track`] read the hint via
    /// [`Session::jitter_buffer_target`].
    pub fn set_jitter_buffer_target(&self, target_ms: u32) -> u16 {
        let target = JitterBufferTarget::clamped(target_ms);
        debug!(
            session_id = %self.ids.session_id,
            target_ms = target.target_ms,
            "jitter buffer target updated"
        );
        *self.jitter_buffer.lock() = Some(target);
        target.target_ms
    }

    /// Current jitter buffer tuning, if any was applied
    pub fn jitter_buffer_target(&self) -> Option<JitterBufferTarget> {
        *self.jitter_buffer.lock()
    }

    /// Apply a remote session description and answer it.
    ///
    /// Runs the strict set-remote → create-answer → set-local → send chain.
    /// Any step's rejection halts the chain and is logged; nothing propagates
    /// past this boundary and no retry is attempted.
    pub async fn handle_media_negotiation(&self, description: RTCSessionDescription) {
        if self.state() == SessionState::Ended {
            debug!(session_id = %self.ids.session_id, "ignoring SDP for ended session");
            return;
        }
        if let Err(e) = self.answer_remote_description(description).await {
            warn!(session_id = %self.ids.session_id, error = %e, "media negotiation halted");
        }
    }

    async fn answer_remote_description(
        &self,
        description: RTCSessionDescription,
    ) -> Result<(), RovlinkError> {
        self.transition(SessionState::Connecting);

        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| RovlinkError::Negotiation {
                stage: "set-remote-description".to_string(),
                reason: e.to_string(),
            })?;

        let answer = self.peer_connection.create_answer(None).await.map_err(|e| {
            RovlinkError::Negotiation {
                stage: "create-answer".to_string(),
                reason: e.to_string(),
            }
        })?;

        self.peer_connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| RovlinkError::Negotiation {
                stage: "set-local-description".to_string(),
                reason: e.to_string(),
            })?;

        let payload = serde_json::to_value(&answer).map_err(|e| RovlinkError::Negotiation {
            stage: "serialize-answer".to_string(),
            reason: e.to_string(),
        })?;
        self.sender.send_media_negotiation(&self.ids, payload).await;
        Ok(())
    }

    /// Screen and apply a remote ICE candidate.
    ///
    /// The candidate's IPv4 address (when present) is recorded for
    /// diagnostics. Candidates rejected by the allowlists are dropped and
    /// reported through the status callback; add failures are logged, never
    /// thrown.
    pub async fn handle_ice_negotiation(&self, init: RTCIceCandidateInit) {
        if self.state() == SessionState::Ended {
            debug!(session_id = %self.ids.session_id, "ignoring ICE candidate for ended session");
            return;
        }

        if let Some(address) = ice::extract_ipv4(&init.candidate) {
            let mut ips = self.remote_ice_ips.lock();
            if !ips.contains(&address) {
                debug!(session_id = %self.ids.session_id, %address, "observed remote ICE address");
                ips.push(address);
            }
        }

        match ice::evaluate_candidate(
            &init.candidate,
            &self.allowed_ice_ips,
            &self.allowed_ice_protocols,
        ) {
            CandidateDecision::Allowed => {
                if let Err(e) = self.peer_connection.add_ice_candidate(init).await {
                    warn!(
                        session_id = %self.ids.session_id,
                        "failed to add remote ICE candidate: {e}"
                    );
                }
            }
            decision => {
                debug!(
                    session_id = %self.ids.session_id,
                    ?decision,
                    candidate = %init.candidate,
                    "remote ICE candidate dropped"
                );
                self.report_status(&format!(
                    "Ignoring ICE candidate outside the allowlist: {}",
                    init.candidate
                ));
            }
        }
    }

    /// Tear the session down.
    ///
    /// Unlinks every parent callback, detaches the peer connection handlers
    /// and closes the connection. Idempotent: calling `end` again only
    /// re-closes the already-closed connection.
    pub async fn end(&self) {
        {
            let mut state = self.state.lock();
            if *state != SessionState::Ended {
                debug!(session_id = %self.ids.session_id, from = %*state, "ending session");
                *state = SessionState::Ended;
            }
        }
        self.detach_handlers();
        self.callbacks.clear();
        if let Err(e) = self.peer_connection.close().await {
            debug!(session_id = %self.ids.session_id, "error closing peer connection: {e}");
        }
    }

    fn transition(&self, next: SessionState) {
        let mut state = self.state.lock();
        if *state == next {
            return;
        }
        if state.can_enter(next) {
            debug!(
                session_id = %self.ids.session_id,
                from = %*state,
                to = %next,
                "session state changed"
            );
            *state = next;
        } else {
            debug!(
                session_id = %self.ids.session_id,
                from = %*state,
                to = %next,
                "illegal session state transition ignored"
            );
        }
    }

    fn report_status(&self, message: &str) {
        let callback = self.callbacks.on_status.lock().clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }

    fn register_handlers(self: &Arc<Self>) {
        let session_id = self.ids.session_id.clone();
        self.peer_connection.on_negotiation_needed(Box::new(move || {
            debug!(session_id = %session_id, "negotiation needed");
            Box::pin(async {})
        }));

        let weak = Arc::downgrade(self);
        self.peer_connection
            .on_track(Box::new(move |track, receiver, _transceiver| {
                let session = weak.upgrade();
                Box::pin(async move {
                    if let Some(session) = session {
                        session.handle_track(track, receiver);
                    }
                })
            }));

        let weak = Arc::downgrade(self);
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let session = weak.upgrade();
                Box::pin(async move {
                    let Some(session) = session else { return };
                    match candidate {
                        Some(candidate) => session.publish_local_candidate(candidate).await,
                        None => {
                            debug!(session_id = %session.ids.session_id, "ICE gathering finished")
                        }
                    }
                })
            }));

        let weak = Arc::downgrade(self);
        self.peer_connection
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                let session = weak.upgrade();
                Box::pin(async move {
                    if let Some(session) = session {
                        session.handle_ice_connection_state(state).await;
                    }
                })
            }));

        let weak = Arc::downgrade(self);
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let session = weak.upgrade();
                Box::pin(async move {
                    if let Some(session) = session {
                        session.handle_connection_state(state).await;
                    }
                })
            }));

        let session_id = self.ids.session_id.clone();
        self.peer_connection
            .on_signaling_state_change(Box::new(move |state| {
                debug!(session_id = %session_id, ?state, "signaling state changed");
                Box::pin(async {})
            }));

        let session_id = self.ids.session_id.clone();
        self.peer_connection
            .on_ice_gathering_state_change(Box::new(move |state| {
                debug!(session_id = %session_id, ?state, "ICE gathering state changed");
                Box::pin(async {})
            }));
    }

    fn detach_handlers(&self) {
        self.peer_connection
            .on_negotiation_needed(Box::new(|| Box::pin(async {})));
        self.peer_connection
            .on_track(Box::new(|_, _, _| Box::pin(async {})));
        self.peer_connection
            .on_ice_candidate(Box::new(|_| Box::pin(async {})));
        self.peer_connection
            .on_ice_connection_state_change(Box::new(|_| Box::pin(async {})));
        self.peer_connection
            .on_peer_connection_state_change(Box::new(|_| Box::pin(async {})));
        self.peer_connection
            .on_signaling_state_change(Box::new(|_| Box::pin(async {})));
        self.peer_connection
            .on_ice_gathering_state_change(Box::new(|_| Box::pin(async {})));
    }

    fn handle_track(&self, track: Arc<TrackRemote>, receiver: Arc<RTCRtpReceiver>) {
        debug!(
            session_id = %self.ids.session_id,
            kind = %track.kind(),
            ssrc = track.ssrc(),
            "remote track started"
        );
        let callback = self.callbacks.on_track.lock().clone();
        if let Some(callback) = callback {
            callback(track, receiver);
        }
    }

    async fn publish_local_candidate(&self, candidate: RTCIceCandidate) {
        let init = match candidate.to_json() {
            Ok(init) => init,
            Err(e) => {
                warn!(session_id = %self.ids.session_id, "failed to encode local candidate: {e}");
                return;
            }
        };
        match serde_json::to_value(&init) {
            Ok(payload) => self.sender.send_ice_negotiation(&self.ids, payload).await,
            Err(e) => {
                warn!(session_id = %self.ids.session_id, "failed to serialize local candidate: {e}")
            }
        }
    }

    async fn handle_ice_connection_state(&self, state: RTCIceConnectionState) {
        debug!(session_id = %self.ids.session_id, ?state, "ICE connection state changed");
        if state == RTCIceConnectionState::Failed {
            warn!(session_id = %self.ids.session_id, "ICE connection failed, attempting restart");
            if let Err(e) = self.restart_ice().await {
                warn!(session_id = %self.ids.session_id, "ICE restart failed: {e}");
            }
        }
    }

    // ICE-level failure gets a narrower recovery than session failure: a
    // restart offer over the existing connection instead of a teardown.
    async fn restart_ice(&self) -> Result<(), RovlinkError> {
        let options = RTCOfferOptions {
            ice_restart: true,
            voice_activity_detection: false,
        };
        let offer = self
            .peer_connection
            .create_offer(Some(options))
            .await
            .map_err(|e| RovlinkError::Negotiation {
                stage: "create-restart-offer".to_string(),
                reason: e.to_string(),
            })?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| RovlinkError::Negotiation {
                stage: "set-local-description".to_string(),
                reason: e.to_string(),
            })?;
        let payload = serde_json::to_value(&offer).map_err(|e| RovlinkError::Negotiation {
            stage: "serialize-restart-offer".to_string(),
            reason: e.to_string(),
        })?;
        self.sender.send_media_negotiation(&self.ids, payload).await;
        Ok(())
    }

    async fn handle_connection_state(&self, state: RTCPeerConnectionState) {
        debug!(session_id = %self.ids.session_id, ?state, "peer connection state changed");
        match state {
            RTCPeerConnectionState::Connecting => self.transition(SessionState::Connecting),
            RTCPeerConnectionState::Connected => {
                self.transition(SessionState::Connected);
                let callback = self.callbacks.on_peer_connected.lock().clone();
                if let Some(callback) = callback {
                    callback();
                }
            }
            RTCPeerConnectionState::Disconnected => self.transition(SessionState::Disconnected),
            RTCPeerConnectionState::Failed => {
                self.transition(SessionState::Failed);
                let callback = self.callbacks.on_close.lock().clone();
                if let Some(callback) = callback {
                    callback("peer connection entered failed state");
                }
                self.end().await;
            }
            RTCPeerConnectionState::Closed => {
                debug!(session_id = %self.ids.session_id, "peer connection closed");
            }
            _ => {}
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("ids", &self.ids)
            .field("stream_name", &self.stream_name)
            .field("state", &self.state())
            .finish()
    }
}
