//! Signalling control-channel client
//!
//! The [`Signaller`] keeps one WebSocket to the signalling server and routes
//! every incoming frame through a listener registry owned by the signaller
//! itself, not by the socket. Because registrations live above the socket,
//! they survive reconnection transparently: a replacement socket dispatches
//! into the same registry without callers re-registering anything.
//!
//! One-shot listeners back the request/answer methods and are removed the
//! moment they match, so a retried server answer can never fire a callback
//! twice. A malformed frame is logged and dropped without disturbing the
//! channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitStream, StreamExt};
use futures::SinkExt;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use async_trait::async_trait;
use rovlink_core::session::{NegotiationSender, SessionIds, StatusCallback};
use rovlink_core::RovlinkError;

use crate::protocol::{
    Answer, EndSessionContent, IceNegotiationContent, MediaNegotiationContent, Message,
    Negotiation, Question, StartSessionContent,
};

/// Identifier of a registered listener, used for removal
pub type ListenerId = Uuid;

/// Callback receiving an opaque negotiation payload (ICE candidate or SDP)
pub type NegotiationCallback = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// One-shot callback receiving the reason of an end-session question
pub type EndSessionCallback = Box<dyn FnOnce(String) + Send>;

/// Persistent callback observing every answer frame
pub type AnswerCallback = Arc<dyn Fn(&Answer) + Send + Sync>;

type Matcher = Box<dyn Fn(&Message) -> bool + Send + Sync>;
type PersistentHandler = Arc<dyn Fn(&Message) + Send + Sync>;
type OneShotHandler = Box<dyn FnOnce(&Message) + Send>;
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for the signalling channel
#[derive(Debug, Clone)]
pub struct SignallerConfig {
    /// Delay before a reconnect attempt after the socket closes.
    ///
    /// The value mirrors the original fixed backoff; it is configurable but
    /// there is no stated rationale for a different default.
    pub reconnect_delay: Duration,
    /// Whether the channel reconnects on its own after the socket closes
    pub should_reconnect: bool,
}

impl Default for SignallerConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(1000),
            should_reconnect: true,
        }
    }
}

enum HandlerSlot {
    Persistent(PersistentHandler),
    OneShot(Option<OneShotHandler>),
}

struct Listener {
    id: ListenerId,
    matcher: Matcher,
    handler: HandlerSlot,
}

/// Client side of the signalling control channel
#[derive(Clone)]
pub struct Signaller {
    inner: Arc<SignallerInner>,
}

struct SignallerInner {
    url: String,
    reconnect_delay: Duration,
    listeners: Mutex<Vec<Listener>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    reader_tasks: Mutex<Vec<JoinHandle<()>>>,
    socket_open: AtomicBool,
    should_reconnect: AtomicBool,
    reconnect_scheduled: AtomicBool,
    status: Mutex<Option<StatusCallback>>,
}

impl Signaller {
    /// Create a signaller for the given server URL. No traffic flows until
    /// [`Signaller::connect`] is called.
    pub fn new(url: impl Into<String>, config: SignallerConfig) -> Self {
        Self {
            inner: Arc::new(SignallerInner {
                url: url.into(),
                reconnect_delay: config.reconnect_delay,
                listeners: Mutex::new(Vec::new()),
                outbound: Mutex::new(None),
                reader_tasks: Mutex::new(Vec::new()),
                socket_open: AtomicBool::new(false),
                should_reconnect: AtomicBool::new(config.should_reconnect),
                reconnect_scheduled: AtomicBool::new(false),
                status: Mutex::new(None),
            }),
        }
    }

    /// Open the control-channel socket.
    ///
    /// Opening schedules no traffic of its own; callers drive registration
    /// and stream discovery themselves.
    pub async fn connect(&self) -> Result<(), RovlinkError> {
        self.inner.establish().await
    }

    /// Whether the socket is currently open
    pub fn is_open(&self) -> bool {
        self.inner.socket_open.load(Ordering::SeqCst)
    }

    /// Number of currently registered listeners, for diagnostics
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Register the status callback used to surface send failures to the UI
    pub fn set_on_status(&self, callback: StatusCallback) {
        *self.inner.status.lock() = Some(callback);
    }

    /// Ask the server for a consumer peer id.
    ///
    /// Resolved through a one-shot listener matched on the peer-id answer
    /// type; the listener unregisters itself on the first match, so a
    /// duplicated server answer cannot resolve twice. The request has no
    /// deadline: it stays pending until an answer arrives or the channel is
    /// ended.
    pub async fn request_consumer_id(&self) -> Result<String, RovlinkError> {
        let (tx, rx) = oneshot::channel();
        let listener = self.inner.add_one_shot_listener(
            Box::new(|message| matches!(message, Message::Answer(Answer::PeerId(_)))),
            Box::new(move |message| {
                if let Message::Answer(Answer::PeerId(content)) = message {
                    let _ = tx.send(content.id.clone());
                }
            }),
        );

        if let Err(e) = self.inner.send_message(&Message::Question(Question::PeerId)) {
            self.inner.remove_listener(listener);
            return Err(e);
        }

        rx.await.map_err(|_| RovlinkError::RequestInterrupted {
            request: "peerId".to_string(),
        })
    }

    /// Ask the server for the list of advertised streams.
    ///
    /// Fire-and-forget: when the socket is not open the request is dropped
    /// with a log line. Answers arrive through [`Signaller::on_answer`]
    /// listeners.
    pub fn request_streams(&self) {
        if let Err(e) = self
            .inner
            .send_message(&Message::Question(Question::AvailableStreams))
        {
            debug!("failed to request available streams: {e}");
        }
    }

    /// Ask the server to create a session with a producer.
    ///
    /// Resolved through a one-shot listener matched on the session-started
    /// answer type plus both correlation ids.
    pub async fn request_session_id(
        &self,
        consumer_id: &str,
        producer_id: &str,
    ) -> Result<String, RovlinkError> {
        let (tx, rx) = oneshot::channel();
        let match_consumer = consumer_id.to_string();
        let match_producer = producer_id.to_string();
        let listener = self.inner.add_one_shot_listener(
            Box::new(move |message| {
                matches!(
                    message,
                    Message::Answer(Answer::StartSession(content))
                        if content.consumer_id == match_consumer
                            && content.producer_id == match_producer
                )
            }),
            Box::new(move |message| {
                if let Message::Answer(Answer::StartSession(content)) = message {
                    let _ = tx.send(content.session_id.clone());
                }
            }),
        );

        let question = Message::Question(Question::StartSession(StartSessionContent {
            consumer_id: consumer_id.to_string(),
            producer_id: producer_id.to_string(),
        }));
        if let Err(e) = self.inner.send_message(&question) {
            self.inner.remove_listener(listener);
            return Err(e);
        }

        rx.await.map_err(|_| RovlinkError::RequestInterrupted {
            request: "startSession".to_string(),
        })
    }

    /// Send an end-session question for a session we are tearing down
    pub fn send_end_session_question(&self, ids: &SessionIds, reason: &str) {
        let question = Message::Question(Question::EndSession(EndSessionContent {
            consumer_id: ids.consumer_id.clone(),
            producer_id: ids.producer_id.clone(),
            session_id: ids.session_id.clone(),
            reason: reason.to_string(),
        }));
        self.inner.send_or_report("end-session question", &question);
    }

    /// Register a persistent listener for negotiation messages of one
    /// session, filtered strictly on the session/consumer/producer id
    /// 3-tuple and dispatched by negotiation sub-type.
    pub fn parse_negotiation(
        &self,
        ids: &SessionIds,
        on_ice: NegotiationCallback,
        on_media: NegotiationCallback,
    ) -> ListenerId {
        let match_ids = ids.clone();
        self.inner.add_persistent_listener(
            Box::new(move |message| match message {
                Message::Negotiation(Negotiation::IceNegotiation(content)) => {
                    content.session_id == match_ids.session_id
                        && content.consumer_id == match_ids.consumer_id
                        && content.producer_id == match_ids.producer_id
                }
                Message::Negotiation(Negotiation::MediaNegotiation(content)) => {
                    content.session_id == match_ids.session_id
                        && content.consumer_id == match_ids.consumer_id
                        && content.producer_id == match_ids.producer_id
                }
                _ => false,
            }),
            Arc::new(move |message| match message {
                Message::Negotiation(Negotiation::IceNegotiation(content)) => {
                    on_ice(content.ice.clone())
                }
                Message::Negotiation(Negotiation::MediaNegotiation(content)) => {
                    on_media(content.sdp.clone())
                }
                _ => {}
            }),
        )
    }

    /// Register a one-shot listener for the server's end-session question
    /// matching one session; the callback receives the termination reason.
    pub fn parse_end_session_question(
        &self,
        ids: &SessionIds,
        callback: EndSessionCallback,
    ) -> ListenerId {
        let match_ids = ids.clone();
        self.inner.add_one_shot_listener(
            Box::new(move |message| {
                matches!(
                    message,
                    Message::Question(Question::EndSession(content))
                        if content.session_id == match_ids.session_id
                            && content.consumer_id == match_ids.consumer_id
                            && content.producer_id == match_ids.producer_id
                )
            }),
            Box::new(move |message| {
                if let Message::Question(Question::EndSession(content)) = message {
                    callback(content.reason.clone());
                }
            }),
        )
    }

    /// Register a persistent listener observing every answer frame (stream
    /// listings and producer lifecycle pushes).
    pub fn on_answer(&self, callback: AnswerCallback) -> ListenerId {
        self.inner.add_persistent_listener(
            Box::new(|message| matches!(message, Message::Answer(_))),
            Arc::new(move |message| {
                if let Message::Answer(answer) = message {
                    callback(answer);
                }
            }),
        )
    }

    /// Remove a previously registered listener
    pub fn remove_listener(&self, id: ListenerId) {
        self.inner.remove_listener(id);
    }

    /// Tear the channel down: stop reconnecting, deregister every listener
    /// (dropping their pending requests) and close the socket. Idempotent.
    pub fn end(&self, reason: &str) {
        info!(reason, "ending signalling channel");
        self.inner.should_reconnect.store(false, Ordering::SeqCst);
        self.inner.listeners.lock().clear();
        if let Some(tx) = self.inner.outbound.lock().take() {
            let _ = tx.send(WsMessage::Close(None));
        }
        self.inner.socket_open.store(false, Ordering::SeqCst);
        let mut tasks = self.inner.reader_tasks.lock();
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl NegotiationSender for Signaller {
    async fn send_ice_negotiation(&self, ids: &SessionIds, candidate: serde_json::Value) {
        let message = Message::Negotiation(Negotiation::IceNegotiation(IceNegotiationContent {
            session_id: ids.session_id.clone(),
            consumer_id: ids.consumer_id.clone(),
            producer_id: ids.producer_id.clone(),
            ice: candidate,
        }));
        self.inner.send_or_report("ICE negotiation", &message);
    }

    async fn send_media_negotiation(&self, ids: &SessionIds, description: serde_json::Value) {
        let message = Message::Negotiation(Negotiation::MediaNegotiation(MediaNegotiationContent {
            session_id: ids.session_id.clone(),
            consumer_id: ids.consumer_id.clone(),
            producer_id: ids.producer_id.clone(),
            sdp: description,
        }));
        self.inner.send_or_report("media negotiation", &message);
    }
}

impl SignallerInner {
    async fn establish(self: &Arc<Self>) -> Result<(), RovlinkError> {
        let (socket, _) =
            connect_async(self.url.as_str())
                .await
                .map_err(|e| RovlinkError::Connection {
                    url: self.url.clone(),
                    reason: e.to_string(),
                })?;
        self.attach(socket);
        info!(url = %self.url, "signalling channel connected");
        Ok(())
    }

    fn attach(self: &Arc<Self>, socket: WsStream) {
        self.teardown_socket();

        let (mut write, read) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        // Writer ends when the outbound sender is dropped, flushing queued
        // frames (including a final Close) first.
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = write.send(frame).await {
                    warn!("signalling socket send failed: {e}");
                    break;
                }
            }
            let _ = write.close().await;
        });

        let inner = Arc::clone(self);
        let reader = tokio::spawn(async move {
            inner.run_reader(read).await;
        });

        *self.outbound.lock() = Some(tx);
        self.socket_open.store(true, Ordering::SeqCst);
        self.reader_tasks.lock().push(reader);
    }

    fn teardown_socket(&self) {
        *self.outbound.lock() = None;
        self.socket_open.store(false, Ordering::SeqCst);
        let mut tasks = self.reader_tasks.lock();
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    async fn run_reader(self: Arc<Self>, mut read: SplitStream<WsStream>) {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => match serde_json::from_str::<Message>(&text) {
                    Ok(message) => self.dispatch(&message),
                    // One malformed frame must not kill the channel.
                    Err(e) => warn!("dropping malformed signalling message: {e}"),
                },
                Ok(WsMessage::Close(_)) => {
                    debug!("signalling socket closed by server");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("signalling socket error: {e}");
                    break;
                }
            }
        }
        self.handle_socket_closed();
    }

    fn handle_socket_closed(self: &Arc<Self>) {
        self.socket_open.store(false, Ordering::SeqCst);
        *self.outbound.lock() = None;
        if self.should_reconnect.load(Ordering::SeqCst) {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        // Overlapping close events collapse to a single scheduled attempt.
        if self
            .reconnect_scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("signalling reconnect already scheduled");
            return;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(inner.reconnect_delay).await;
            inner.reconnect_scheduled.store(false, Ordering::SeqCst);
            if !inner.should_reconnect.load(Ordering::SeqCst)
                || inner.socket_open.load(Ordering::SeqCst)
            {
                return;
            }
            match inner.establish().await {
                Ok(()) => debug!("signalling channel reconnected"),
                Err(e) => {
                    warn!("signalling reconnect failed: {e}");
                    inner.schedule_reconnect();
                }
            }
        });
    }

    fn dispatch(&self, message: &Message) {
        let mut persistent = Vec::new();
        let mut one_shot = Vec::new();
        {
            let mut listeners = self.listeners.lock();
            for listener in listeners.iter_mut() {
                if (listener.matcher)(message) {
                    match &mut listener.handler {
                        HandlerSlot::Persistent(handler) => persistent.push(Arc::clone(handler)),
                        HandlerSlot::OneShot(slot) => {
                            if let Some(handler) = slot.take() {
                                one_shot.push(handler);
                            }
                        }
                    }
                }
            }
            listeners.retain(|listener| match &listener.handler {
                HandlerSlot::OneShot(slot) => slot.is_some(),
                HandlerSlot::Persistent(_) => true,
            });
        }

        // Handlers run outside the registry lock so they may register or
        // remove listeners themselves.
        for handler in persistent {
            handler(message);
        }
        for handler in one_shot {
            handler(message);
        }
    }

    fn add_persistent_listener(&self, matcher: Matcher, handler: PersistentHandler) -> ListenerId {
        let id = Uuid::new_v4();
        self.listeners.lock().push(Listener {
            id,
            matcher,
            handler: HandlerSlot::Persistent(handler),
        });
        id
    }

    fn add_one_shot_listener(&self, matcher: Matcher, handler: OneShotHandler) -> ListenerId {
        let id = Uuid::new_v4();
        self.listeners.lock().push(Listener {
            id,
            matcher,
            handler: HandlerSlot::OneShot(Some(handler)),
        });
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|listener| listener.id != id);
    }

    fn send_message(&self, message: &Message) -> Result<(), RovlinkError> {
        let json = serde_json::to_string(message).map_err(|e| RovlinkError::SignallingSend {
            reason: format!("failed to serialize message: {e}"),
        })?;

        let outbound = self.outbound.lock();
        match outbound.as_ref() {
            Some(tx) if self.socket_open.load(Ordering::SeqCst) => {
                tx.send(WsMessage::Text(json))
                    .map_err(|_| RovlinkError::SignallingSend {
                        reason: "socket writer stopped".to_string(),
                    })
            }
            _ => Err(RovlinkError::SignallingSend {
                reason: "socket is not open".to_string(),
            }),
        }
    }

    fn send_or_report(&self, what: &str, message: &Message) {
        if let Err(e) = self.send_message(message) {
            warn!("failed to send {what}: {e}");
            let status = self.status.lock().clone();
            if let Some(status) = status {
                status(&format!("Failed to send {what}: {e}"));
            }
        }
    }
}
