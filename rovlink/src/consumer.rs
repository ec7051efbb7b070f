//! Consumer glue over the signalling, session and chunk pipelines
//!
//! A [`Consumer`] is one ground-control client: it keeps the signalling
//! channel, the directory of advertised streams, the peer sessions it has
//! negotiated and the chunk pipeline shared by every recording. Sessions hand
//! their remote track to the embedding recorder; the recorder feeds chunks
//! back through a [`Recording`] handle, which stages each chunk in temporary
//! storage before it enters the ordered queue so a crash at any point leaves
//! the footage recoverable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use rovlink_core::{NegotiationSender, RovlinkError, Session, SessionIds};
use rovlink_media::{
    chunk_group, ChunkGroup, ChunkSink, ChunkStorage, LiveVideoProcessor, ProgressCallback,
    RecoveryManager, RecoveryReport, StreamingMuxer, StreamingMuxerConfig,
    UnprocessedVideoRegistry, VideoProcessingError, VideoResult,
};
use rovlink_signaling::{Answer, ListenerId, Signaller, StreamOverview};

use crate::config::GlobalConfig;
use crate::event::{Event, EventStream};
use crate::stream::StreamDirectory;

struct SessionEntry {
    session: Arc<Session>,
    negotiation_listener: ListenerId,
    end_listener: ListenerId,
}

/// One ground-control client wiring the signalling channel, peer sessions and
/// the recording pipeline together
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

struct ConsumerInner {
    config: GlobalConfig,
    signaller: Signaller,
    consumer_id: Mutex<Option<String>>,
    streams: StreamDirectory,
    storage: Arc<ChunkStorage>,
    registry: Arc<UnprocessedVideoRegistry>,
    sink: Arc<dyn ChunkSink>,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    events: mpsc::UnboundedSender<Event>,
}

impl Consumer {
    /// Create a consumer backed by the ffmpeg streaming muxer.
    ///
    /// Opens chunk storage, loads the unprocessed-recording registry and
    /// prepares the signalling channel without connecting it; call
    /// [`Consumer::connect`] to go online. The returned [`EventStream`]
    /// carries stream and session lifecycle events for the UI.
    pub async fn new(config: GlobalConfig) -> VideoResult<(Self, EventStream)> {
        let sink = Arc::new(StreamingMuxer::new(StreamingMuxerConfig::new(
            &config.output_dir,
        )));
        Self::with_sink(config, sink).await
    }

    /// Create a consumer over a custom chunk sink
    pub async fn with_sink(
        config: GlobalConfig,
        sink: Arc<dyn ChunkSink>,
    ) -> VideoResult<(Self, EventStream)> {
        let storage = Arc::new(ChunkStorage::open(&config.chunk_storage_dir).await?);
        let registry = Arc::new(UnprocessedVideoRegistry::load(storage.root()).await?);
        let signaller = Signaller::new(config.signalling_url.clone(), config.signaller.clone());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ConsumerInner {
            config,
            signaller,
            consumer_id: Mutex::new(None),
            streams: StreamDirectory::new(),
            storage,
            registry,
            sink,
            sessions: Mutex::new(HashMap::new()),
            events: events_tx,
        });
        inner.register_stream_listener();

        Ok((Self { inner }, EventStream::new(events_rx)))
    }

    /// Connect the signalling channel, obtain our consumer peer id and ask
    /// for the current stream listing. Returns the assigned consumer id.
    pub async fn connect(&self) -> Result<String, RovlinkError> {
        self.inner.signaller.connect().await?;
        let consumer_id = self.inner.signaller.request_consumer_id().await?;
        info!(consumer_id, "consumer registered with signalling server");
        *self.inner.consumer_id.lock() = Some(consumer_id.clone());
        self.inner.signaller.request_streams();
        Ok(consumer_id)
    }

    /// The peer id assigned by the signalling server, once connected
    pub fn consumer_id(&self) -> Option<String> {
        self.inner.consumer_id.lock().clone()
    }

    /// Streams currently advertised by producers, sorted by display name
    pub fn streams(&self) -> Vec<StreamOverview> {
        self.inner.streams.all()
    }

    /// Ask the server for a fresh stream listing
    pub fn refresh_streams(&self) {
        self.inner.signaller.request_streams();
    }

    /// The signalling channel, for callers that need direct access
    pub fn signaller(&self) -> &Signaller {
        &self.inner.signaller
    }

    /// A negotiated session by id, while it is alive
    pub fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.inner
            .sessions
            .lock()
            .get(session_id)
            .map(|entry| Arc::clone(&entry.session))
    }

    /// Negotiate a media session with a producer.
    ///
    /// Requests a session id, creates the receive-only peer connection and
    /// registers the negotiation relay for it: incoming ICE/SDP frames
    /// matching the session's id 3-tuple are parsed and handed to the
    /// session, and the server's end-session question tears it down. The
    /// returned session is where the embedding recorder registers its track
    /// callback.
    pub async fn start_session(&self, producer_id: &str) -> Result<Arc<Session>, RovlinkError> {
        let consumer_id =
            self.inner
                .consumer_id
                .lock()
                .clone()
                .ok_or_else(|| RovlinkError::InvalidState {
                    expected: "connected with an assigned consumer id".to_string(),
                    actual: "no consumer id".to_string(),
                })?;

        let stream_name = self
            .inner
            .streams
            .get(producer_id)
            .map(|stream| stream.name)
            .unwrap_or_else(|| producer_id.to_string());

        let session_id = self
            .inner
            .signaller
            .request_session_id(&consumer_id, producer_id)
            .await?;
        let ids = SessionIds {
            session_id: session_id.clone(),
            consumer_id,
            producer_id: producer_id.to_string(),
        };

        let sender: Arc<dyn NegotiationSender> = Arc::new(self.inner.signaller.clone());
        let session = Session::connect(
            ids.clone(),
            stream_name,
            sender,
            self.inner.config.session.clone(),
        )
        .await?;

        let negotiation_listener = {
            let ice_session = Arc::downgrade(&session);
            let media_session = Arc::downgrade(&session);
            self.inner.signaller.parse_negotiation(
                &ids,
                Arc::new(move |payload| {
                    let Some(session) = ice_session.upgrade() else {
                        return;
                    };
                    match serde_json::from_value::<RTCIceCandidateInit>(payload) {
                        Ok(init) => {
                            tokio::spawn(async move {
                                session.handle_ice_negotiation(init).await;
                            });
                        }
                        Err(e) => warn!("discarding unparseable ICE negotiation: {e}"),
                    }
                }),
                Arc::new(move |payload| {
                    let Some(session) = media_session.upgrade() else {
                        return;
                    };
                    match serde_json::from_value::<RTCSessionDescription>(payload) {
                        Ok(description) => {
                            tokio::spawn(async move {
                                session.handle_media_negotiation(description).await;
                            });
                        }
                        Err(e) => warn!("discarding unparseable media negotiation: {e}"),
                    }
                }),
            )
        };

        let end_listener = {
            let weak = Arc::downgrade(&self.inner);
            let ending_id = session_id.clone();
            self.inner.signaller.parse_end_session_question(
                &ids,
                Box::new(move |reason| {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    tokio::spawn(async move {
                        // server already knows; no end-session question back
                        inner.close_session(&ending_id, &reason, false).await;
                    });
                }),
            )
        };

        {
            let weak = Arc::downgrade(&self.inner);
            let connected_id = session_id.clone();
            session.set_on_peer_connected(Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.emit(Event::SessionConnected {
                        session_id: connected_id.clone(),
                    });
                }
            }));
        }
        {
            let weak = Arc::downgrade(&self.inner);
            let closing_id = session_id.clone();
            session.set_on_close(Arc::new(move |reason| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let reason = reason.to_string();
                let session_id = closing_id.clone();
                tokio::spawn(async move {
                    inner.close_session(&session_id, &reason, true).await;
                });
            }));
        }

        self.inner.sessions.lock().insert(
            session_id,
            SessionEntry {
                session: Arc::clone(&session),
                negotiation_listener,
                end_listener,
            },
        );
        Ok(session)
    }

    /// End a session: notify the server, unregister its negotiation relay and
    /// close the peer connection. A no-op for unknown session ids.
    pub async fn end_session(&self, session_id: &str, reason: &str) {
        self.inner.close_session(session_id, reason, true).await;
    }

    /// Start a recording fed by the embedding recorder.
    ///
    /// Assigns the recording its stable hash, registers it as unprocessed and
    /// hands back the [`Recording`] that accepts chunks.
    pub async fn start_recording(&self, file_name: impl Into<String>) -> VideoResult<Recording> {
        let file_name = file_name.into();
        let hash = Uuid::new_v4().simple().to_string();
        let keep_backup = self.inner.config.keep_chunks_as_backup;
        self.inner
            .registry
            .register(&hash, &file_name, keep_backup)
            .await;

        let processor = LiveVideoProcessor::new(
            hash.clone(),
            file_name.clone(),
            keep_backup,
            Arc::clone(&self.inner.sink),
            Arc::clone(&self.inner.storage),
            Some(Arc::clone(&self.inner.registry)),
            self.inner.config.processor.clone(),
        );
        info!(hash, file_name, "recording started");
        Ok(Recording {
            hash,
            storage: Arc::clone(&self.inner.storage),
            registry: Arc::clone(&self.inner.registry),
            processor,
        })
    }

    /// Reprocess every recording left behind by a crash. Run once at startup,
    /// after the chunk pipeline is up but before new recordings begin.
    pub async fn recover_interrupted_recordings(&self) -> VideoResult<RecoveryReport> {
        self.inner.recovery_manager().process_interrupted_recordings().await
    }

    /// Discard stored chunks and registry entries for orphaned recordings,
    /// or for every unprocessed recording when `include_not_failed` is set.
    pub async fn discard_unprocessed_videos(
        &self,
        include_not_failed: bool,
    ) -> VideoResult<Vec<String>> {
        self.inner
            .recovery_manager()
            .discard_unprocessed_videos(include_not_failed)
            .await
    }

    /// Current chunk groups in temporary storage, keyed by recording hash
    pub async fn chunk_groups(&self) -> VideoResult<HashMap<String, ChunkGroup>> {
        chunk_group::collect_groups(&self.inner.storage).await
    }

    /// Export the stored chunks of one recording as archive parts under
    /// `destination_dir`. Returns the part paths in order.
    pub async fn export_recording(
        &self,
        hash: &str,
        destination_dir: &Path,
    ) -> VideoResult<Vec<PathBuf>> {
        let groups = chunk_group::collect_groups(&self.inner.storage).await?;
        let group = groups
            .get(hash)
            .ok_or_else(|| VideoProcessingError::Storage {
                reason: format!("no stored chunks for recording {hash}"),
            })?;
        let base_name = self
            .inner
            .registry
            .get(hash)
            .map(|entry| entry.file_name)
            .and_then(|name| {
                Path::new(&name)
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| hash.to_string());
        rovlink_media::export_group(
            &self.inner.storage,
            group,
            None,
            destination_dir,
            &base_name,
        )
        .await
    }

    /// Stream an exported chunk archive through the sink, producing a
    /// playable container. `progress` receives fractional progress (0–100).
    pub async fn import_chunk_archive(
        &self,
        archive_path: &Path,
        progress: ProgressCallback,
    ) -> VideoResult<PathBuf> {
        LiveVideoProcessor::process_zip_file(Arc::clone(&self.inner.sink), archive_path, progress)
            .await
    }

    /// Tear the consumer down: end every session and close the signalling
    /// channel. Idempotent.
    pub async fn end(&self, reason: &str) {
        let session_ids: Vec<String> = self.inner.sessions.lock().keys().cloned().collect();
        for session_id in session_ids {
            self.inner.close_session(&session_id, reason, true).await;
        }
        self.inner.signaller.end(reason);
    }
}

impl ConsumerInner {
    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    fn register_stream_listener(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.signaller.on_answer(Arc::new(move |answer| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match answer {
                Answer::AvailableStreams(content) => {
                    inner.streams.replace_all(content.streams.clone());
                }
                Answer::ProducerAdded(stream) => {
                    debug!(id = %stream.id, name = %stream.name, "producer added");
                    inner.streams.insert(stream.clone());
                    inner.emit(Event::StreamAdded {
                        stream: stream.clone(),
                    });
                }
                Answer::ProducerRemoved(stream) => {
                    debug!(id = %stream.id, "producer removed");
                    inner.streams.remove(&stream.id);
                    inner.emit(Event::StreamRemoved {
                        stream: stream.clone(),
                    });
                }
                _ => {}
            }
        }));
    }

    async fn close_session(&self, session_id: &str, reason: &str, notify_server: bool) {
        let entry = self.sessions.lock().remove(session_id);
        let Some(entry) = entry else {
            return;
        };
        debug!(session_id, reason, "closing session");
        self.signaller.remove_listener(entry.negotiation_listener);
        self.signaller.remove_listener(entry.end_listener);
        if notify_server {
            self.signaller
                .send_end_session_question(entry.session.ids(), reason);
        }
        entry.session.end().await;
        self.emit(Event::SessionClosed {
            session_id: session_id.to_string(),
            reason: reason.to_string(),
        });
    }

    fn recovery_manager(&self) -> RecoveryManager {
        RecoveryManager::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.registry),
            Arc::clone(&self.sink),
            self.config.recovery.clone(),
            self.config.processor.clone(),
        )
    }
}

/// One in-flight recording accepting chunks from the embedding recorder
pub struct Recording {
    hash: String,
    storage: Arc<ChunkStorage>,
    registry: Arc<UnprocessedVideoRegistry>,
    processor: LiveVideoProcessor,
}

impl Recording {
    /// Stable hash identifying this recording
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Target output file name
    pub fn file_name(&self) -> &str {
        self.processor.file_name()
    }

    /// Where the output container is being written, once the first chunk
    /// opened it
    pub fn output_path(&self) -> Option<&Path> {
        self.processor.output_path()
    }

    /// Accept one chunk from the recorder.
    ///
    /// The chunk is staged in temporary storage before it enters the ordered
    /// queue, so footage survives a crash between arrival and muxing.
    pub async fn add_chunk(&mut self, payload: Bytes, sequence: u64) -> VideoResult<()> {
        let key = ChunkStorage::chunk_key(&self.hash, sequence);
        self.storage.put(&key, &payload).await?;
        self.registry.touch_recording(&self.hash).await;
        self.processor.add_chunk(payload, sequence).await
    }

    /// Finish the recording: drain the queue, finalize the output container
    /// and return its path when one was opened.
    pub async fn stop(mut self) -> VideoResult<Option<PathBuf>> {
        self.registry.mark_finished(&self.hash).await;
        self.processor.stop_processing().await?;
        Ok(self.processor.output_path().map(Path::to_path_buf))
    }
}
