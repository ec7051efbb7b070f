//! Pipeline events for UI surfacing

use rovlink_signaling::StreamOverview;
use tokio::sync::mpsc;

/// Events emitted by a [`Consumer`](crate::Consumer) during operation
#[derive(Debug, Clone)]
pub enum Event {
    /// A producer began advertising a stream
    StreamAdded {
        /// The newly advertised stream
        stream: StreamOverview,
    },
    /// A producer stopped advertising a stream
    StreamRemoved {
        /// The stream that disappeared
        stream: StreamOverview,
    },
    /// A session's peer connection reached the connected state
    SessionConnected {
        /// Session id
        session_id: String,
    },
    /// A session was torn down
    SessionClosed {
        /// Session id
        session_id: String,
        /// Why the session ended
        reason: String,
    },
}

impl Event {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::StreamAdded { .. } => "stream_added",
            Event::StreamRemoved { .. } => "stream_removed",
            Event::SessionConnected { .. } => "session_connected",
            Event::SessionClosed { .. } => "session_closed",
        }
    }
}

/// Stream of pipeline events for async iteration
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    /// Create a new event stream over a receiver
    pub fn new(receiver: mpsc::UnboundedReceiver<Event>) -> Self {
        Self { receiver }
    }

    /// Get the next event from the stream
    pub async fn next(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Try to get the next event without blocking
    pub fn try_next(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }
}
