//! Signalling wire protocol messages
//!
//! Every frame on the control channel is a JSON envelope
//! `{ "type": "question" | "answer" | "negotiation", "content": { ... } }`
//! where the content carries its own `type`/`content` pair. Questions flow in
//! both directions: consumers ask for peer ids and sessions, the server asks
//! consumers to end sessions.

use serde::{Deserialize, Serialize};

/// Top-level envelope exchanged over the signalling socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "camelCase")]
pub enum Message {
    /// A request expecting a correlated answer
    Question(Question),
    /// The correlated result of a question, or a server push
    Answer(Answer),
    /// ICE/SDP exchange for one session
    Negotiation(Negotiation),
}

/// Requests carried inside a [`Message::Question`] envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "camelCase")]
pub enum Question {
    /// Ask the server to assign us a peer id
    PeerId,
    /// Ask for the list of currently advertised streams
    AvailableStreams,
    /// Ask for a new session with a producer
    StartSession(StartSessionContent),
    /// Terminate a session, with a reason
    EndSession(EndSessionContent),
}

/// Results carried inside a [`Message::Answer`] envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "camelCase")]
pub enum Answer {
    /// The peer id assigned to this consumer
    PeerId(PeerIdContent),
    /// The currently advertised streams
    AvailableStreams(AvailableStreamsContent),
    /// A session was created for a previous start-session question
    StartSession(SessionStartedContent),
    /// A producer began advertising a stream
    ProducerAdded(StreamOverview),
    /// A producer stopped advertising a stream
    ProducerRemoved(StreamOverview),
}

/// ICE/SDP payloads carried inside a [`Message::Negotiation`] envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "camelCase")]
pub enum Negotiation {
    /// An ICE candidate for one session
    IceNegotiation(IceNegotiationContent),
    /// A session description for one session
    MediaNegotiation(MediaNegotiationContent),
}

/// Content of a start-session question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSessionContent {
    /// Consumer peer id
    pub consumer_id: String,
    /// Producer peer id
    pub producer_id: String,
}

/// Content of an end-session question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndSessionContent {
    /// Consumer peer id
    pub consumer_id: String,
    /// Producer peer id
    pub producer_id: String,
    /// Session being terminated
    pub session_id: String,
    /// Why the session is being terminated
    pub reason: String,
}

/// Content of a peer-id answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerIdContent {
    /// The assigned peer id
    pub id: String,
}

/// Content of an available-streams answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableStreamsContent {
    /// Streams currently advertised by producers
    pub streams: Vec<StreamOverview>,
}

/// Content of a session-started answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStartedContent {
    /// The newly created session id
    pub session_id: String,
    /// Consumer the session belongs to
    pub consumer_id: String,
    /// Producer the session connects to
    pub producer_id: String,
}

/// A remotely advertised media source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamOverview {
    /// Stable stream id (the producer peer id)
    pub id: String,
    /// Human-readable display name
    pub name: String,
    /// Whether the stream can currently be consumed
    pub available: bool,
}

/// Content of an ICE negotiation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceNegotiationContent {
    /// Session the candidate belongs to
    pub session_id: String,
    /// Consumer peer id
    pub consumer_id: String,
    /// Producer peer id
    pub producer_id: String,
    /// Opaque ICE candidate payload (browser-JSON shaped)
    pub ice: serde_json::Value,
}

/// Content of a media negotiation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaNegotiationContent {
    /// Session the description belongs to
    pub session_id: String,
    /// Consumer peer id
    pub consumer_id: String,
    /// Producer peer id
    pub producer_id: String,
    /// Opaque session description payload (browser-JSON shaped)
    pub sdp: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_peer_id_question_shape() {
        let message = Message::Question(Question::PeerId);
        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(
            encoded,
            json!({ "type": "question", "content": { "type": "peerId" } })
        );
    }

    #[test]
    fn test_start_session_question_shape() {
        let message = Message::Question(Question::StartSession(StartSessionContent {
            consumer_id: "consumer-7".to_string(),
            producer_id: "producer-3".to_string(),
        }));
        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(
            encoded,
            json!({
                "type": "question",
                "content": {
                    "type": "startSession",
                    "content": { "consumer_id": "consumer-7", "producer_id": "producer-3" }
                }
            })
        );
    }

    #[test]
    fn test_ice_negotiation_round_trip() {
        let message = Message::Negotiation(Negotiation::IceNegotiation(IceNegotiationContent {
            session_id: "session-1".to_string(),
            consumer_id: "consumer-7".to_string(),
            producer_id: "producer-3".to_string(),
            ice: json!({ "candidate": "candidate:1 1 udp 2122 10.0.0.2 5000 typ host" }),
        }));

        let text = serde_json::to_string(&message).unwrap();
        let decoded: Message = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_answer_parsing() {
        let text = r#"{
            "type": "answer",
            "content": {
                "type": "availableStreams",
                "content": {
                    "streams": [
                        { "id": "producer-3", "name": "front camera", "available": true }
                    ]
                }
            }
        }"#;

        let decoded: Message = serde_json::from_str(text).unwrap();
        match decoded {
            Message::Answer(Answer::AvailableStreams(content)) => {
                assert_eq!(content.streams.len(), 1);
                assert_eq!(content.streams[0].name, "front camera");
                assert!(content.streams[0].available);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_end_session_question_round_trip() {
        let message = Message::Question(Question::EndSession(EndSessionContent {
            consumer_id: "consumer-7".to_string(),
            producer_id: "producer-3".to_string(),
            session_id: "session-1".to_string(),
            reason: "user requested".to_string(),
        }));

        let text = serde_json::to_string(&message).unwrap();
        let decoded: Message = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, message);
    }
}
