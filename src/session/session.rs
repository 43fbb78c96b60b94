use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

use crate::audio::AudioFrame;

/// Frames buffered per subscriber before a slow consumer starts lagging
const PUBLISHER_CHANNEL_CAPACITY: usize = 256;

/// Media published by a participant
///
/// Cloning shares the same underlying stream. Consumers only ever hold a
/// subscription, so dropping it detaches them without affecting the
/// publisher.
#[derive(Debug, Clone)]
pub struct PublisherStream {
    stream_id: String,
    tx: broadcast::Sender<AudioFrame>,
}

impl PublisherStream {
    pub fn new(stream_id: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(PUBLISHER_CHANNEL_CAPACITY);
        Self {
            stream_id: stream_id.into(),
            tx,
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Subscribe to frames published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<AudioFrame> {
        self.tx.subscribe()
    }

    /// Publish a frame, returning how many consumers received it
    pub fn publish(&self, frame: AudioFrame) -> usize {
        self.tx.send(frame).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A connected participant, streaming if it publishes media
#[derive(Debug, Clone)]
pub struct Participant {
    pub participant_id: String,
    pub publisher: Option<PublisherStream>,
}

impl Participant {
    pub fn subscriber(participant_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            publisher: None,
        }
    }

    pub fn publisher(participant_id: impl Into<String>, stream: PublisherStream) -> Self {
        Self {
            participant_id: participant_id.into(),
            publisher: Some(stream),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.publisher.is_some()
    }
}

/// Snapshot of a live media session
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub participants: Vec<Participant>,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            participants: Vec::new(),
        }
    }

    pub fn with_participant(mut self, participant: Participant) -> Self {
        self.participants.push(participant);
        self
    }

    /// Session id without any URL prefix ("wss://host/ses_abc" -> "ses_abc")
    pub fn short_session_id(&self) -> &str {
        self.session_id
            .rsplit('/')
            .next()
            .unwrap_or(&self.session_id)
    }

    /// Participants currently publishing media
    pub fn streaming_participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| p.is_streaming())
    }
}

/// Why a recording was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    RecordingStoppedByServer,
    LastParticipantLeft,
    SessionClosedByServer,
    AutomaticStop,
    MediaServerDisconnect,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            StopReason::RecordingStoppedByServer => "recordingStoppedByServer",
            StopReason::LastParticipantLeft => "lastParticipantLeft",
            StopReason::SessionClosedByServer => "sessionClosedByServer",
            StopReason::AutomaticStop => "automaticStop",
            StopReason::MediaServerDisconnect => "mediaServerDisconnect",
        };
        f.write_str(reason)
    }
}
