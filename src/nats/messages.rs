use serde::{Deserialize, Serialize};

use crate::recording::{Recording, RecordingStatus};
use crate::session::StopReason;

/// Recording event published to NATS
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingEventMessage {
    pub session_id: String,
    pub recording_id: String,
    pub name: String,
    pub status: RecordingStatus,
    pub has_audio: bool,
    pub has_video: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<StopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub timestamp: String, // RFC3339 timestamp
}

impl RecordingEventMessage {
    pub fn started(recording: &Recording) -> Self {
        Self::from_recording(recording, None)
    }

    pub fn stopped(recording: &Recording, reason: StopReason) -> Self {
        Self {
            duration: Some(recording.duration),
            size: Some(recording.size),
            ..Self::from_recording(recording, Some(reason))
        }
    }

    fn from_recording(recording: &Recording, reason: Option<StopReason>) -> Self {
        Self {
            session_id: recording.session_id.clone(),
            recording_id: recording.id.clone(),
            name: recording.name().to_string(),
            status: recording.status,
            has_audio: recording.has_audio,
            has_video: recording.has_video,
            reason,
            duration: None,
            size: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
