use crate::composite::EngineError;
use crate::process::RuntimeError;

/// Errors surfaced by the recording service and its strategies
#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    /// The recorder process could not be launched (name in use, missing image, runtime failure)
    #[error("Couldn't launch recorder process for recording {recording_id}: {source}")]
    ProcessLaunch {
        recording_id: String,
        #[source]
        source: RuntimeError,
    },

    /// The recorder process never produced a non-empty output file
    #[error("Recorder process failed generating video file (is empty) for recording {recording_id} after {waited_ms}ms")]
    ArtifactTimeout { recording_id: String, waited_ms: u64 },

    /// The recorder process did not exit within the graceful stop window
    #[error("Recording {recording_id} couldn't finish in {timeout_secs} seconds")]
    CompletionTimeout {
        recording_id: String,
        timeout_secs: u64,
    },

    /// The composition engine failed while being set up
    #[error("Composite recording {recording_id} failed: {source}")]
    Composition {
        recording_id: String,
        #[source]
        source: EngineError,
    },

    /// The artifact report written by the recorder process could not be read
    #[error("There was an error reading the metadata report file for recording {recording_id}: {message}")]
    Report {
        recording_id: String,
        message: String,
    },

    #[error("Session {0} is already being recorded")]
    AlreadyRecording(String),

    #[error("Recording {0} was stopped before it finished starting")]
    StoppedWhileStarting(String),

    #[error("Serialization Error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RecordingError {
    /// Recording the error refers to, if any
    pub fn recording_id(&self) -> Option<&str> {
        match self {
            RecordingError::ProcessLaunch { recording_id, .. }
            | RecordingError::ArtifactTimeout { recording_id, .. }
            | RecordingError::CompletionTimeout { recording_id, .. }
            | RecordingError::Composition { recording_id, .. }
            | RecordingError::Report { recording_id, .. } => Some(recording_id),
            RecordingError::StoppedWhileStarting(recording_id) => Some(recording_id),
            RecordingError::AlreadyRecording(_) | RecordingError::Serialization(_) => None,
        }
    }
}
