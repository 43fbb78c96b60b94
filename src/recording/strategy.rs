use std::sync::Arc;
use tracing::warn;

use super::entity::Recording;
use crate::config::{RecordingConfig, TimeoutConfig};
use crate::error::RecordingError;
use crate::session::{Session, SessionNotifier, StopReason};

/// Configuration and collaborators shared by every strategy
pub struct RecorderContext {
    pub recording: RecordingConfig,
    pub timeouts: TimeoutConfig,
    pub notifier: Arc<dyn SessionNotifier>,
}

impl RecorderContext {
    pub fn new(
        recording: RecordingConfig,
        timeouts: TimeoutConfig,
        notifier: Arc<dyn SessionNotifier>,
    ) -> Self {
        Self {
            recording,
            timeouts,
            notifier,
        }
    }

    /// Tell the session a recording started; delivery failures are only logged
    pub async fn notify_started(&self, session: &Session, recording: &Recording) {
        if let Err(e) = self.notifier.recording_started(session, recording).await {
            warn!(
                "Couldn't notify start of recording {} to session {}: {:#}",
                recording.id, session.session_id, e
            );
        }
    }

    /// Tell the session a recording stopped, if there is a session and a reason
    pub async fn notify_stopped(
        &self,
        session: Option<&Session>,
        recording: &Recording,
        reason: Option<StopReason>,
    ) {
        let (Some(session), Some(reason)) = (session, reason) else {
            return;
        };

        if let Err(e) = self
            .notifier
            .recording_stopped(session, recording, reason)
            .await
        {
            warn!(
                "Couldn't notify stop of recording {} to session {}: {:#}",
                recording.id, session.session_id, e
            );
        }
    }
}

/// One way of producing a recording
///
/// The caller owns the `Recording` for the whole call; strategies update it
/// in place so the final state survives an error.
#[async_trait::async_trait]
pub trait RecordingStrategy: Send + Sync {
    /// Start producing the recording; returns once it is being written
    async fn start(&self, session: &Session, recording: &mut Recording)
        -> Result<(), RecordingError>;

    /// Stop the recording and seal its metadata
    ///
    /// `session` is absent when the session was already torn down.
    async fn stop(
        &self,
        session: Option<&Session>,
        recording: &mut Recording,
        reason: Option<StopReason>,
    ) -> Result<(), RecordingError>;

    /// Tear down whatever a failed start left registered for its session
    async fn release(&self, recording: &Recording);
}
