use std::sync::Arc;
use tracing::{error, info, warn};

use super::composition::CompositeRecorder;
use super::entity::{Recording, RecordingProperties, RecordingStrategyKind};
use super::external::{ExternalProcessRecorder, RecoveryOutcome};
use super::registry::RecordingRegistry;
use super::strategy::{RecorderContext, RecordingStrategy};
use crate::composite::CompositionEngineFactory;
use crate::config::{RecordingConfig, TimeoutConfig};
use crate::error::RecordingError;
use crate::process::{ProcessHandle, ProcessRuntime};
use crate::session::{PublisherStream, Session, SessionNotifier, StopReason};

/// Starts and stops the recordings of live sessions
///
/// At most one recording per session is starting or started at any time.
/// Whatever the outcome of a start or stop, the recording ends up tracked
/// with its final status and no process or engine is left registered for
/// a failed start.
pub struct RecordingService {
    ctx: Arc<RecorderContext>,
    registry: RecordingRegistry,
    external: ExternalProcessRecorder,
    composite: CompositeRecorder,
}

impl RecordingService {
    pub fn new(
        recording: RecordingConfig,
        timeouts: TimeoutConfig,
        runtime: Arc<dyn ProcessRuntime>,
        engines: Arc<dyn CompositionEngineFactory>,
        notifier: Arc<dyn SessionNotifier>,
    ) -> Self {
        let registry = RecordingRegistry::new(recording.recordings_path());
        let ctx = Arc::new(RecorderContext::new(recording, timeouts, notifier));

        Self {
            registry,
            external: ExternalProcessRecorder::new(Arc::clone(&ctx), runtime),
            composite: CompositeRecorder::new(Arc::clone(&ctx), engines),
            ctx,
        }
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.ctx.recording
    }

    fn strategy(&self, kind: RecordingStrategyKind) -> &dyn RecordingStrategy {
        match kind {
            RecordingStrategyKind::ExternalProcess => &self.external,
            RecordingStrategyKind::Composition => &self.composite,
        }
    }

    /// Start recording a session
    ///
    /// Returns once the artifact is being written. On failure everything
    /// registered for the session is released and the recording is kept as
    /// failed.
    pub async fn start_recording(
        &self,
        session: &Session,
        properties: RecordingProperties,
    ) -> Result<Recording, RecordingError> {
        // A recovering session may still get a late process registered
        if self.external.is_recovering(&session.session_id).await {
            warn!(
                "Session {} is still cleaning up a stopped recording",
                session.session_id
            );
            return Err(RecordingError::AlreadyRecording(session.session_id.clone()));
        }

        let mut recording = self.registry.reserve(session, properties).await?;
        info!(
            recording_id = %recording.id,
            session_id = %session.session_id,
            strategy = ?recording.strategy,
            "Starting recording"
        );

        let strategy = self.strategy(recording.strategy);
        if let Err(e) = strategy.start(session, &mut recording).await {
            return Err(self.abort_start(strategy, recording, e).await);
        }

        if !self.registry.promote(&mut recording).await {
            warn!(
                "Recording {} was stopped while it was starting",
                recording.id
            );
            let e = RecordingError::StoppedWhileStarting(recording.id.clone());
            return Err(self.abort_start(strategy, recording, e).await);
        }

        info!(recording_id = %recording.id, "Recording started");
        self.ctx.notify_started(session, &recording).await;
        Ok(recording)
    }

    async fn abort_start(
        &self,
        strategy: &dyn RecordingStrategy,
        mut recording: Recording,
        error: RecordingError,
    ) -> RecordingError {
        error!(
            recording_id = %recording.id,
            "Couldn't start recording: {}", error
        );

        strategy.release(&recording).await;
        self.registry.abandon(&mut recording).await;
        error
    }

    /// Stop a recording
    ///
    /// `session` is absent when the session is already gone; no stop event
    /// is sent then, nor without a `reason`. Stopping a recording that
    /// already reached a final state returns it unchanged.
    pub async fn stop_recording(
        &self,
        session: Option<&Session>,
        mut recording: Recording,
        reason: Option<StopReason>,
    ) -> Result<Recording, RecordingError> {
        if let Some(finished) = self.registry.finished(&recording.id).await {
            warn!("Recording {} is already stopped", recording.id);
            return Ok(finished);
        }

        info!(
            recording_id = %recording.id,
            session_id = %recording.session_id,
            reason = ?reason,
            "Stopping recording"
        );

        let result = self
            .strategy(recording.strategy)
            .stop(session, &mut recording, reason)
            .await;
        self.registry.finish(&recording).await;

        match result {
            Ok(()) => {
                info!(
                    recording_id = %recording.id,
                    status = ?recording.status,
                    duration = recording.duration,
                    size = recording.size,
                    "Recording stopped"
                );
                Ok(recording)
            }
            Err(e) => {
                error!(recording_id = %recording.id, "Error stopping recording: {}", e);
                Err(e)
            }
        }
    }

    /// Any tracked recording, whatever its status
    pub async fn recording(&self, recording_id: &str) -> Option<Recording> {
        self.registry.get(recording_id).await
    }

    /// The starting or started recording of a session
    pub async fn active_recording(&self, session_id: &str) -> Option<Recording> {
        self.registry.active_for_session(session_id).await
    }

    pub async fn is_recording(&self, session_id: &str) -> bool {
        self.active_recording(session_id).await.is_some()
    }

    /// Recorder process registered for a session
    pub async fn recorder_process(&self, session_id: &str) -> Option<ProcessHandle> {
        self.external.process(session_id).await
    }

    /// Whether a composition engine is registered for a session
    pub async fn has_composite(&self, session_id: &str) -> bool {
        self.composite.engine(session_id).await.is_some()
    }

    /// Wait for the cleanup scheduled by a stop that raced a start
    pub async fn await_recovery(&self, recording_id: &str) -> Option<RecoveryOutcome> {
        self.external.await_recovery(recording_id).await
    }

    /// Add a newly published stream to the composite recording of a session
    ///
    /// Returns false when the session has no composite recording.
    pub async fn join_publisher(
        &self,
        session: &Session,
        stream: &PublisherStream,
    ) -> Result<bool, RecordingError> {
        let Some(recording) = self.active_recording(&session.session_id).await else {
            return Ok(false);
        };
        if recording.strategy != RecordingStrategyKind::Composition {
            return Ok(false);
        }

        self.composite
            .join(&session.session_id, &recording.id, stream)
            .await
    }

    /// Remove an unpublished stream from the composite recording of a session
    pub async fn leave_publisher(&self, session_id: &str, stream_id: &str) -> bool {
        self.composite.leave(session_id, stream_id).await
    }
}
