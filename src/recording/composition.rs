use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::entity::Recording;
use super::handles::HandleMap;
use super::layout;
use super::metadata;
use super::strategy::{RecorderContext, RecordingStrategy};
use crate::composite::{AttachOutcome, CompositionEngine, CompositionEngineFactory, EngineError};
use crate::error::RecordingError;
use crate::session::{PublisherStream, Session, StopReason};

/// Recording through an in-process composition engine, one per session
pub struct CompositeRecorder {
    ctx: Arc<RecorderContext>,
    factory: Arc<dyn CompositionEngineFactory>,
    engines: HandleMap<Arc<dyn CompositionEngine>>,
}

impl CompositeRecorder {
    pub fn new(ctx: Arc<RecorderContext>, factory: Arc<dyn CompositionEngineFactory>) -> Self {
        Self {
            ctx,
            factory,
            engines: HandleMap::new(),
        }
    }

    /// Engine currently registered for a session
    pub async fn engine(&self, session_id: &str) -> Option<Arc<dyn CompositionEngine>> {
        self.engines.get(session_id).await
    }

    /// Attach a stream that started publishing after the recording started
    ///
    /// Returns false when the session isn't being composed.
    pub async fn join(
        &self,
        session_id: &str,
        recording_id: &str,
        stream: &PublisherStream,
    ) -> Result<bool, RecordingError> {
        let Some(engine) = self.engines.get(session_id).await else {
            return Ok(false);
        };

        match engine.attach(stream).await {
            Ok(AttachOutcome::Attached) => {}
            Ok(AttachOutcome::RecorderPending) => debug!(
                "Recorder of composite for session {} starting with stream {}",
                session_id,
                stream.stream_id()
            ),
            Err(source) => {
                error!(
                    "Couldn't join stream {} to composite of session {}: {}",
                    stream.stream_id(),
                    session_id,
                    source
                );
                return Err(RecordingError::Composition {
                    recording_id: recording_id.to_string(),
                    source,
                });
            }
        }
        Ok(true)
    }

    /// Detach a stream that stopped publishing
    pub async fn leave(&self, session_id: &str, stream_id: &str) -> bool {
        match self.engines.get(session_id).await {
            Some(engine) => {
                engine.detach(stream_id).await;
                true
            }
            None => false,
        }
    }

    /// Stop an engine, waiting a bounded time for its output to be flushed
    ///
    /// Returns false if the flush didn't complete.
    async fn stop_engine(&self, session_id: &str, engine: &dyn CompositionEngine) -> bool {
        let done = engine.stop_and_flush().await;
        let flushed = match timeout(self.ctx.timeouts.composite_stop(), done).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                error!(
                    "Recorder of composite for session {} ended without flushing",
                    session_id
                );
                false
            }
            Err(_) => {
                error!(
                    "Error waiting for recorder of composite to stop in session {}",
                    session_id
                );
                false
            }
        };
        engine.detach_all().await;
        flushed
    }

    /// Size on disk and recorded duration of an engine's output
    async fn measure(engine: &dyn CompositionEngine) -> (u64, f64) {
        let size = tokio::fs::metadata(engine.output_path())
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        (size, engine.duration_seconds())
    }
}

#[async_trait::async_trait]
impl RecordingStrategy for CompositeRecorder {
    async fn start(
        &self,
        session: &Session,
        recording: &mut Recording,
    ) -> Result<(), RecordingError> {
        let recording_dir = self.ctx.recording.recording_dir(&recording.id);
        let output_path = recording_dir.join(recording.artifact_file_name());

        let engine = self
            .factory
            .create(session, output_path)
            .map_err(|source| RecordingError::Composition {
                recording_id: recording.id.clone(),
                source,
            })?;

        // Registered before attaching so a concurrent stop finds it
        self.engines
            .insert(session.session_id.clone(), Arc::clone(&engine))
            .await;

        metadata::write_description(&recording_dir, recording)
            .await
            .map_err(|e| RecordingError::Composition {
                recording_id: recording.id.clone(),
                source: EngineError::Other(e),
            })?;

        for participant in session.streaming_participants() {
            let Some(stream) = &participant.publisher else {
                continue;
            };

            match engine.attach(stream).await {
                Ok(AttachOutcome::Attached) => {}
                Ok(AttachOutcome::RecorderPending) => debug!(
                    "Recorder of composite for session {} starting",
                    session.session_id
                ),
                Err(source) => {
                    error!(
                        "Error waiting for recorder of composite to start in session {}: {}",
                        session.session_id, source
                    );
                    return Err(RecordingError::Composition {
                        recording_id: recording.id.clone(),
                        source,
                    });
                }
            }
        }

        info!(
            "Composite recording {} started for session {}",
            recording.id, session.session_id
        );
        Ok(())
    }

    async fn stop(
        &self,
        session: Option<&Session>,
        recording: &mut Recording,
        reason: Option<StopReason>,
    ) -> Result<(), RecordingError> {
        let session_id = match session {
            Some(session) => session.session_id.clone(),
            None => {
                warn!(
                    "Session {} already closed when stopping recording {}",
                    recording.session_id, recording.id
                );
                recording.session_id.clone()
            }
        };

        let Some(engine) = self.engines.remove(&session_id).await else {
            if recording.status.is_final() {
                warn!("Recording {} is already stopped", recording.id);
            } else {
                warn!(
                    "No composite registered for session {}, recording {} is lost",
                    session_id, recording.id
                );
                recording.fail();
            }
            return Ok(());
        };

        if !self.stop_engine(&session_id, engine.as_ref()).await {
            recording.fail();
        }

        let (size, duration) = Self::measure(engine.as_ref()).await;

        if self.ctx.recording.public_access && !recording.status.is_final() {
            recording.url = Some(layout::download_url(&self.ctx.recording, recording));
        }

        let recording_dir = self.ctx.recording.recording_dir(&recording.id);
        let sealed = metadata::seal_description(&recording_dir, recording, size, duration).await;
        if let Err(e) = sealed {
            error!("Couldn't seal metadata of recording {}: {:#}", recording.id, e);
        }

        self.ctx.notify_stopped(session, recording, reason).await;
        Ok(())
    }

    async fn release(&self, recording: &Recording) {
        let session_id = &recording.session_id;
        if let Some(engine) = self.engines.remove(session_id).await {
            warn!("Removing composite of session {}", session_id);
            self.stop_engine(session_id, engine.as_ref()).await;

            let mut failed = recording.clone();
            failed.fail();
            let (size, duration) = Self::measure(engine.as_ref()).await;
            let recording_dir = self.ctx.recording.recording_dir(&recording.id);
            let sealed =
                metadata::seal_description(&recording_dir, &mut failed, size, duration).await;
            if let Err(e) = sealed {
                error!("Couldn't seal metadata of recording {}: {:#}", recording.id, e);
            }
        }
    }
}
