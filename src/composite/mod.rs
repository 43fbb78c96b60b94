//! In-process composition of participant streams
//!
//! A composition engine mixes every attached publisher stream of a session
//! into a single artifact. It never owns the participants: it holds a
//! subscription per stream that can be detached at any time.

pub mod wav;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::session::{PublisherStream, Session};

pub use wav::{WavCompositeEngine, WavEngineFactory};

/// Result of attaching a stream to an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// The stream is attached and being recorded
    Attached,
    /// The stream is attached, but this attach started the recorder and it
    /// has not confirmed yet. Expected for the first stream.
    RecorderPending,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Recorder couldn't start: {0}")]
    RecorderStart(String),

    #[error("Engine for session {0} is already stopped")]
    Stopped(String),

    #[error("Engine Error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Stateful per-session mixer
#[async_trait::async_trait]
pub trait CompositionEngine: Send + Sync {
    /// Start mixing a publisher stream into the output
    async fn attach(&self, stream: &PublisherStream) -> Result<AttachOutcome, EngineError>;

    /// Stop mixing one stream
    async fn detach(&self, stream_id: &str);

    /// Stop mixing every stream still attached
    async fn detach_all(&self);

    /// Stop recording and flush the output; the signal fires once the
    /// artifact is complete on disk
    async fn stop_and_flush(&self) -> oneshot::Receiver<()>;

    /// Seconds of media written so far
    fn duration_seconds(&self) -> f64;

    fn output_path(&self) -> &Path;
}

/// Creates one engine per recorded session
pub trait CompositionEngineFactory: Send + Sync {
    fn create(
        &self,
        session: &Session,
        output_path: PathBuf,
    ) -> Result<Arc<dyn CompositionEngine>, EngineError>;
}
