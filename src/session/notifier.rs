use anyhow::Result;
use tracing::info;

use super::session::{Session, StopReason};
use crate::recording::Recording;

/// Delivers recording lifecycle events to the participants of a session
#[async_trait::async_trait]
pub trait SessionNotifier: Send + Sync {
    async fn recording_started(&self, session: &Session, recording: &Recording) -> Result<()>;

    async fn recording_stopped(
        &self,
        session: &Session,
        recording: &Recording,
        reason: StopReason,
    ) -> Result<()>;
}

/// Notifier that only writes the events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl SessionNotifier for LogNotifier {
    async fn recording_started(&self, session: &Session, recording: &Recording) -> Result<()> {
        info!(
            session_id = %session.session_id,
            recording_id = %recording.id,
            "Recording started"
        );
        Ok(())
    }

    async fn recording_stopped(
        &self,
        session: &Session,
        recording: &Recording,
        reason: StopReason,
    ) -> Result<()> {
        info!(
            session_id = %session.session_id,
            recording_id = %recording.id,
            %reason,
            "Recording stopped"
        );
        Ok(())
    }
}
