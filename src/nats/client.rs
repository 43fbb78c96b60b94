use anyhow::{Context, Result};
use async_nats::Client;
use tracing::info;

use super::messages::RecordingEventMessage;
use crate::recording::Recording;
use crate::session::{Session, SessionNotifier, StopReason};

/// Publishes recording lifecycle events for the session handler
pub struct NatsNotifier {
    client: Client,
}

impl NatsNotifier {
    /// Connect to NATS server
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self { client })
    }

    /// Subject events for a session are published on
    pub fn subject(event: &str, session_id: &str) -> String {
        format!("recording.{}.{}", event, session_id)
    }

    async fn publish(&self, subject: String, message: &RecordingEventMessage) -> Result<()> {
        let payload = serde_json::to_vec(message)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish recording event")?;

        info!(
            "Published recording event to {} (recording={}, status={:?})",
            subject, message.recording_id, message.status
        );

        Ok(())
    }

    /// Close NATS connection
    pub async fn close(&self) -> Result<()> {
        info!("Closing NATS connection");
        self.client
            .flush()
            .await
            .context("Failed to flush NATS connection")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionNotifier for NatsNotifier {
    async fn recording_started(&self, session: &Session, recording: &Recording) -> Result<()> {
        let subject = Self::subject("started", session.short_session_id());
        self.publish(subject, &RecordingEventMessage::started(recording))
            .await
    }

    async fn recording_stopped(
        &self,
        session: &Session,
        recording: &Recording,
        reason: StopReason,
    ) -> Result<()> {
        let subject = Self::subject("stopped", session.short_session_id());
        self.publish(subject, &RecordingEventMessage::stopped(recording, reason))
            .await
    }
}
