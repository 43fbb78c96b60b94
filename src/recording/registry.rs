use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::debug;

use super::entity::{Recording, RecordingProperties, RecordingStatus};
use crate::error::RecordingError;
use crate::session::Session;

#[derive(Default)]
struct RegistryState {
    /// Recordings whose start is in flight, by recording id
    starting: HashMap<String, Recording>,
    /// Recordings currently running, by recording id
    started: HashMap<String, Recording>,
    /// Stopped or failed recordings kept for inspection, by recording id
    finished: HashMap<String, Recording>,
    /// Recording id -> session id of recordings stopped while starting, until
    /// their start returns
    settling: HashMap<String, String>,
}

impl RegistryState {
    fn is_tracked(&self, recording_id: &str) -> bool {
        self.starting.contains_key(recording_id)
            || self.started.contains_key(recording_id)
            || self.finished.contains_key(recording_id)
    }

    fn active_for_session(&self, session_id: &str) -> Option<&Recording> {
        self.starting
            .values()
            .chain(self.started.values())
            .find(|r| r.session_id == session_id)
    }

    fn is_settling(&self, session_id: &str) -> bool {
        self.settling.values().any(|s| s == session_id)
    }
}

/// Every recording known to the service, by lifecycle stage
pub struct RecordingRegistry {
    recordings_path: PathBuf,
    state: Mutex<RegistryState>,
}

impl RecordingRegistry {
    pub fn new(recordings_path: PathBuf) -> Self {
        Self {
            recordings_path,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Allocate a free recording id for the session and track it as starting
    ///
    /// The id is the short session id, suffixed with `-1`, `-2`, ... while
    /// it is taken by a tracked recording or an existing recording directory.
    /// An empty name becomes the id.
    pub async fn reserve(
        &self,
        session: &Session,
        mut properties: RecordingProperties,
    ) -> Result<Recording, RecordingError> {
        let mut state = self.state.lock().await;

        if let Some(active) = state.active_for_session(&session.session_id) {
            debug!(
                "Session {} already has recording {} in progress",
                session.session_id, active.id
            );
            return Err(RecordingError::AlreadyRecording(session.session_id.clone()));
        }

        if state.is_settling(&session.session_id) {
            debug!(
                "Session {} has a stopped recording whose start hasn't returned yet",
                session.session_id
            );
            return Err(RecordingError::AlreadyRecording(session.session_id.clone()));
        }

        let base = session.short_session_id();
        let mut recording_id = base.to_string();
        let mut suffix = 0;
        while state.is_tracked(&recording_id) || self.recordings_path.join(&recording_id).exists() {
            suffix += 1;
            recording_id = format!("{}-{}", base, suffix);
        }

        if properties.name.is_empty() {
            properties.name = recording_id.clone();
        }

        let recording = Recording::new(session.session_id.clone(), recording_id, properties);
        state
            .starting
            .insert(recording.id.clone(), recording.clone());

        Ok(recording)
    }

    /// Move a recording from starting to started
    ///
    /// Returns false if it is no longer starting (a stop got to it first).
    pub async fn promote(&self, recording: &mut Recording) -> bool {
        let mut state = self.state.lock().await;
        if state.starting.remove(&recording.id).is_none() {
            state.settling.remove(&recording.id);
            return false;
        }

        recording.status = RecordingStatus::Started;
        state
            .started
            .insert(recording.id.clone(), recording.clone());
        true
    }

    /// Record the final state of a recording
    ///
    /// A recording still starting keeps its session reserved until its start
    /// returns through `promote` or `abandon`.
    pub async fn finish(&self, recording: &Recording) {
        let mut state = self.state.lock().await;
        if state.starting.remove(&recording.id).is_some() {
            state
                .settling
                .insert(recording.id.clone(), recording.session_id.clone());
        }
        state.started.remove(&recording.id);
        state
            .finished
            .insert(recording.id.clone(), recording.clone());
    }

    /// Record a failed start, unless a stop already recorded its outcome
    pub async fn abandon(&self, recording: &mut Recording) {
        let mut state = self.state.lock().await;
        state.starting.remove(&recording.id);
        state.started.remove(&recording.id);
        state.settling.remove(&recording.id);
        if state.finished.contains_key(&recording.id) {
            return;
        }

        recording.fail();
        state
            .finished
            .insert(recording.id.clone(), recording.clone());
    }

    /// Final state of a recording, if it already stopped or failed
    pub async fn finished(&self, recording_id: &str) -> Option<Recording> {
        self.state.lock().await.finished.get(recording_id).cloned()
    }

    pub async fn get(&self, recording_id: &str) -> Option<Recording> {
        let state = self.state.lock().await;
        state
            .starting
            .get(recording_id)
            .or_else(|| state.started.get(recording_id))
            .or_else(|| state.finished.get(recording_id))
            .cloned()
    }

    /// Starting or started recording of a session
    pub async fn active_for_session(&self, session_id: &str) -> Option<Recording> {
        self.state
            .lock()
            .await
            .active_for_session(session_id)
            .cloned()
    }
}
