// Recording through an external recorder process
//
// The recorder opens the capture URL of the session and writes
// `<name>.mp4` plus an `<id>.info` report into the recording directory.
// Process handles are registered per session before any waiting happens, so
// a stop arriving mid-start can always find the process. When it can't (the
// launch itself is still in flight) a recovery task waits for the handle to
// show up and disposes of the half-started recording.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::entity::{Recording, RecordingStatus};
use super::handles::HandleMap;
use super::layout;
use super::metadata::{self, ArtifactInfo};
use super::strategy::{RecorderContext, RecordingStrategy};
use crate::error::RecordingError;
use crate::process::{LaunchSpec, ProcessHandle, ProcessRuntime, VolumeBind};
use crate::session::{Session, StopReason};

/// Mount point of the recordings directory inside the recorder
const CONTAINER_RECORDINGS_PATH: &str = "/recordings";

/// Name a recording's process is launched under
pub fn process_name(recording_id: &str) -> String {
    format!("recording_{}", recording_id)
}

/// How a recovery task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The late process was found, stopped and its files deleted
    Recovered { process: ProcessHandle },
    /// No process showed up within the polling window
    GaveUp { attempts: u32 },
}

pub struct ExternalProcessRecorder {
    ctx: Arc<RecorderContext>,
    runtime: Arc<dyn ProcessRuntime>,
    processes: HandleMap<ProcessHandle>,
    /// Session id -> recording id, while a recovery task owns the session
    recovering: HandleMap<String>,
    recoveries: Mutex<HashMap<String, JoinHandle<RecoveryOutcome>>>,
}

impl ExternalProcessRecorder {
    pub fn new(ctx: Arc<RecorderContext>, runtime: Arc<dyn ProcessRuntime>) -> Self {
        Self {
            ctx,
            runtime,
            processes: HandleMap::new(),
            recovering: HandleMap::new(),
            recoveries: Mutex::new(HashMap::new()),
        }
    }

    /// Process currently registered for a session
    pub async fn process(&self, session_id: &str) -> Option<ProcessHandle> {
        self.processes.get(session_id).await
    }

    /// Whether a recovery task still owns the session
    pub async fn is_recovering(&self, session_id: &str) -> bool {
        self.recovering.contains(session_id).await
    }

    /// Wait for the recovery task spawned for a recording, if any
    pub async fn await_recovery(&self, recording_id: &str) -> Option<RecoveryOutcome> {
        let task = self.recoveries.lock().await.remove(recording_id)?;
        match task.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Recovery task of recording {} panicked: {}", recording_id, e);
                None
            }
        }
    }

    fn launch_spec(&self, recording: &Recording, url: &str) -> Result<LaunchSpec, RecordingError> {
        let config = &self.ctx.recording;
        let resolution = recording
            .resolution
            .clone()
            .unwrap_or_else(|| recording.properties.resolution.clone());

        let env = vec![
            format!("URL={}", url),
            // Without audio the recorder captures video only
            format!("ONLY_VIDEO={}", !recording.properties.has_audio),
            format!("RESOLUTION={}", resolution),
            format!("FRAMERATE={}", config.framerate),
            format!("VIDEO_ID={}", recording.id),
            format!("VIDEO_NAME={}", recording.name()),
            format!("VIDEO_FORMAT={}", recording.strategy.extension()),
            format!("RECORDING_JSON={}", recording.to_json()?),
        ];

        Ok(LaunchSpec {
            name: process_name(&recording.id),
            image: config.image.clone(),
            env,
            volume: VolumeBind {
                host_path: config.recordings_path(),
                container_path: CONTAINER_RECORDINGS_PATH.to_string(),
            },
            network_mode: "host".to_string(),
        })
    }

    /// Poll until the recorder wrote a non-empty artifact
    async fn wait_for_artifact(&self, recording: &Recording) -> Result<(), RecordingError> {
        let timeouts = &self.ctx.timeouts;
        let path = self
            .ctx
            .recording
            .recording_dir(&recording.id)
            .join(recording.artifact_file_name());

        for _ in 0..timeouts.artifact_poll_attempts {
            sleep(timeouts.artifact_poll_interval()).await;
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                if meta.is_file() && meta.len() > 0 {
                    debug!("Recorder output {:?} is being written", path);
                    return Ok(());
                }
            }
        }

        error!(
            "Recorder process failed generating video file {:?} (is empty)",
            path
        );
        Err(RecordingError::ArtifactTimeout {
            recording_id: recording.id.clone(),
            waited_ms: timeouts.artifact_poll_interval_ms * timeouts.artifact_poll_attempts as u64,
        })
    }

    /// Stop path when the session's process handle was found
    async fn stop_process(
        &self,
        session: Option<&Session>,
        recording: &mut Recording,
        reason: Option<StopReason>,
        handle: ProcessHandle,
    ) -> Result<(), RecordingError> {
        info!(
            "Stopping recorder process {} of recording {}",
            handle.name, recording.id
        );

        let exited = self.runtime.wait_for_exit(&handle).await;
        if let Err(e) = self.runtime.exec_graceful(&handle).await {
            warn!("Couldn't ask recorder process {} to finish: {}", handle.name, e);
        }

        let graceful_exit = self.ctx.timeouts.graceful_exit();
        let finished = match exited {
            Ok(exited) => matches!(timeout(graceful_exit, exited).await, Ok(Ok(()))),
            Err(e) => {
                warn!("Couldn't watch recorder process {}: {}", handle.name, e);
                false
            }
        };

        if !finished {
            error!(
                "Recorder process {} of recording {} didn't finish in {} seconds",
                handle.name, recording.id, self.ctx.timeouts.graceful_exit_secs
            );
            recording.fail();
            force_stop(self.runtime.as_ref(), &handle).await;
            return Err(RecordingError::CompletionTimeout {
                recording_id: recording.id.clone(),
                timeout_secs: self.ctx.timeouts.graceful_exit_secs,
            });
        }

        if let Err(e) = self.runtime.remove(&handle).await {
            warn!("Couldn't remove recorder process {}: {}", handle.name, e);
        }

        let recording_dir = self.ctx.recording.recording_dir(&recording.id);
        let info_path = metadata::info_file(&recording_dir, &recording.id);
        let info = match ArtifactInfo::read(&info_path).await {
            Ok(info) => info,
            Err(e) => {
                error!(
                    "There was an error reading the report of recording {}: {:#}",
                    recording.id, e
                );
                recording.fail();
                return Err(RecordingError::Report {
                    recording_id: recording.id.clone(),
                    message: format!("{:#}", e),
                });
            }
        };

        info.apply_to(recording);
        recording.status = RecordingStatus::Stopped;
        if let Err(e) = tokio::fs::remove_file(&info_path).await {
            warn!("Couldn't delete report {:?}: {}", info_path, e);
        }

        if self.ctx.recording.public_access {
            recording.url = Some(layout::download_url(&self.ctx.recording, recording));
        }

        let (size, duration) = (recording.size, recording.duration);
        let sealed = metadata::seal_description(&recording_dir, recording, size, duration).await;
        if let Err(e) = sealed {
            error!("Couldn't seal metadata of recording {}: {:#}", recording.id, e);
        }

        self.ctx.notify_stopped(session, recording, reason).await;
        Ok(())
    }

    /// Dispose of a recording whose process isn't registered yet
    async fn spawn_recovery(&self, recording: &Recording) {
        warn!(
            "Recording {} stopped while its recorder process is still launching, scheduling cleanup",
            recording.id
        );

        self.recovering
            .insert(recording.session_id.clone(), recording.id.clone())
            .await;

        let task = tokio::spawn(recover_late_process(
            self.processes.clone(),
            self.recovering.clone(),
            Arc::clone(&self.runtime),
            recording.session_id.clone(),
            process_name(&recording.id),
            self.ctx.recording.recording_dir(&recording.id),
            self.ctx.timeouts.recovery_poll_interval(),
            self.ctx.timeouts.recovery_poll_attempts,
        ));

        self.recoveries
            .lock()
            .await
            .insert(recording.id.clone(), task);
    }
}

#[async_trait::async_trait]
impl RecordingStrategy for ExternalProcessRecorder {
    async fn start(
        &self,
        session: &Session,
        recording: &mut Recording,
    ) -> Result<(), RecordingError> {
        let url = layout::capture_url(&self.ctx.recording, recording, session.short_session_id());
        let spec = self.launch_spec(recording, &url)?;

        info!("Recorder connecting to url {}", url);
        debug!("Recording {} launch environment: {:?}", recording.id, spec.env);

        let handle = self
            .runtime
            .launch(spec)
            .await
            .map_err(|source| RecordingError::ProcessLaunch {
                recording_id: recording.id.clone(),
                source,
            })?;

        // Registered before waiting so a concurrent stop finds it
        if let Some(previous) = self
            .processes
            .insert(session.session_id.clone(), handle.clone())
            .await
        {
            warn!(
                "Session {} still had recorder process {} registered",
                session.session_id, previous.name
            );
        }

        info!(
            "Recorder process {} launched for recording {}",
            handle.name, recording.id
        );

        self.wait_for_artifact(recording).await
    }

    async fn stop(
        &self,
        session: Option<&Session>,
        recording: &mut Recording,
        reason: Option<StopReason>,
    ) -> Result<(), RecordingError> {
        if session.is_none() {
            warn!(
                "Session {} already closed when stopping recording {}",
                recording.session_id, recording.id
            );
        }

        let name = process_name(&recording.id);
        match self
            .processes
            .remove_if(&recording.session_id, |h| h.name == name)
            .await
        {
            Some(handle) => self.stop_process(session, recording, reason, handle).await,
            None if recording.status.is_final() => {
                warn!("Recording {} is already stopped", recording.id);
                Ok(())
            }
            None => {
                // Its files are deleted by the recovery task
                recording.fail();
                self.spawn_recovery(recording).await;
                Ok(())
            }
        }
    }

    async fn release(&self, recording: &Recording) {
        let recovering = self.recovering.get(&recording.session_id).await;
        if recovering.as_deref() == Some(recording.id.as_str()) {
            debug!(
                "Recovery of recording {} pending, leaving its process to it",
                recording.id
            );
            return;
        }

        let session_id = &recording.session_id;
        let name = process_name(&recording.id);
        if let Some(handle) = self
            .processes
            .remove_if(session_id, |h| h.name == name)
            .await
        {
            warn!(
                "Removing recorder process {} of session {}",
                handle.name, session_id
            );
            force_stop(self.runtime.as_ref(), &handle).await;
        }
    }
}

/// Kill a process and forget about it, logging any runtime error
async fn force_stop(runtime: &dyn ProcessRuntime, handle: &ProcessHandle) {
    if let Err(e) = runtime.stop(handle).await {
        warn!("Couldn't stop recorder process {}: {}", handle.name, e);
    }
    if let Err(e) = runtime.remove(handle).await {
        warn!("Couldn't remove recorder process {}: {}", handle.name, e);
    }
}

async fn recover_late_process(
    processes: HandleMap<ProcessHandle>,
    recovering: HandleMap<String>,
    runtime: Arc<dyn ProcessRuntime>,
    session_id: String,
    name: String,
    recording_dir: PathBuf,
    interval: std::time::Duration,
    attempts: u32,
) -> RecoveryOutcome {
    for _ in 0..attempts {
        // Only this recording's process; the session may be recording again
        if let Some(handle) = processes.remove_if(&session_id, |h| h.name == name).await {
            warn!(
                "Removing recorder process {} of closed session {}",
                handle.name, session_id
            );
            force_stop(runtime.as_ref(), &handle).await;

            match tokio::fs::remove_dir_all(&recording_dir).await {
                Ok(()) => warn!("Deleted unusable files {:?}", recording_dir),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => error!("Couldn't delete unusable files {:?}: {}", recording_dir, e),
            }

            recovering.remove(&session_id).await;
            return RecoveryOutcome::Recovered { process: handle };
        }

        debug!("Waiting for recorder process {} to be launched", name);
        sleep(interval).await;
    }

    warn!(
        "Recorder process {} didn't show up after {} checks",
        name, attempts
    );
    recovering.remove(&session_id).await;
    RecoveryOutcome::GaveUp { attempts }
}
