// Test doubles for the recording service collaborators
//
// FakeRuntime plays the part of a recorder process: it writes the artifact
// on launch and the report when asked to finish, each step switchable to
// reproduce recorder failures.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use loqa_recording::composite::{
    AttachOutcome, CompositionEngine, CompositionEngineFactory, EngineError,
};
use loqa_recording::config::{RecordingConfig, TimeoutConfig};
use loqa_recording::process::{LaunchSpec, ProcessHandle, ProcessRuntime, RuntimeError};
use loqa_recording::recording::Recording;
use loqa_recording::session::{PublisherStream, Session, SessionNotifier, StopReason};
use tokio::sync::{oneshot, watch};

pub const PROBE_REPORT: &str = r#"{
    "streams": [
        {"index": 0, "codec_type": "video", "width": 1280, "height": 720},
        {"index": 1, "codec_type": "audio"}
    ],
    "format": {"duration": "12.480000", "size": "204800"}
}"#;

pub fn recording_config(dir: &Path) -> RecordingConfig {
    RecordingConfig {
        path: dir.to_string_lossy().into_owned(),
        image: "fake-recorder".to_string(),
        secret: "s3cret".to_string(),
        public_url: "wss://media.example.com".to_string(),
        ..Default::default()
    }
}

pub fn fast_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        artifact_poll_interval_ms: 10,
        artifact_poll_attempts: 20,
        graceful_exit_secs: 1,
        composite_stop_secs: 1,
        recovery_poll_interval_ms: 10,
        recovery_poll_attempts: 100,
    }
}

/// What the fake recorder does at each step
#[derive(Debug, Clone)]
pub struct FakeBehaviour {
    pub launch_delay: Duration,
    /// Replaces `launch_delay` for the first launch only
    pub first_launch_delay: Option<Duration>,
    pub reject_launch: bool,
    pub write_artifact: bool,
    pub exit_on_graceful: bool,
    pub write_report: bool,
}

impl Default for FakeBehaviour {
    fn default() -> Self {
        Self {
            launch_delay: Duration::ZERO,
            first_launch_delay: None,
            reject_launch: false,
            write_artifact: true,
            exit_on_graceful: true,
            write_report: true,
        }
    }
}

struct FakeProcess {
    spec: LaunchSpec,
    exited: watch::Sender<bool>,
}

impl FakeProcess {
    fn recording_dir(&self) -> PathBuf {
        let id = self.spec.env_value("VIDEO_ID").unwrap_or_default();
        self.spec.volume.host_path.join(id)
    }
}

#[derive(Default)]
struct FakeState {
    launch_calls: u32,
    next_id: u32,
    launches: Vec<LaunchSpec>,
    graceful: Vec<String>,
    stopped: Vec<String>,
    removed: Vec<String>,
    running: HashMap<String, FakeProcess>,
}

#[derive(Default)]
pub struct FakeRuntime {
    behaviour: FakeBehaviour,
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new(behaviour: FakeBehaviour) -> Self {
        Self {
            behaviour,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.state.lock().unwrap().launches.clone()
    }

    pub fn graceful(&self) -> Vec<String> {
        self.state.lock().unwrap().graceful.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn running_count(&self) -> usize {
        self.state.lock().unwrap().running.len()
    }

    /// Logical names of the processes still running
    pub fn running_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<_> = state.running.values().map(|p| p.spec.name.clone()).collect();
        names.sort();
        names
    }
}

#[async_trait::async_trait]
impl ProcessRuntime for FakeRuntime {
    async fn launch(&self, spec: LaunchSpec) -> Result<ProcessHandle, RuntimeError> {
        let first = {
            let mut state = self.state.lock().unwrap();
            state.launch_calls += 1;
            state.launch_calls == 1
        };
        let delay = match self.behaviour.first_launch_delay {
            Some(delay) if first => delay,
            _ => self.behaviour.launch_delay,
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.behaviour.reject_launch {
            return Err(RuntimeError::NameConflict(spec.name));
        }

        let (exited, _) = watch::channel(false);
        let process = FakeProcess {
            spec: spec.clone(),
            exited,
        };

        if self.behaviour.write_artifact {
            let dir = process.recording_dir();
            let file = format!(
                "{}.{}",
                spec.env_value("VIDEO_NAME").unwrap_or_default(),
                spec.env_value("VIDEO_FORMAT").unwrap_or_default()
            );
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(file), b"ftypisom").unwrap();
        }

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("proc-{}", state.next_id);
        state.launches.push(spec.clone());
        state.running.insert(id.clone(), process);

        Ok(ProcessHandle {
            id,
            name: spec.name,
        })
    }

    async fn exec_graceful(&self, handle: &ProcessHandle) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.graceful.push(handle.id.clone());
        let process = state
            .running
            .get(&handle.id)
            .ok_or_else(|| RuntimeError::NotFound(handle.id.clone()))?;

        if self.behaviour.write_report {
            let id = process.spec.env_value("VIDEO_ID").unwrap_or_default();
            let dir = process.recording_dir();
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(format!("{}.info", id)), PROBE_REPORT).unwrap();
        }
        if self.behaviour.exit_on_graceful {
            process.exited.send_replace(true);
        }
        Ok(())
    }

    async fn wait_for_exit(
        &self,
        handle: &ProcessHandle,
    ) -> Result<oneshot::Receiver<()>, RuntimeError> {
        let mut exited = {
            let state = self.state.lock().unwrap();
            state
                .running
                .get(&handle.id)
                .ok_or_else(|| RuntimeError::NotFound(handle.id.clone()))?
                .exited
                .subscribe()
        };

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            if exited.wait_for(|exited| *exited).await.is_ok() {
                let _ = tx.send(());
            }
        });
        Ok(rx)
    }

    async fn stop(&self, handle: &ProcessHandle) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.stopped.push(handle.id.clone());
        let process = state
            .running
            .get(&handle.id)
            .ok_or_else(|| RuntimeError::NotFound(handle.id.clone()))?;
        process.exited.send_replace(true);
        Ok(())
    }

    async fn remove(&self, handle: &ProcessHandle) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.removed.push(handle.id.clone());
        state
            .running
            .remove(&handle.id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(handle.id.clone()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Started(String),
    Stopped(String, StopReason),
}

/// Notifier remembering every event it was asked to deliver
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Event>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SessionNotifier for RecordingNotifier {
    async fn recording_started(
        &self,
        _session: &Session,
        recording: &Recording,
    ) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Started(recording.id.clone()));
        Ok(())
    }

    async fn recording_stopped(
        &self,
        _session: &Session,
        recording: &Recording,
        reason: StopReason,
    ) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Stopped(recording.id.clone(), reason));
        Ok(())
    }
}

/// Engine that never confirms a flush, optionally refusing every stream
pub struct StuckEngine {
    output_path: PathBuf,
    fail_attach: bool,
    flushes: Mutex<Vec<oneshot::Sender<()>>>,
    pub detached_all: AtomicBool,
}

impl StuckEngine {
    pub fn flush_requested(&self) -> bool {
        !self.flushes.lock().unwrap().is_empty()
    }

    pub fn was_detached(&self) -> bool {
        self.detached_all.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CompositionEngine for StuckEngine {
    async fn attach(&self, _stream: &PublisherStream) -> Result<AttachOutcome, EngineError> {
        if self.fail_attach {
            return Err(EngineError::RecorderStart("recorder crashed".to_string()));
        }
        Ok(AttachOutcome::Attached)
    }

    async fn detach(&self, _stream_id: &str) {}

    async fn detach_all(&self) {
        self.detached_all.store(true, Ordering::SeqCst);
    }

    async fn stop_and_flush(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.flushes.lock().unwrap().push(tx);
        rx
    }

    fn duration_seconds(&self) -> f64 {
        0.0
    }

    fn output_path(&self) -> &Path {
        &self.output_path
    }
}

#[derive(Default)]
pub struct StuckEngineFactory {
    pub fail_attach: bool,
    engines: Mutex<Vec<Arc<StuckEngine>>>,
}

impl StuckEngineFactory {
    /// Factory whose engines refuse every stream
    pub fn failing() -> Self {
        Self {
            fail_attach: true,
            engines: Mutex::new(Vec::new()),
        }
    }

    pub fn engines(&self) -> Vec<Arc<StuckEngine>> {
        self.engines.lock().unwrap().clone()
    }
}

impl CompositionEngineFactory for StuckEngineFactory {
    fn create(
        &self,
        _session: &Session,
        output_path: PathBuf,
    ) -> Result<Arc<dyn CompositionEngine>, EngineError> {
        let engine = Arc::new(StuckEngine {
            output_path,
            fail_attach: self.fail_attach,
            flushes: Mutex::new(Vec::new()),
            detached_all: AtomicBool::new(false),
        });
        self.engines.lock().unwrap().push(Arc::clone(&engine));
        Ok(engine)
    }
}
