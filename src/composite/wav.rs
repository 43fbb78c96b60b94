use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{AttachOutcome, CompositionEngine, CompositionEngineFactory, EngineError};
use crate::audio::{AudioFrame, MixerConfig, StreamMixer, WavTrackWriter};
use crate::session::{PublisherStream, Session};

/// Messages consumed by the mixing task
enum MixerInput {
    Attach(String),
    Frame(String, AudioFrame),
    Detach(String),
    Stop(oneshot::Sender<()>),
}

#[derive(Default)]
struct EngineState {
    /// Present while the recorder runs
    mixer_tx: Option<mpsc::Sender<MixerInput>>,
    /// One forwarding task per attached stream
    forwarders: HashMap<String, JoinHandle<()>>,
    stopped: bool,
}

/// Composition engine mixing the participants' audio into a WAV file
pub struct WavCompositeEngine {
    session_id: String,
    output_path: PathBuf,
    config: MixerConfig,
    state: Mutex<EngineState>,
    /// Milliseconds of audio written, updated by the mixing task
    duration_ms: Arc<AtomicU64>,
}

impl WavCompositeEngine {
    pub fn new(session_id: impl Into<String>, output_path: PathBuf, config: MixerConfig) -> Self {
        Self {
            session_id: session_id.into(),
            output_path,
            config,
            state: Mutex::new(EngineState::default()),
            duration_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of streams currently attached
    pub async fn attached_count(&self) -> usize {
        self.state.lock().await.forwarders.len()
    }

    /// Spawn the mixing task; the WAV file is created by the task itself
    async fn start_recorder(&self) -> Result<mpsc::Sender<MixerInput>, EngineError> {
        if let Some(parent) = self.output_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::RecorderStart(format!("{:?}: {}", parent, e)))?;
        }

        let (tx, rx) = mpsc::channel(256);
        let mixer = StreamMixer::new(self.config.clone());
        let output_path = self.output_path.clone();
        let duration_ms = Arc::clone(&self.duration_ms);
        let session_id = self.session_id.clone();

        tokio::spawn(async move {
            if let Err(e) = run_mixer(rx, mixer, &output_path, duration_ms).await {
                error!("Composite recorder of session {} failed: {:#}", session_id, e);
            }
        });

        info!(
            "Composite recorder starting for session {} ({:?})",
            self.session_id, self.output_path
        );

        Ok(tx)
    }
}

#[async_trait::async_trait]
impl CompositionEngine for WavCompositeEngine {
    async fn attach(&self, stream: &PublisherStream) -> Result<AttachOutcome, EngineError> {
        let mut state = self.state.lock().await;
        if state.stopped {
            return Err(EngineError::Stopped(self.session_id.clone()));
        }

        let stream_id = stream.stream_id().to_string();
        if state.forwarders.contains_key(&stream_id) {
            return Ok(AttachOutcome::Attached);
        }

        let running = state.mixer_tx.clone();
        let (tx, outcome) = match running {
            Some(tx) if tx.is_closed() => {
                return Err(EngineError::RecorderStart(
                    "recorder is no longer running".to_string(),
                ))
            }
            Some(tx) => (tx, AttachOutcome::Attached),
            None => {
                let tx = self.start_recorder().await?;
                state.mixer_tx = Some(tx.clone());
                (tx, AttachOutcome::RecorderPending)
            }
        };

        tx.send(MixerInput::Attach(stream_id.clone()))
            .await
            .map_err(|_| EngineError::RecorderStart("recorder is no longer running".to_string()))?;

        let rx = stream.subscribe();
        let forwarder = tokio::spawn(forward_stream(stream_id.clone(), rx, tx));
        state.forwarders.insert(stream_id.clone(), forwarder);

        info!(
            "Joined stream {} to composite of session {}",
            stream_id, self.session_id
        );

        Ok(outcome)
    }

    async fn detach(&self, stream_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(forwarder) = state.forwarders.remove(stream_id) {
            forwarder.abort();
            if let Some(tx) = &state.mixer_tx {
                let _ = tx.send(MixerInput::Detach(stream_id.to_string())).await;
            }
            info!(
                "Removed stream {} from composite of session {}",
                stream_id, self.session_id
            );
        }
    }

    async fn detach_all(&self) {
        let mut state = self.state.lock().await;
        let forwarders: Vec<_> = state.forwarders.drain().collect();

        for (stream_id, forwarder) in forwarders {
            forwarder.abort();
            if let Some(tx) = &state.mixer_tx {
                let _ = tx.send(MixerInput::Detach(stream_id.clone())).await;
            }
            debug!(
                "Removed stream {} from composite of session {}",
                stream_id, self.session_id
            );
        }
    }

    async fn stop_and_flush(&self) -> oneshot::Receiver<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let mut state = self.state.lock().await;
        state.stopped = true;

        match state.mixer_tx.take() {
            Some(tx) => {
                // A dead mixer drops `done_tx` along with the message
                if tx.send(MixerInput::Stop(done_tx)).await.is_err() {
                    warn!(
                        "Composite recorder of session {} was not running when stopped",
                        self.session_id
                    );
                }
            }
            None => {
                // Nothing was ever recorded
                let _ = done_tx.send(());
            }
        }

        done_rx
    }

    fn duration_seconds(&self) -> f64 {
        self.duration_ms.load(Ordering::SeqCst) as f64 / 1000.0
    }

    fn output_path(&self) -> &Path {
        &self.output_path
    }
}

/// Forward frames of one publisher into the mixer until detached
async fn forward_stream(
    stream_id: String,
    mut rx: broadcast::Receiver<AudioFrame>,
    tx: mpsc::Sender<MixerInput>,
) {
    loop {
        match rx.recv().await {
            Ok(frame) => {
                if tx
                    .send(MixerInput::Frame(stream_id.clone(), frame))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Stream {} lagged, {} frames skipped", stream_id, skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("Forwarding of stream {} finished", stream_id);
}

async fn run_mixer(
    mut rx: mpsc::Receiver<MixerInput>,
    mut mixer: StreamMixer,
    output_path: &Path,
    duration_ms: Arc<AtomicU64>,
) -> anyhow::Result<()> {
    let config = mixer.config().clone();
    let mut writer = WavTrackWriter::create(output_path, config.sample_rate, config.channels)?;
    info!("Composite recorder started: {:?}", writer.path());

    let mut done = None;
    while let Some(input) = rx.recv().await {
        match input {
            MixerInput::Attach(stream_id) => mixer.add_stream(&stream_id),
            MixerInput::Detach(stream_id) => mixer.remove_stream(&stream_id),
            MixerInput::Frame(stream_id, frame) => {
                mixer.push(&stream_id, frame);
                while let Some(mixed) = mixer.next_ready()? {
                    writer.write_frame(&mixed)?;
                }
                duration_ms.store((writer.duration_seconds() * 1000.0) as u64, Ordering::SeqCst);
            }
            MixerInput::Stop(done_tx) => {
                done = Some(done_tx);
                break;
            }
        }
    }

    for mixed in mixer.flush()? {
        writer.write_frame(&mixed)?;
    }
    let duration = writer.finish()?;
    duration_ms.store((duration * 1000.0) as u64, Ordering::SeqCst);

    info!(
        "Composite recorder finished: {:?} ({:.1}s)",
        output_path, duration
    );

    if let Some(done_tx) = done {
        let _ = done_tx.send(());
    }

    Ok(())
}

/// Creates a `WavCompositeEngine` per session
#[derive(Debug, Clone, Default)]
pub struct WavEngineFactory {
    pub mixer: MixerConfig,
}

impl CompositionEngineFactory for WavEngineFactory {
    fn create(
        &self,
        session: &Session,
        output_path: PathBuf,
    ) -> Result<Arc<dyn CompositionEngine>, EngineError> {
        Ok(Arc::new(WavCompositeEngine::new(
            session.session_id.clone(),
            output_path,
            self.mixer.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn frame(value: i16, timestamp_ms: u64) -> AudioFrame {
        AudioFrame::new(vec![value; 1600], 16000, 1, timestamp_ms)
    }

    #[tokio::test]
    async fn test_first_attach_starts_recorder() {
        let dir = TempDir::new().unwrap();
        let engine = WavCompositeEngine::new(
            "ses",
            dir.path().join("ses/audio.wav"),
            MixerConfig::default(),
        );

        let alice = PublisherStream::new("str_alice");
        let bob = PublisherStream::new("str_bob");

        assert_eq!(
            engine.attach(&alice).await.unwrap(),
            AttachOutcome::RecorderPending
        );
        assert_eq!(engine.attach(&bob).await.unwrap(), AttachOutcome::Attached);
        assert_eq!(engine.attach(&bob).await.unwrap(), AttachOutcome::Attached);
        assert_eq!(engine.attached_count().await, 2);
        assert_eq!(alice.subscriber_count(), 1);

        engine.detach("str_bob").await;
        assert_eq!(engine.attached_count().await, 1);
    }

    #[tokio::test]
    async fn test_records_and_flushes() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("ses/audio.wav");
        let engine = WavCompositeEngine::new("ses", output.clone(), MixerConfig::default());

        let alice = PublisherStream::new("str_alice");
        engine.attach(&alice).await.unwrap();

        // Give the forwarder a chance to subscribe before publishing
        tokio::time::sleep(Duration::from_millis(20)).await;
        for i in 0..10 {
            alice.publish(frame(100, i * 100));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let done = engine.stop_and_flush().await;
        tokio::time::timeout(Duration::from_secs(5), done)
            .await
            .expect("engine should flush")
            .unwrap();
        engine.detach_all().await;

        assert!((engine.duration_seconds() - 1.0).abs() < 0.01);
        let reader = hound::WavReader::open(&output).unwrap();
        assert_eq!(reader.len(), 16000);

        assert!(matches!(
            engine.attach(&alice).await,
            Err(EngineError::Stopped(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_without_streams() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("ses/audio.wav");
        let engine = WavCompositeEngine::new("ses", output.clone(), MixerConfig::default());

        engine.stop_and_flush().await.await.unwrap();
        assert_eq!(engine.duration_seconds(), 0.0);
        assert!(!output.exists());
    }
}
