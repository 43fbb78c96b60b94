use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub nats: Option<NatsConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
}

/// Settings shared by both recording strategies
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Host directory holding one sub-directory per recording
    pub path: String,

    /// Recorder image (the executable path for the local runtime)
    pub image: String,

    /// Secret embedded in the capture URL
    pub secret: String,

    /// Public websocket URL of the media server, e.g. "wss://media.example.com:4443"
    pub public_url: String,

    /// User part of the capture URL credentials
    pub capture_user: String,

    /// Frame rate requested from the recorder process
    pub framerate: u32,

    /// Whether finished recordings get a public download URL
    pub public_access: bool,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            path: "/opt/loqa/recordings".to_string(),
            image: "loqa/composed-recorder:1.0.0".to_string(),
            secret: "MY_SECRET".to_string(),
            public_url: "wss://localhost:4443".to_string(),
            capture_user: "RECORDER".to_string(),
            framerate: 30,
            public_access: false,
        }
    }
}

impl RecordingConfig {
    /// Recordings directory with `~` and environment variables expanded
    pub fn recordings_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::full(&self.path).map_or_else(
            |_| self.path.clone(),
            |expanded| expanded.into_owned(),
        ))
    }

    /// Directory for a single recording
    pub fn recording_dir(&self, recording_id: &str) -> PathBuf {
        self.recordings_path().join(recording_id)
    }
}

/// Bounds for every wait performed while starting or stopping a recording
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Interval between checks for the recorder output file
    pub artifact_poll_interval_ms: u64,
    /// Number of checks before giving up (150 * 150ms = 22.5s)
    pub artifact_poll_attempts: u32,
    /// How long a recorder process gets to exit after the graceful signal
    pub graceful_exit_secs: u64,
    /// How long the composite engine gets to flush its output
    pub composite_stop_secs: u64,
    /// Interval between checks for a late process registration
    pub recovery_poll_interval_ms: u64,
    /// Number of checks before the recovery task gives up (30 * 500ms = 15s)
    pub recovery_poll_attempts: u32,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            artifact_poll_interval_ms: 150,
            artifact_poll_attempts: 150,
            graceful_exit_secs: 60,
            composite_stop_secs: 5,
            recovery_poll_interval_ms: 500,
            recovery_poll_attempts: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn artifact_poll_interval(&self) -> Duration {
        Duration::from_millis(self.artifact_poll_interval_ms)
    }

    pub fn graceful_exit(&self) -> Duration {
        Duration::from_secs(self.graceful_exit_secs)
    }

    pub fn composite_stop(&self) -> Duration {
        Duration::from_secs(self.composite_stop_secs)
    }

    pub fn recovery_poll_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    pub url: String,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("LOQA_RECORDING").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
