//! Runtime that hosts recorder processes
//!
//! The recording service only needs a handful of primitives from the runtime:
//! launch a named process, ask it to finish gracefully, wait for it to exit,
//! force it to stop and forget about it.

pub mod local;

use std::path::PathBuf;
use tokio::sync::oneshot;

pub use local::LocalProcessRuntime;

/// Identifies a launched recorder process
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    /// Runtime id of the process
    pub id: String,
    /// Logical name it was launched under ("recording_<recordingId>")
    pub name: String,
}

/// Host directory mounted into the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBind {
    pub host_path: PathBuf,
    pub container_path: String,
}

/// Everything needed to launch a recorder process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub name: String,
    pub image: String,
    /// "KEY=value" entries
    pub env: Vec<String>,
    pub volume: VolumeBind,
    pub network_mode: String,
}

impl LaunchSpec {
    /// Value of an environment entry
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Another process already uses the name, e.g. a republishing participant
    /// racing a previous recorder
    #[error("The process name {0} is already in use")]
    NameConflict(String),

    #[error("Recorder image {0} couldn't be found")]
    ImageNotFound(String),

    #[error("No process with id {0}")]
    NotFound(String),

    #[error("Runtime Error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Primitives offered by the process runtime
#[async_trait::async_trait]
pub trait ProcessRuntime: Send + Sync {
    /// Launch a process; fails on a name collision or a missing image
    async fn launch(&self, spec: LaunchSpec) -> Result<ProcessHandle, RuntimeError>;

    /// Ask the process to finish its output and exit on its own
    async fn exec_graceful(&self, handle: &ProcessHandle) -> Result<(), RuntimeError>;

    /// One-shot signal fired once the process has exited
    async fn wait_for_exit(
        &self,
        handle: &ProcessHandle,
    ) -> Result<oneshot::Receiver<()>, RuntimeError>;

    /// Force the process to stop
    async fn stop(&self, handle: &ProcessHandle) -> Result<(), RuntimeError>;

    /// Release everything the runtime keeps for the process
    async fn remove(&self, handle: &ProcessHandle) -> Result<(), RuntimeError>;
}
