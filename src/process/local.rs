// Process runtime running recorders as local child processes
//
// The "image" of a launch spec is the recorder executable. It runs with the
// launch environment, inside the bound recordings directory, and finishes
// gracefully when it reads "q" on stdin (the ffmpeg convention). A
// supervisor task owns each child and publishes its exit on a watch channel.

use anyhow::{anyhow, Context};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tracing::{error, info, warn};

use super::{LaunchSpec, ProcessHandle, ProcessRuntime, RuntimeError};

struct LocalProcess {
    name: String,
    stdin: Mutex<Option<ChildStdin>>,
    /// Dropping the sender kills the child as well
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    exited: watch::Receiver<bool>,
}

impl LocalProcess {
    fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }
}

/// Runs recorder processes on the local host
#[derive(Default)]
pub struct LocalProcessRuntime {
    processes: RwLock<HashMap<String, Arc<LocalProcess>>>,
}

impl LocalProcessRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of processes known to the runtime (running or not yet removed)
    pub async fn process_count(&self) -> usize {
        self.processes.read().await.len()
    }

    async fn get(&self, handle: &ProcessHandle) -> Result<Arc<LocalProcess>, RuntimeError> {
        self.processes
            .read()
            .await
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(handle.id.clone()))
    }
}

#[async_trait::async_trait]
impl ProcessRuntime for LocalProcessRuntime {
    async fn launch(&self, spec: LaunchSpec) -> Result<ProcessHandle, RuntimeError> {
        // Hold the write lock so two launches can't race on the same name
        let mut processes = self.processes.write().await;

        if processes.values().any(|p| p.name == spec.name && !p.has_exited()) {
            error!(
                "The process name {} is already in use. Probably caused by a session with unique publisher re-publishing a stream",
                spec.name
            );
            return Err(RuntimeError::NameConflict(spec.name));
        }

        tokio::fs::create_dir_all(&spec.volume.host_path)
            .await
            .with_context(|| format!("Failed to create {:?}", spec.volume.host_path))?;

        let mut command = Command::new(&spec.image);
        command
            .envs(spec.env.iter().filter_map(|entry| entry.split_once('=')))
            .env("RECORDINGS_PATH", &spec.volume.host_path)
            .current_dir(&spec.volume.host_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                error!("Recorder image {} couldn't be found in host", spec.image);
                RuntimeError::ImageNotFound(spec.image.clone())
            } else {
                RuntimeError::Other(anyhow!(e).context("Failed to spawn recorder process"))
            }
        })?;

        let id = uuid::Uuid::new_v4().to_string();
        let stdin = child.stdin.take();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(false);

        let name = spec.name.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill recorder process {}: {}", name, e);
                    }
                    child.wait().await
                }
            };

            match status {
                Ok(status) => info!("Recorder process {} exited with {}", name, status),
                Err(e) => warn!("Failed to wait for recorder process {}: {}", name, e),
            }

            let _ = exit_tx.send(true);
        });

        processes.insert(
            id.clone(),
            Arc::new(LocalProcess {
                name: spec.name.clone(),
                stdin: Mutex::new(stdin),
                kill_tx: Mutex::new(Some(kill_tx)),
                exited: exit_rx,
            }),
        );

        info!("Launched recorder process {} ({})", spec.name, id);

        Ok(ProcessHandle {
            id,
            name: spec.name,
        })
    }

    async fn exec_graceful(&self, handle: &ProcessHandle) -> Result<(), RuntimeError> {
        let process = self.get(handle).await?;

        let stdin = process.stdin.lock().await.take();
        if let Some(mut stdin) = stdin {
            stdin
                .write_all(b"q\n")
                .await
                .context("Failed to send stop command")?;
            stdin.flush().await.context("Failed to send stop command")?;
        }

        Ok(())
    }

    async fn wait_for_exit(
        &self,
        handle: &ProcessHandle,
    ) -> Result<oneshot::Receiver<()>, RuntimeError> {
        let process = self.get(handle).await?;
        let mut exited = process.exited.clone();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            if exited.wait_for(|exited| *exited).await.is_ok() {
                let _ = tx.send(());
            }
        });

        Ok(rx)
    }

    async fn stop(&self, handle: &ProcessHandle) -> Result<(), RuntimeError> {
        let process = self.get(handle).await?;

        if let Some(kill_tx) = process.kill_tx.lock().await.take() {
            let _ = kill_tx.send(());
        }

        let mut exited = process.exited.clone();
        let _ = exited.wait_for(|exited| *exited).await;

        Ok(())
    }

    async fn remove(&self, handle: &ProcessHandle) -> Result<(), RuntimeError> {
        match self.processes.write().await.remove(&handle.id) {
            Some(process) => {
                if !process.has_exited() {
                    warn!("Removing recorder process {} while it is still running", process.name);
                }
                Ok(())
            }
            None => Err(RuntimeError::NotFound(handle.id.clone())),
        }
    }
}
