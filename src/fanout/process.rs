//! Child-process workers
//!
//! The coordinator writes a worker's chunk to its stdin as one JSON array and
//! closes stdin. The worker answers with newline-delimited JSON
//! [`WorkerMessage`]s on stdout; its logs go to stderr.

use crate::fanout::launcher::{WorkerHandle, WorkerLauncher};
use crate::fanout::{WorkerMessage, WorkerOutcome};
use crate::model::WorkItem;
use crate::HarvestError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

/// Launches `<program> [args...] worker --worker-id <N>` per chunk
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Adds an argument placed before the `worker` subcommand
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Launches copies of the running executable with the same config file
    pub fn current_exe(config_path: &Path) -> Result<Self, HarvestError> {
        let exe = std::env::current_exe()?;
        Ok(Self::new(exe).arg("--config").arg(config_path))
    }
}

impl WorkerLauncher<WorkItem> for ProcessLauncher {
    fn launch(
        &self,
        worker_id: usize,
        chunk: Vec<WorkItem>,
        results: mpsc::Sender<WorkerMessage>,
    ) -> Result<WorkerHandle, HarvestError> {
        let payload = serde_json::to_vec(&chunk)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("worker")
            .arg("--worker-id")
            .arg(worker_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| HarvestError::Worker {
            worker_id,
            message: "stdin was not captured".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| HarvestError::Worker {
            worker_id,
            message: "stdout was not captured".to_string(),
        })?;

        tracing::debug!(
            "Launched worker {} (pid {:?}) with {} items",
            worker_id,
            child.id(),
            chunk.len()
        );

        let relay = tokio::spawn(relay(worker_id, stdin, payload, stdout, results));
        Ok(WorkerHandle::process(worker_id, child, relay))
    }
}

/// Feeds the chunk to the child and forwards its messages
///
/// Sends a crash marker when stdout ends before the child's own end marker.
async fn relay(
    worker_id: usize,
    mut stdin: ChildStdin,
    payload: Vec<u8>,
    stdout: ChildStdout,
    results: mpsc::Sender<WorkerMessage>,
) {
    if let Err(e) = write_chunk(&mut stdin, &payload).await {
        tracing::warn!("Failed to send chunk to worker {}: {}", worker_id, e);
    }
    drop(stdin);

    let mut lines = BufReader::new(stdout).lines();
    let mut finished = false;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to read from worker {}: {}", worker_id, e);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let message: WorkerMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Worker {} sent an unreadable message: {}", worker_id, e);
                continue;
            }
        };

        if matches!(message, WorkerMessage::Finished { .. }) {
            finished = true;
        }
        if results.send(message).await.is_err() {
            return;
        }
    }

    if !finished {
        let marker = WorkerMessage::Finished {
            worker_id,
            outcome: WorkerOutcome::Crashed {
                reason: "exited without an end marker".to_string(),
            },
        };
        let _ = results.send(marker).await;
    }
}

async fn write_chunk(stdin: &mut ChildStdin, payload: &[u8]) -> std::io::Result<()> {
    stdin.write_all(payload).await?;
    stdin.flush().await?;
    stdin.shutdown().await
}
