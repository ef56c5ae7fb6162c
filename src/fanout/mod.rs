//! Process-parallel fan-out and fan-in
//!
//! The coordinator splits a finished item list into contiguous chunks, hands
//! each chunk to an isolated worker, and collects the batches the workers
//! flush back over a single result channel. A crashed worker only loses the
//! item it was working on; its siblings and the coordinator carry on.

mod launcher;
mod partition;
mod process;
mod worker;

pub use launcher::{TaskLauncher, WorkerHandle, WorkerLauncher};
pub use partition::partition;
pub use process::ProcessLauncher;
pub use worker::{serve, write_message, WorkerSettings};

use crate::model::Record;
use crate::HarvestError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

/// A message on the result channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Records flushed by a worker
    Batch {
        worker_id: usize,
        records: Vec<Record>,
    },
    /// End marker; exactly one per worker
    Finished {
        worker_id: usize,
        outcome: WorkerOutcome,
    },
}

/// How a worker ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerOutcome {
    Completed { processed: usize },
    Crashed { reason: String },
}

/// Collected results of one fan-out
#[derive(Debug, Clone, Default)]
pub struct FanOutReport {
    /// Records in arrival order
    pub records: Vec<Record>,
    pub completed: usize,
    pub crashed: usize,
    /// Workers terminated after the grace period
    pub terminated: usize,
    pub chunk_sizes: Vec<usize>,
}

/// Fan-out coordinator
#[derive(Debug, Clone)]
pub struct FanOut {
    grace: Duration,
    channel_capacity: usize,
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl FanOut {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            channel_capacity: 256,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Runs `items` across `worker_count` workers started by `launcher`
    ///
    /// Returns once every launched worker has sent its end marker (or the
    /// result channel closed) and every worker has been reaped.
    pub async fn run<T, L>(
        &self,
        items: Vec<T>,
        worker_count: usize,
        launcher: &L,
    ) -> Result<FanOutReport, HarvestError>
    where
        L: WorkerLauncher<T>,
    {
        if worker_count == 0 {
            return Err(HarvestError::Worker {
                worker_id: 0,
                message: "fan-out needs at least one worker".to_string(),
            });
        }

        let chunks = partition(items, worker_count);
        let mut report = FanOutReport {
            chunk_sizes: chunks.iter().map(Vec::len).collect(),
            ..Default::default()
        };
        tracing::info!(
            "Fanning out across {} workers, chunk sizes {:?}",
            worker_count,
            report.chunk_sizes
        );

        let (tx, mut rx) = mpsc::channel(self.channel_capacity);
        let mut handles = Vec::with_capacity(worker_count);

        for (worker_id, chunk) in chunks.into_iter().enumerate() {
            match launcher.launch(worker_id, chunk, tx.clone()) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    tracing::error!("Failed to launch worker {}: {}", worker_id, e);
                    report.crashed += 1;
                }
            }
        }
        drop(tx);

        let expected = handles.len();
        let mut finished = 0;

        while finished < expected {
            let message = match rx.recv().await {
                Some(message) => message,
                None => {
                    tracing::warn!(
                        "Result channel closed after {} of {} end markers",
                        finished,
                        expected
                    );
                    report.crashed += expected - finished;
                    break;
                }
            };

            match message {
                WorkerMessage::Batch { worker_id, records } => {
                    tracing::debug!("Worker {} flushed {} records", worker_id, records.len());
                    report.records.extend(records);
                }
                WorkerMessage::Finished { worker_id, outcome } => {
                    finished += 1;
                    match outcome {
                        WorkerOutcome::Completed { processed } => {
                            tracing::info!("Worker {} completed {} items", worker_id, processed);
                            report.completed += 1;
                        }
                        WorkerOutcome::Crashed { reason } => {
                            tracing::error!("Worker {} crashed: {}", worker_id, reason);
                            report.crashed += 1;
                        }
                    }
                }
            }
        }

        for handle in handles {
            if !handle.reap(self.grace).await {
                report.terminated += 1;
            }
        }

        tracing::info!(
            "Fan-out collected {} records ({} completed, {} crashed, {} terminated)",
            report.records.len(),
            report.completed,
            report.crashed,
            report.terminated
        );

        Ok(report)
    }
}
