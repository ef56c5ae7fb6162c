//! Worker launchers and handles
//!
//! A launcher starts one isolated worker over one chunk and gives back a
//! [`WorkerHandle`]. Whatever happens inside the worker, exactly one
//! [`WorkerMessage::Finished`] marker reaches the result channel for it.

use crate::fanout::{WorkerMessage, WorkerOutcome};
use crate::model::Record;
use crate::HarvestError;
use std::future::Future;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinError, JoinHandle};

/// Starts isolated workers over chunks of `T`
pub trait WorkerLauncher<T> {
    /// Launches worker `worker_id` over `chunk`, reporting on `results`
    fn launch(
        &self,
        worker_id: usize,
        chunk: Vec<T>,
        results: mpsc::Sender<WorkerMessage>,
    ) -> Result<WorkerHandle, HarvestError>;
}

enum Running {
    Task {
        supervisor: JoinHandle<()>,
        body: AbortHandle,
    },
    Process {
        child: Child,
        relay: JoinHandle<()>,
    },
}

/// A launched worker that still has to be reaped
pub struct WorkerHandle {
    worker_id: usize,
    running: Running,
}

impl WorkerHandle {
    /// Wraps a task worker: the supervisor reports the body's outcome
    pub fn task(worker_id: usize, supervisor: JoinHandle<()>, body: AbortHandle) -> Self {
        Self {
            worker_id,
            running: Running::Task { supervisor, body },
        }
    }

    /// Wraps a child process and the task relaying its stdout
    pub fn process(worker_id: usize, child: Child, relay: JoinHandle<()>) -> Self {
        Self {
            worker_id,
            running: Running::Process { child, relay },
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Waits up to `grace` for the worker to exit, then terminates it
    ///
    /// Returns true if the worker exited on its own.
    pub async fn reap(self, grace: Duration) -> bool {
        let worker_id = self.worker_id;

        match self.running {
            Running::Task { supervisor, body } => {
                let supervisor_abort = supervisor.abort_handle();
                if tokio::time::timeout(grace, supervisor).await.is_ok() {
                    return true;
                }

                tracing::warn!(
                    "Worker {} still running after {:?}, aborting",
                    worker_id,
                    grace
                );
                body.abort();
                supervisor_abort.abort();
                false
            }
            Running::Process { mut child, relay } => {
                let relay_abort = relay.abort_handle();

                match tokio::time::timeout(grace, child.wait()).await {
                    Ok(Ok(status)) => {
                        if !status.success() {
                            tracing::warn!("Worker {} exited with {}", worker_id, status);
                        }
                        if tokio::time::timeout(grace, relay).await.is_err() {
                            relay_abort.abort();
                        }
                        true
                    }
                    Ok(Err(e)) => {
                        tracing::warn!("Failed to wait for worker {}: {}", worker_id, e);
                        relay_abort.abort();
                        true
                    }
                    Err(_) => {
                        tracing::warn!(
                            "Worker {} still running after {:?}, killing",
                            worker_id,
                            grace
                        );
                        if let Err(e) = child.kill().await {
                            tracing::warn!("Failed to kill worker {}: {}", worker_id, e);
                        }
                        relay_abort.abort();
                        false
                    }
                }
            }
        }
    }
}

/// Runs each chunk on its own tokio task, one record at a time
///
/// `per_item` returning `None` drops the item. Every produced record is
/// flushed as its own batch, so a crash loses at most the item in flight.
#[derive(Clone)]
pub struct TaskLauncher<F> {
    per_item: F,
}

impl<F> TaskLauncher<F> {
    pub fn new(per_item: F) -> Self {
        Self { per_item }
    }
}

impl<T, F, Fut> WorkerLauncher<T> for TaskLauncher<F>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Option<Record>> + Send + 'static,
{
    fn launch(
        &self,
        worker_id: usize,
        chunk: Vec<T>,
        results: mpsc::Sender<WorkerMessage>,
    ) -> Result<WorkerHandle, HarvestError> {
        let per_item = self.per_item.clone();
        let batches = results.clone();

        let body = tokio::spawn(async move {
            let mut processed = 0;
            for item in chunk {
                let record = match per_item(item).await {
                    Some(record) => record,
                    None => continue,
                };

                let batch = WorkerMessage::Batch {
                    worker_id,
                    records: vec![record],
                };
                if batches.send(batch).await.is_err() {
                    tracing::warn!("Worker {} lost its result channel", worker_id);
                    break;
                }
                processed += 1;
            }
            processed
        });
        let body_abort = body.abort_handle();

        let supervisor = tokio::spawn(async move {
            let outcome = match body.await {
                Ok(processed) => WorkerOutcome::Completed { processed },
                Err(e) => WorkerOutcome::Crashed {
                    reason: crash_reason(e),
                },
            };

            let _ = results
                .send(WorkerMessage::Finished { worker_id, outcome })
                .await;
        });

        Ok(WorkerHandle::task(worker_id, supervisor, body_abort))
    }
}

fn crash_reason(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }

    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Attributes;

    fn record(n: u32) -> Record {
        Record {
            natural_key: format!("item-{}", n),
            attributes: Attributes::new(),
            group_label: "Tools".to_string(),
        }
    }

    #[tokio::test]
    async fn test_task_worker_flushes_per_item_then_finishes() {
        let launcher = TaskLauncher::new(|n: u32| async move { Some(record(n)) });
        let (tx, mut rx) = mpsc::channel(8);

        let handle = launcher.launch(7, vec![1, 2, 3], tx).unwrap();

        let mut batches = 0;
        loop {
            match rx.recv().await.unwrap() {
                WorkerMessage::Batch { worker_id, records } => {
                    assert_eq!(worker_id, 7);
                    assert_eq!(records.len(), 1);
                    batches += 1;
                }
                WorkerMessage::Finished { worker_id, outcome } => {
                    assert_eq!(worker_id, 7);
                    assert_eq!(outcome, WorkerOutcome::Completed { processed: 3 });
                    break;
                }
            }
        }
        assert_eq!(batches, 3);
        assert!(handle.reap(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_panic_becomes_crash_marker() {
        let launcher = TaskLauncher::new(|n: u32| async move {
            if n == 2 {
                panic!("bad item");
            }
            Some(record(n))
        });
        let (tx, mut rx) = mpsc::channel(8);
        let handle = launcher.launch(0, vec![1, 2, 3], tx).unwrap();

        let mut kept = Vec::new();
        let outcome = loop {
            match rx.recv().await.unwrap() {
                WorkerMessage::Batch { records, .. } => kept.extend(records),
                WorkerMessage::Finished { outcome, .. } => break outcome,
            }
        };

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].natural_key, "item-1");
        match outcome {
            WorkerOutcome::Crashed { reason } => assert!(reason.contains("bad item")),
            other => panic!("expected crash, got {:?}", other),
        }
        assert!(handle.reap(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_reap_aborts_stuck_worker() {
        let launcher = TaskLauncher::new(|n: u32| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Some(record(n))
        });
        let (tx, _rx) = mpsc::channel(8);
        let handle = launcher.launch(0, vec![1], tx).unwrap();

        assert!(!handle.reap(Duration::from_millis(20)).await);
    }
}
