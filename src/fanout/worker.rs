//! Worker side of the child-process protocol
//!
//! A worker reads its whole chunk from `input`, runs it through its own work
//! queue and detail pool, and writes one batch line per record followed by a
//! single end marker to `output`.

use crate::config::WorkerConfig;
use crate::fanout::{WorkerMessage, WorkerOutcome};
use crate::model::WorkItem;
use crate::pipeline::{DetailPool, DetailStage, Envelope, Politeness, WorkQueue};
use crate::HarvestError;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Parallelism inside one worker process
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub detail_workers: usize,
    pub queue_capacity: usize,
    pub politeness: Politeness,
}

impl WorkerSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            detail_workers: config.detail_workers(),
            queue_capacity: config.work_queue_capacity,
            politeness: Politeness::from_config(config),
        }
    }
}

/// Processes one chunk and writes the resulting messages
///
/// An empty input reads as an empty chunk. Returns the number of records
/// written.
pub async fn serve<R, W>(
    worker_id: usize,
    stage: Arc<DetailStage>,
    settings: WorkerSettings,
    cancel: CancellationToken,
    mut input: R,
    mut output: W,
) -> Result<usize, HarvestError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut raw = Vec::new();
    input.read_to_end(&mut raw).await?;
    let items: Vec<WorkItem> = if raw.iter().all(u8::is_ascii_whitespace) {
        Vec::new()
    } else {
        serde_json::from_slice(&raw)?
    };
    tracing::info!("Worker {} received {} items", worker_id, items.len());

    let work = WorkQueue::bounded(settings.queue_capacity);
    let persist = WorkQueue::bounded(settings.queue_capacity);
    let pool = DetailPool::spawn(
        settings.detail_workers,
        stage,
        work.clone(),
        persist.clone(),
        settings.politeness,
        cancel.clone(),
    );

    let feeder = {
        let work = work.clone();
        let persist = persist.clone();
        tokio::spawn(async move {
            for item in items {
                let put = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    put = work.put(item) => put,
                };
                if put.is_err() {
                    break;
                }
            }

            if !cancel.is_cancelled() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = work.join() => {}
                }
            }
            if !cancel.is_cancelled() {
                if let Err(e) = work.close(pool.workers()).await {
                    tracing::warn!("Failed to signal detail workers: {}", e);
                }
            }

            let report = pool.join().await;
            if let Err(e) = persist.close(1).await {
                tracing::warn!("Failed to signal end of records: {}", e);
            }
            report
        })
    };

    let mut processed = 0;
    while let Envelope::Item(record) = persist.get().await {
        let batch = WorkerMessage::Batch {
            worker_id,
            records: vec![record],
        };
        write_message(&mut output, &batch).await?;
        persist.task_done();
        processed += 1;
    }

    let report = feeder.await?;
    tracing::info!(
        "Worker {} finished: {} records, {} unavailable, {} dropped",
        worker_id,
        report.processed,
        report.unavailable,
        report.dropped
    );

    let marker = WorkerMessage::Finished {
        worker_id,
        outcome: WorkerOutcome::Completed { processed },
    };
    write_message(&mut output, &marker).await?;

    Ok(processed)
}

/// Writes one message as a JSON line and flushes it
pub async fn write_message<W>(output: &mut W, message: &WorkerMessage) -> Result<(), HarvestError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await?;
    Ok(())
}
