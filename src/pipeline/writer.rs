//! Single writer draining the persistence queue
//!
//! All storage mutation goes through one writer running on a dedicated
//! blocking thread, so records are committed one at a time in dequeue order.

use crate::model::Record;
use crate::pipeline::queue::{Envelope, WorkQueue};
use crate::storage::{RecordStore, UpsertOutcome, WriterReport};
use crate::HarvestError;
use tokio::task::JoinHandle;

/// Persists records through a [`RecordStore`]
pub struct Writer<S> {
    store: S,
    report: WriterReport,
}

impl<S: RecordStore + 'static> Writer<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            report: WriterReport::default(),
        }
    }

    /// Writes one record and counts its outcome
    pub fn write(&mut self, record: &Record) {
        match self.store.upsert(record) {
            UpsertOutcome::Inserted => {
                self.report.inserted += 1;
                tracing::debug!("Stored {}", record.natural_key);
            }
            UpsertOutcome::AlreadyExists => {
                self.report.already_existed += 1;
                tracing::info!("Record {} already stored, skipping", record.natural_key);
            }
            UpsertOutcome::Fault(reason) => {
                self.report.faults += 1;
                tracing::error!("Failed to store {}: {}", record.natural_key, reason);
            }
        }
    }

    /// Writes a finished record list in order
    pub fn write_all(mut self, records: &[Record]) -> (S, WriterReport) {
        for record in records {
            self.write(record);
        }
        self.finish()
    }

    /// Drains `queue` until its end-of-stream sentinel
    ///
    /// Blocks the calling thread; use [`spawn`](Self::spawn) from async code.
    pub fn run(mut self, queue: &WorkQueue<Record>) -> (S, WriterReport) {
        while let Envelope::Item(record) = queue.get_blocking() {
            self.write(&record);
            queue.task_done();
        }
        self.finish()
    }

    /// Runs the writer on a blocking thread
    pub fn spawn(self, queue: WorkQueue<Record>) -> WriterHandle<S> {
        WriterHandle {
            handle: tokio::task::spawn_blocking(move || self.run(&queue)),
        }
    }

    fn finish(self) -> (S, WriterReport) {
        tracing::info!(
            "Writer finished: {} inserted, {} already stored, {} faults",
            self.report.inserted,
            self.report.already_existed,
            self.report.faults
        );
        (self.store, self.report)
    }
}

/// Handle to a writer running on its own thread
pub struct WriterHandle<S> {
    handle: JoinHandle<(S, WriterReport)>,
}

impl<S> WriterHandle<S> {
    /// Waits for the writer to see its sentinel and returns the store
    pub async fn join(self) -> Result<(S, WriterReport), HarvestError> {
        Ok(self.handle.await?)
    }
}
