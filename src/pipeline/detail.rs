//! Detail stage and its worker pool
//!
//! Every work item becomes exactly one record. A detail page that cannot be
//! fetched or yields nothing still produces a record, with every detail
//! field marked unavailable. Only cancellation drops an item, and the drop is
//! logged.

use crate::config::WorkerConfig;
use crate::extract::{Extraction, PageExtractor, PageKind};
use crate::fetch::{FailureReason, FetchClient, FetchResult};
use crate::model::{Record, WorkItem};
use crate::pipeline::queue::{Envelope, WorkQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Fetches a detail page and merges its attributes onto a work item
pub struct DetailStage {
    fetch: FetchClient,
    extractor: Arc<dyn PageExtractor>,
}

impl DetailStage {
    pub fn new(fetch: FetchClient, extractor: Arc<dyn PageExtractor>) -> Self {
        Self { fetch, extractor }
    }

    /// Enriches one work item
    ///
    /// Returns `None` only when the fetch was cancelled.
    pub async fn enrich(&self, item: &WorkItem) -> Option<Record> {
        let fields = self.extractor.detail_fields();

        let (content, final_url) = match self.fetch.fetch(&item.source_url).await {
            Ok(FetchResult::Success { content, url, .. }) => (content, url),
            Ok(FetchResult::Failure {
                reason: FailureReason::Cancelled,
                ..
            }) => return None,
            Ok(FetchResult::Failure { reason, attempts }) => {
                tracing::warn!(
                    "Detail page {} unavailable after {} attempts: {}",
                    item.source_url,
                    attempts,
                    reason
                );
                return Some(Record::unavailable(item, fields));
            }
            Err(e) => {
                tracing::warn!("Skipping detail fetch for {}: {}", item.identifier, e);
                return Some(Record::unavailable(item, fields));
            }
        };

        let page_url = match Url::parse(&final_url).or_else(|_| Url::parse(&item.source_url)) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Cannot resolve detail URL {}: {}", item.source_url, e);
                return Some(Record::unavailable(item, fields));
            }
        };

        match self.extractor.extract(&content, &page_url, PageKind::Detail) {
            Extraction::Detail(attributes) => Some(Record::from_item(item, fields, Some(attributes))),
            _ => {
                tracing::warn!("No detail data found on {}", item.source_url);
                Some(Record::unavailable(item, fields))
            }
        }
    }
}

/// Randomized pause between detail fetches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Politeness {
    min: Duration,
    max: Duration,
}

impl Politeness {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            Duration::from_millis(config.politeness_min_ms),
            Duration::from_millis(config.politeness_max_ms),
        )
    }

    /// Picks the next pause, or `None` when pausing is disabled
    pub fn next_pause(&self) -> Option<Duration> {
        if self.max.is_zero() {
            return None;
        }

        let min = u64::try_from(self.min.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        Some(Duration::from_millis(fastrand::u64(min..=max)))
    }
}

/// Totals reported by the detail workers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetailReport {
    /// Records forwarded to the persistence queue
    pub processed: u64,
    /// Forwarded records holding at least one unavailable field
    pub unavailable: u64,
    /// Items dropped because of cancellation
    pub dropped: u64,
    pub workers: usize,
}

impl DetailReport {
    fn merge(&mut self, other: &DetailReport) {
        self.processed += other.processed;
        self.unavailable += other.unavailable;
        self.dropped += other.dropped;
    }
}

/// Acknowledges a received item on every exit path, including panics
struct Acknowledge<'a, T: Send>(&'a WorkQueue<T>);

impl<T: Send> Drop for Acknowledge<'_, T> {
    fn drop(&mut self) {
        self.0.task_done();
    }
}

/// A fixed set of detail workers sharing one input and one output queue
pub struct DetailPool {
    handles: Vec<JoinHandle<DetailReport>>,
}

impl DetailPool {
    /// Spawns `workers` detail workers
    ///
    /// Each worker exits on an end-of-stream sentinel, a closed input queue,
    /// or cancellation.
    pub fn spawn(
        workers: usize,
        stage: Arc<DetailStage>,
        input: WorkQueue<WorkItem>,
        output: WorkQueue<Record>,
        politeness: Politeness,
        cancel: CancellationToken,
    ) -> Self {
        let handles = (0..workers.max(1))
            .map(|id| {
                let worker = DetailWorker {
                    id,
                    stage: Arc::clone(&stage),
                    input: input.clone(),
                    output: output.clone(),
                    politeness,
                    cancel: cancel.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        Self { handles }
    }

    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    /// Waits for every worker to exit
    pub async fn join(self) -> DetailReport {
        let mut report = DetailReport {
            workers: self.handles.len(),
            ..Default::default()
        };

        for handle in self.handles {
            match handle.await {
                Ok(stats) => report.merge(&stats),
                Err(e) => tracing::error!("Detail worker panicked: {}", e),
            }
        }

        report
    }
}

struct DetailWorker {
    id: usize,
    stage: Arc<DetailStage>,
    input: WorkQueue<WorkItem>,
    output: WorkQueue<Record>,
    politeness: Politeness,
    cancel: CancellationToken,
}

impl DetailWorker {
    async fn run(self) -> DetailReport {
        let mut stats = DetailReport::default();

        loop {
            let envelope = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                envelope = self.input.get() => envelope,
            };

            let item = match envelope {
                Envelope::Item(item) => item,
                Envelope::End => break,
            };
            let ack = Acknowledge(&self.input);
            self.process(item, &mut stats).await;
            drop(ack);

            if let Some(pause) = self.politeness.next_pause() {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        tracing::debug!(
            "Detail worker {} exiting after {} records",
            self.id,
            stats.processed
        );
        stats
    }

    /// Enriches one item on its own task so that a panic in the fetch or
    /// extract step costs only that item's detail fields
    async fn enrich_isolated(&self, item: &WorkItem) -> Option<Record> {
        let stage = Arc::clone(&self.stage);
        let owned = item.clone();

        match tokio::spawn(async move { stage.enrich(&owned).await }).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    "Detail worker {} failed on {}: {}; storing it as unavailable",
                    self.id,
                    item.identifier,
                    e
                );
                Some(Record::unavailable(item, self.stage.extractor.detail_fields()))
            }
        }
    }

    async fn process(&self, item: WorkItem, stats: &mut DetailReport) {
        let record = match self.enrich_isolated(&item).await {
            Some(record) => record,
            None => {
                tracing::warn!("Dropped {}: harvest cancelled", item.identifier);
                stats.dropped += 1;
                return;
            }
        };

        let unavailable = record.has_unavailable();
        let put = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            put = self.output.put(record) => Some(put),
        };

        match put {
            Some(Ok(())) => {
                stats.processed += 1;
                if unavailable {
                    stats.unavailable += 1;
                }
            }
            Some(Err(e)) => {
                tracing::error!("Dropped {}: {}", item.identifier, e);
                stats.dropped += 1;
            }
            None => {
                tracing::warn!("Dropped {}: harvest cancelled", item.identifier);
                stats.dropped += 1;
            }
        }
    }
}
