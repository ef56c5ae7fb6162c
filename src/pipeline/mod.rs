//! Thread-parallel harvesting pipeline
//!
//! ```text
//! Discovery ──► work queue ──► detail workers ──► persistence queue ──► writer
//! ```
//!
//! Shutdown is join-then-signal: once discovery returns, the work queue is
//! joined, one sentinel per detail worker is pushed, the workers are joined,
//! and finally one sentinel is pushed to the writer.

mod detail;
mod discovery;
mod queue;
mod writer;

pub use detail::{DetailPool, DetailReport, DetailStage, Politeness};
pub use discovery::{group_label, page_url, Discovery, DiscoveryReport, Pagination};
pub use queue::{Envelope, WorkQueue};
pub use writer::{Writer, WriterHandle};

use crate::config::{Config, WorkerConfig};
use crate::extract::{PageExtractor, SelectorExtractor};
use crate::fetch::http_client;
use crate::model::WorkItem;
use crate::storage::{RecordStore, WriterReport};
use crate::HarvestError;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Queue sizing and worker counts of one pipeline run
#[derive(Debug, Clone, Copy)]
pub struct HarvestSettings {
    pub detail_workers: usize,
    pub work_queue_capacity: usize,
    pub persist_queue_capacity: usize,
    pub politeness: Politeness,
}

impl HarvestSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            detail_workers: config.detail_workers(),
            work_queue_capacity: config.work_queue_capacity,
            persist_queue_capacity: config.persist_queue_capacity,
            politeness: Politeness::from_config(config),
        }
    }
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

/// Totals of a complete pipeline run
#[derive(Debug, Clone, Default)]
pub struct HarvestSummary {
    pub discovery: DiscoveryReport,
    pub detail: DetailReport,
    pub writer: WriterReport,
    /// Work items left in the queue when the run was cancelled
    pub dropped: u64,
    pub cancelled: bool,
}

/// Everything a pipeline run needs, built once from configuration
pub struct Harvester {
    discovery: Discovery,
    stage: Arc<DetailStage>,
    settings: HarvestSettings,
    cancel: CancellationToken,
}

impl Harvester {
    pub fn new(
        discovery: Discovery,
        stage: Arc<DetailStage>,
        settings: HarvestSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            discovery: discovery.with_cancellation(cancel.clone()),
            stage,
            settings,
            cancel,
        }
    }

    /// Builds the HTTP-backed pipeline described by `config`
    pub fn from_config(config: &Config, cancel: CancellationToken) -> Result<Self, HarvestError> {
        let extractor: Arc<dyn PageExtractor> =
            Arc::new(SelectorExtractor::from_config(&config.selectors)?);
        let fetch = http_client(&config.fetch, cancel.clone())?;

        let discovery = Discovery::from_config(config, fetch.clone(), Arc::clone(&extractor))?;
        let stage = Arc::new(DetailStage::new(fetch, extractor));

        Ok(Self::new(
            discovery,
            stage,
            HarvestSettings::from_config(&config.workers),
            cancel,
        ))
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn stage(&self) -> Arc<DetailStage> {
        Arc::clone(&self.stage)
    }

    /// Runs discovery, enrichment and persistence into `store`
    ///
    /// A discovery failure still shuts every stage down in order before it is
    /// returned.
    pub async fn run<S: RecordStore + 'static>(&self, store: S) -> Result<HarvestSummary, HarvestError> {
        let work = WorkQueue::bounded(self.settings.work_queue_capacity);
        let persist = WorkQueue::bounded(self.settings.persist_queue_capacity);

        let writer = Writer::new(store).spawn(persist.clone());
        let pool = DetailPool::spawn(
            self.settings.detail_workers,
            Arc::clone(&self.stage),
            work.clone(),
            persist.clone(),
            self.settings.politeness,
            self.cancel.clone(),
        );
        tracing::info!("Started {} detail workers", pool.workers());

        let discovered = self.discovery.run(&work).await;

        if !self.cancel.is_cancelled() {
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = work.join() => {}
            }
        }

        let cancelled = self.cancel.is_cancelled();
        if !cancelled {
            work.close(pool.workers()).await?;
        }
        let detail = pool.join().await;

        let dropped = if cancelled { drain_dropped(&work) } else { 0 };

        persist.close(1).await?;
        let (_, written) = writer.join().await?;

        let discovery = match discovered {
            Ok(report) => report,
            Err(HarvestError::Cancelled) => DiscoveryReport::default(),
            Err(e) => return Err(e),
        };

        Ok(HarvestSummary {
            discovery,
            detail,
            writer: written,
            dropped,
            cancelled,
        })
    }
}

/// Empties a queue after cancellation, logging every dropped item
fn drain_dropped(queue: &WorkQueue<WorkItem>) -> u64 {
    let mut dropped = 0;
    while let Some(envelope) = queue.try_get() {
        if let Envelope::Item(item) = envelope {
            tracing::warn!("Dropped {}: harvest cancelled", item.identifier);
            queue.task_done();
            dropped += 1;
        }
    }
    dropped
}

/// Runs discovery to completion and returns every found item in order
pub async fn collect_work_items(
    discovery: &Discovery,
    capacity: usize,
) -> Result<(Vec<WorkItem>, DiscoveryReport), HarvestError> {
    let queue = WorkQueue::bounded(capacity);

    let collector = {
        let queue = queue.clone();
        tokio::spawn(async move {
            let mut items = Vec::new();
            while let Envelope::Item(item) = queue.get().await {
                items.push(item);
                queue.task_done();
            }
            items
        })
    };

    let discovered = discovery.run(&queue).await;
    queue.close(1).await?;
    let items = collector.await?;

    Ok((items, discovered?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelectorConfig;
    use crate::fetch::stub::StubTransport;
    use crate::fetch::{FetchClient, RetryPolicy};
    use crate::storage::MemoryStore;
    use std::time::Duration;
    use url::Url;

    const BASE: &str = "https://shop.example.com/";

    fn extractor() -> Arc<dyn PageExtractor> {
        let selectors = SelectorConfig {
            category: "nav a".to_string(),
            subcategory: "div.sub a".to_string(),
            item: "h3 a".to_string(),
            table_rows: None,
            fields: vec![crate::config::FieldConfig::text("title", "h1")],
        };
        Arc::new(SelectorExtractor::from_config(&selectors).unwrap())
    }

    fn catalog() -> StubTransport {
        StubTransport::new()
            .page(BASE, r#"<nav><a href="/c/a">A</a><a href="/c/b">B</a></nav>"#)
            .page("https://shop.example.com/c/a", "<html></html>")
            .page("https://shop.example.com/c/b", "<html></html>")
            .page(
                "https://shop.example.com/c/a?page=1",
                r#"<h3><a href="/item/1">1</a></h3><h3><a href="/item/2">2</a></h3>"#,
            )
            .page("https://shop.example.com/c/a?page=2", "<html></html>")
            .page(
                "https://shop.example.com/c/b?page=1",
                r#"<h3><a href="/item/3">3</a></h3>"#,
            )
            .page("https://shop.example.com/c/b?page=2", "<html></html>")
            .page("https://shop.example.com/item/1", "<h1>One</h1>")
            .page("https://shop.example.com/item/2", "<h1>Two</h1>")
            .page("https://shop.example.com/item/3", "<h1>Three</h1>")
    }

    fn harvester(transport: StubTransport, cancel: CancellationToken) -> Harvester {
        let fetch = FetchClient::new(
            Arc::new(transport),
            RetryPolicy::fixed(1, Duration::from_millis(1)),
        )
        .with_cancellation(cancel.clone());
        let discovery = Discovery::new(fetch.clone(), extractor(), Url::parse(BASE).unwrap());
        let stage = Arc::new(DetailStage::new(fetch, extractor()));
        let settings = HarvestSettings {
            detail_workers: 2,
            work_queue_capacity: 2,
            persist_queue_capacity: 2,
            politeness: Politeness::default(),
        };
        Harvester::new(discovery, stage, settings, cancel)
    }

    #[tokio::test]
    async fn test_every_item_becomes_one_record() {
        let store = MemoryStore::new();
        let summary = harvester(catalog(), CancellationToken::new())
            .run(store.clone())
            .await
            .unwrap();

        assert_eq!(summary.discovery.items_discovered, 3);
        assert_eq!(summary.detail.processed, 3);
        assert_eq!(summary.writer.inserted, 3);
        assert_eq!(summary.dropped, 0);
        assert!(!summary.cancelled);

        let mut titles: Vec<_> = store
            .records()
            .into_iter()
            .map(|r| r.attributes["title"].clone())
            .collect();
        titles.sort();
        assert_eq!(titles, vec!["One", "Three", "Two"]);
    }

    #[tokio::test]
    async fn test_discovery_failure_shuts_down_cleanly() {
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            harvester(StubTransport::new(), CancellationToken::new()).run(MemoryStore::new()),
        )
        .await
        .expect("pipeline should shut down");

        assert!(matches!(result, Err(HarvestError::Discovery(_))));
    }

    #[tokio::test]
    async fn test_cancelled_run_terminates() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            harvester(catalog(), cancel).run(MemoryStore::new()),
        )
        .await
        .expect("cancelled pipeline should shut down")
        .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.writer.inserted, 0);
    }

    #[tokio::test]
    async fn test_collect_work_items() {
        let fetch = FetchClient::new(
            Arc::new(catalog()),
            RetryPolicy::fixed(1, Duration::from_millis(1)),
        );
        let discovery = Discovery::new(fetch, extractor(), Url::parse(BASE).unwrap());

        let (items, report) = collect_work_items(&discovery, 1).await.unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(report.items_discovered, 3);
    }
}
