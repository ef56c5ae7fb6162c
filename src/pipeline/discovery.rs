//! Discovery stage: categories, subcategories and paginated listings
//!
//! # Pagination
//!
//! Listing pages are numbered from 1. Page `n` of a subcategory is built
//! either by setting the configured query parameter to `n` on the
//! subcategory URL, or from a relative template containing `{page}`.
//! A subcategory ends at the first page that yields no items, fails to
//! fetch, or exceeds the page cap.

use crate::config::Config;
use crate::extract::{Extraction, Link, PageExtractor, PageKind};
use crate::fetch::{FailureReason, FetchClient, FetchResult};
use crate::model::WorkItem;
use crate::pipeline::queue::WorkQueue;
use crate::HarvestError;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// How listing page URLs are derived from a subcategory URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pagination {
    /// Set this query parameter to the page number
    QueryParam(String),
    /// Join this relative template, with `{page}` replaced, onto the
    /// subcategory URL
    Template(String),
}

impl Default for Pagination {
    fn default() -> Self {
        Self::QueryParam("page".to_string())
    }
}

/// Builds the URL of listing page `page` of a subcategory
pub fn page_url(subcategory: &Url, pagination: &Pagination, page: u32) -> Result<Url, HarvestError> {
    match pagination {
        Pagination::QueryParam(param) => {
            let mut url = subcategory.clone();
            let retained: Vec<(String, String)> = subcategory
                .query_pairs()
                .filter(|(key, _)| key != param.as_str())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();

            url.query_pairs_mut()
                .clear()
                .extend_pairs(retained)
                .append_pair(param, &page.to_string());
            Ok(url)
        }
        Pagination::Template(template) => {
            let relative = template.replace("{page}", &page.to_string());
            Ok(subcategory.join(&relative)?)
        }
    }
}

/// Builds a group label from a category and subcategory label
pub fn group_label(category: &str, subcategory: &str) -> String {
    if category == subcategory {
        category.to_string()
    } else {
        format!("{} / {}", category, subcategory)
    }
}

/// Totals of one discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Categories found on the landing page
    pub categories: usize,
    /// Subcategories paginated
    pub subcategories: usize,
    /// Listing pages fetched, including the terminating one
    pub pages_fetched: usize,
    /// Work items enqueued
    pub items_discovered: usize,
    /// Subcategories cut off by the page cap
    pub truncated: usize,
}

impl DiscoveryReport {
    fn merge(&mut self, other: &SubcategoryReport) {
        self.subcategories += 1;
        self.pages_fetched += other.pages_fetched;
        self.items_discovered += other.items;
        if other.truncated {
            self.truncated += 1;
        }
    }
}

#[derive(Debug, Default)]
struct SubcategoryReport {
    pages_fetched: usize,
    items: usize,
    truncated: bool,
}

/// Outcome of one spawned discovery task
enum TaskOutcome {
    Category {
        category: Link,
        subcategories: Vec<Link>,
    },
    CategorySkipped,
    Subcategory(SubcategoryReport),
}

/// Enumerates every work item of a catalog into the work queue
#[derive(Clone)]
pub struct Discovery {
    fetch: FetchClient,
    extractor: Arc<dyn PageExtractor>,
    base_url: Url,
    pagination: Pagination,
    max_pages: u32,
    concurrency: usize,
    cancel: CancellationToken,
}

impl Discovery {
    pub fn new(fetch: FetchClient, extractor: Arc<dyn PageExtractor>, base_url: Url) -> Self {
        Self {
            fetch,
            extractor,
            base_url,
            pagination: Pagination::default(),
            max_pages: 1000,
            concurrency: 3,
            cancel: CancellationToken::new(),
        }
    }

    /// Builds a discovery stage from the source and worker configuration
    pub fn from_config(
        config: &Config,
        fetch: FetchClient,
        extractor: Arc<dyn PageExtractor>,
    ) -> Result<Self, HarvestError> {
        let base_url = Url::parse(&config.source.base_url)?;
        let pagination = match &config.source.page_template {
            Some(template) => Pagination::Template(template.clone()),
            None => Pagination::QueryParam(config.source.page_param.clone()),
        };

        Ok(Self::new(fetch, extractor, base_url)
            .with_pagination(pagination)
            .with_max_pages(config.source.max_pages)
            .with_concurrency(config.workers.discovery))
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Runs discovery, putting every found item on `queue`
    ///
    /// Category pages and subcategory listings are processed concurrently,
    /// at most `concurrency` at a time.
    ///
    /// # Returns
    ///
    /// * `Ok(DiscoveryReport)` - Discovery finished or was cancelled midway
    /// * `Err(HarvestError::Discovery)` - The landing page yielded no categories
    pub async fn run(&self, queue: &WorkQueue<WorkItem>) -> Result<DiscoveryReport, HarvestError> {
        let categories = self.discover_categories().await?;
        tracing::info!("Found {} categories on {}", categories.len(), self.base_url);

        let mut report = DiscoveryReport {
            categories: categories.len(),
            ..Default::default()
        };

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<Result<TaskOutcome, HarvestError>> = JoinSet::new();

        for category in categories {
            let this = self.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| HarvestError::Cancelled)?;
                Ok::<_, HarvestError>(this.discover_subcategories(category).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    tracing::warn!("Discovery task stopped: {}", e);
                    continue;
                }
                Err(e) => {
                    tracing::error!("Discovery task panicked: {}", e);
                    continue;
                }
            };

            match outcome {
                TaskOutcome::Category {
                    category,
                    subcategories,
                } => {
                    for subcategory in subcategories {
                        let label = group_label(&category.label, &subcategory.label);
                        let this = self.clone();
                        let permits = Arc::clone(&permits);
                        let queue = queue.clone();
                        tasks.spawn(async move {
                            let _permit = permits
                                .acquire_owned()
                                .await
                                .map_err(|_| HarvestError::Cancelled)?;
                            let report = this.paginate(&subcategory.url, &label, &queue).await;
                            Ok::<_, HarvestError>(TaskOutcome::Subcategory(report))
                        });
                    }
                }
                TaskOutcome::CategorySkipped => {}
                TaskOutcome::Subcategory(sub) => report.merge(&sub),
            }
        }

        tracing::info!(
            "Discovery finished: {} subcategories, {} listing pages, {} items",
            report.subcategories,
            report.pages_fetched,
            report.items_discovered
        );

        Ok(report)
    }

    async fn discover_categories(&self) -> Result<Vec<Link>, HarvestError> {
        let (content, page_url) = match self.fetch.fetch(self.base_url.as_str()).await? {
            FetchResult::Success { content, url, .. } => (content, self.resolve_final(&url)),
            FetchResult::Failure {
                reason: FailureReason::Cancelled,
                ..
            } => return Err(HarvestError::Cancelled),
            FetchResult::Failure { reason, attempts } => {
                return Err(HarvestError::Discovery(format!(
                    "landing page {} failed after {} attempts: {}",
                    self.base_url, attempts, reason
                )));
            }
        };

        let categories = self
            .extractor
            .extract(&content, &page_url, PageKind::Landing)
            .into_links();

        if categories.is_empty() {
            return Err(HarvestError::Discovery(format!(
                "no categories found on {}",
                self.base_url
            )));
        }

        Ok(categories)
    }

    async fn discover_subcategories(&self, category: Link) -> TaskOutcome {
        let (content, page_url) = match self.fetch.fetch(category.url.as_str()).await {
            Ok(FetchResult::Success { content, url, .. }) => {
                (content, self.resolve_final_or(&url, &category.url))
            }
            Ok(FetchResult::Failure { reason, .. }) => {
                tracing::warn!(
                    "Skipping category {} ({}): {}",
                    category.label,
                    category.url,
                    reason
                );
                return TaskOutcome::CategorySkipped;
            }
            Err(e) => {
                tracing::warn!("Skipping category {}: {}", category.label, e);
                return TaskOutcome::CategorySkipped;
            }
        };

        let mut subcategories = match self
            .extractor
            .extract(&content, &page_url, PageKind::Category)
        {
            Extraction::Links(links) => links,
            _ => Vec::new(),
        };

        if subcategories.is_empty() {
            tracing::debug!(
                "Category {} has no subcategories, paginating it directly",
                category.label
            );
            subcategories.push(category.clone());
        }

        TaskOutcome::Category {
            category,
            subcategories,
        }
    }

    /// Walks the listing pages of one subcategory
    async fn paginate(
        &self,
        subcategory: &Url,
        label: &str,
        queue: &WorkQueue<WorkItem>,
    ) -> SubcategoryReport {
        let mut report = SubcategoryReport::default();
        let mut previous: Vec<Url> = Vec::new();

        for page in 1..=self.max_pages {
            if self.cancel.is_cancelled() {
                break;
            }

            let url = match page_url(subcategory, &self.pagination, page) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!("Cannot build page {} of {}: {}", page, subcategory, e);
                    break;
                }
            };

            report.pages_fetched += 1;

            let (content, final_url) = match self.fetch.fetch(url.as_str()).await {
                Ok(FetchResult::Success { content, url: final_url, .. }) => {
                    (content, self.resolve_final_or(&final_url, &url))
                }
                Ok(FetchResult::Failure { reason, .. }) => {
                    tracing::debug!("Listing {} ended at page {}: {}", label, page, reason);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Listing {} ended at page {}: {}", label, page, e);
                    break;
                }
            };

            let items = self
                .extractor
                .extract(&content, &final_url, PageKind::Listing)
                .into_links();

            if items.is_empty() {
                tracing::debug!("Listing {} has no items on page {}", label, page);
                break;
            }

            let urls: Vec<Url> = items.iter().map(|link| link.url.clone()).collect();
            if urls == previous {
                tracing::info!(
                    "Listing {} repeats page {} on page {}, stopping",
                    label,
                    page - 1,
                    page
                );
                break;
            }

            for item in &items {
                let work = WorkItem::from_url(&item.url, label);
                let put = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return report,
                    put = queue.put(work) => put,
                };

                if let Err(e) = put {
                    tracing::warn!("Work queue closed during discovery: {}", e);
                    return report;
                }
                report.items += 1;
            }

            previous = urls;

            if page == self.max_pages {
                tracing::warn!(
                    "Listing {} reached the page cap of {}, stopping",
                    label,
                    self.max_pages
                );
                report.truncated = true;
            }
        }

        report
    }

    fn resolve_final(&self, final_url: &str) -> Url {
        self.resolve_final_or(final_url, &self.base_url)
    }

    fn resolve_final_or(&self, final_url: &str, fallback: &Url) -> Url {
        Url::parse(final_url).unwrap_or_else(|_| fallback.clone())
    }
}
