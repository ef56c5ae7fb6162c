//! Integration tests for the thread-parallel pipeline
//!
//! These tests use wiremock to serve a small catalog and run the full
//! discovery, enrichment and persistence cycle end-to-end.

mod common;

use catalog_harvester::extract::{Extraction, PageExtractor, PageKind, SelectorExtractor};
use catalog_harvester::fetch::http_client;
use catalog_harvester::pipeline::{DetailStage, Discovery, HarvestSettings, Harvester};
use catalog_harvester::storage::{MemoryStore, RecordStore, SqliteStore};
use catalog_harvester::UNAVAILABLE;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_two_categories_become_six_unique_records() {
    let server = MockServer::start().await;
    common::mount_catalog(&server).await;
    let dir = TempDir::new().unwrap();
    let config = common::test_config(dir.path(), &server.uri());

    let store = SqliteStore::new(Path::new(&config.output.database_path)).unwrap();
    let harvester = Harvester::from_config(&config, CancellationToken::new()).unwrap();
    let summary = harvester.run(store.clone()).await.unwrap();

    assert_eq!(summary.discovery.categories, 2);
    assert_eq!(summary.discovery.subcategories, 2);
    // One non-empty and one terminating page per subcategory
    assert_eq!(summary.discovery.pages_fetched, 4);
    assert_eq!(summary.discovery.items_discovered, 6);
    assert_eq!(summary.writer.inserted, 6);
    assert_eq!(summary.writer.faults, 0);

    let records = store.load_records().unwrap();
    assert_eq!(records.len(), 6);
    assert!(records.iter().all(|r| !r.has_unavailable()));

    let keys: HashSet<_> = records.iter().map(|r| r.natural_key.clone()).collect();
    let expected: HashSet<_> = common::item_paths()
        .iter()
        .map(|p| format!("{}{}", server.uri(), p))
        .collect();
    assert_eq!(keys, expected);

    let record = records
        .iter()
        .find(|r| r.natural_key.ends_with("/item/a-2.html"))
        .unwrap();
    assert_eq!(record.attributes["title"], "Item a-2");
    assert_eq!(record.attributes["price"], "£2.00");
    assert_eq!(record.attributes["UPC"], "a2");
    assert_eq!(record.group_label, "A / Sub A");
}

#[tokio::test]
async fn test_second_run_only_reports_existing_records() {
    let server = MockServer::start().await;
    common::mount_catalog(&server).await;
    let dir = TempDir::new().unwrap();
    let config = common::test_config(dir.path(), &server.uri());
    let db = Path::new(&config.output.database_path);

    let first = Harvester::from_config(&config, CancellationToken::new())
        .unwrap()
        .run(SqliteStore::new(db).unwrap())
        .await
        .unwrap();
    assert_eq!(first.writer.inserted, 6);

    let store = SqliteStore::new(db).unwrap();
    let second = Harvester::from_config(&config, CancellationToken::new())
        .unwrap()
        .run(store.clone())
        .await
        .unwrap();

    assert_eq!(second.writer.inserted, 0);
    assert_eq!(second.writer.already_existed, 6);
    assert_eq!(store.count_records().unwrap(), 6);
}

#[tokio::test]
async fn test_missing_detail_page_yields_unavailable_record() {
    let server = MockServer::start().await;
    let missing = common::item_path("b", 3);
    common::mount_catalog_with(&server, &[missing.clone()]).await;
    let dir = TempDir::new().unwrap();
    let config = common::test_config(dir.path(), &server.uri());

    let store = MemoryStore::new();
    let summary = Harvester::from_config(&config, CancellationToken::new())
        .unwrap()
        .run(store.clone())
        .await
        .unwrap();

    assert_eq!(summary.writer.inserted, 6);
    assert_eq!(summary.detail.unavailable, 1);

    let records = store.records();
    let record = records
        .iter()
        .find(|r| r.natural_key.ends_with(&missing))
        .unwrap();
    assert_eq!(record.attributes["title"], UNAVAILABLE);
    assert_eq!(record.attributes["price"], UNAVAILABLE);
    assert_eq!(record.source_url(), Some(record.natural_key.as_str()));
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let server = MockServer::start().await;

    // Mounted first so it answers the first two requests
    Mock::given(method("GET"))
        .and(path(common::item_path("a", 1)))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    common::mount_catalog(&server).await;

    let dir = TempDir::new().unwrap();
    let config = common::test_config(dir.path(), &server.uri());

    let store = MemoryStore::new();
    let summary = Harvester::from_config(&config, CancellationToken::new())
        .unwrap()
        .run(store.clone())
        .await
        .unwrap();

    assert_eq!(summary.writer.inserted, 6);
    assert_eq!(summary.detail.unavailable, 0);
    assert!(store.records().iter().all(|r| !r.has_unavailable()));
}

#[tokio::test]
async fn test_unreachable_landing_page_fails_run() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = common::test_config(dir.path(), &server.uri());

    let result = Harvester::from_config(&config, CancellationToken::new())
        .unwrap()
        .run(MemoryStore::new())
        .await;

    assert!(result.is_err());
}

/// Delegates to the configured selectors but panics on one detail page
struct FaultyDetailExtractor {
    inner: SelectorExtractor,
    poison: String,
}

impl PageExtractor for FaultyDetailExtractor {
    fn extract(&self, content: &str, page_url: &Url, kind: PageKind) -> Extraction {
        if kind == PageKind::Detail && page_url.path() == self.poison {
            panic!("extractor bug on {}", page_url);
        }
        self.inner.extract(content, page_url, kind)
    }

    fn detail_fields(&self) -> &[String] {
        self.inner.detail_fields()
    }
}

async fn run_with_extractor(
    config: &catalog_harvester::Config,
    extractor: Arc<dyn PageExtractor>,
    store: MemoryStore,
) -> catalog_harvester::pipeline::HarvestSummary {
    let cancel = CancellationToken::new();
    let fetch = http_client(&config.fetch, cancel.clone()).unwrap();
    let discovery = Discovery::from_config(config, fetch.clone(), Arc::clone(&extractor)).unwrap();
    let stage = Arc::new(DetailStage::new(fetch, extractor));
    let harvester = Harvester::new(
        discovery,
        stage,
        HarvestSettings::from_config(&config.workers),
        cancel,
    );

    tokio::time::timeout(Duration::from_secs(30), harvester.run(store))
        .await
        .expect("harvest should finish despite a panicking extractor")
        .unwrap()
}

#[tokio::test]
async fn test_extractor_panic_costs_only_that_item() {
    let server = MockServer::start().await;
    common::mount_catalog(&server).await;
    let dir = TempDir::new().unwrap();
    let config = common::test_config(dir.path(), &server.uri());

    let poison = common::item_path("a", 2);
    let extractor = Arc::new(FaultyDetailExtractor {
        inner: SelectorExtractor::from_config(&config.selectors).unwrap(),
        poison: poison.clone(),
    });

    let store = MemoryStore::new();
    let summary = run_with_extractor(&config, extractor, store.clone()).await;

    assert_eq!(summary.writer.inserted, 6);
    assert_eq!(summary.detail.processed, 6);
    assert_eq!(summary.detail.unavailable, 1);

    let records = store.records();
    let broken: Vec<_> = records.iter().filter(|r| r.has_unavailable()).collect();
    assert_eq!(broken.len(), 1);
    assert!(broken[0].natural_key.ends_with(&poison));
    assert_eq!(broken[0].attributes["title"], UNAVAILABLE);
}

#[tokio::test]
async fn test_every_detail_panicking_still_finishes() {
    struct AlwaysPanics(Vec<String>, SelectorExtractor);

    impl PageExtractor for AlwaysPanics {
        fn extract(&self, content: &str, page_url: &Url, kind: PageKind) -> Extraction {
            if kind == PageKind::Detail {
                panic!("extractor bug on {}", page_url);
            }
            self.1.extract(content, page_url, kind)
        }

        fn detail_fields(&self) -> &[String] {
            &self.0
        }
    }

    let server = MockServer::start().await;
    common::mount_catalog(&server).await;
    let dir = TempDir::new().unwrap();
    let config = common::test_config(dir.path(), &server.uri());

    let extractor = Arc::new(AlwaysPanics(
        vec!["title".to_string(), "price".to_string()],
        SelectorExtractor::from_config(&config.selectors).unwrap(),
    ));

    let store = MemoryStore::new();
    let summary = run_with_extractor(&config, extractor, store.clone()).await;

    assert_eq!(summary.writer.inserted, 6);
    assert_eq!(summary.detail.unavailable, 6);
    assert!(store.records().iter().all(|r| r.attributes["price"] == UNAVAILABLE));
}
