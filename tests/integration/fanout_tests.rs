//! Integration tests for process-parallel fan-out
//!
//! Task-based tests exercise partitioning and crash isolation; the process
//! tests spawn the built binary as real workers against a wiremock catalog.

mod common;

use catalog_harvester::fanout::{FanOut, ProcessLauncher, TaskLauncher};
use catalog_harvester::model::Attributes;
use catalog_harvester::output::load_json;
use catalog_harvester::storage::{RecordStore, SqliteStore};
use catalog_harvester::{Record, WorkItem};
use std::collections::HashSet;
use std::time::Duration;
use tempfile::TempDir;
use url::Url;
use wiremock::MockServer;

const BIN: &str = env!("CARGO_BIN_EXE_catalog-harvester");

fn record(n: u32) -> Record {
    let mut attributes = Attributes::new();
    attributes.insert("n".to_string(), n.to_string());
    Record {
        natural_key: format!("item-{}", n),
        attributes,
        group_label: "Numbers".to_string(),
    }
}

fn work_items(server_uri: &str) -> Vec<WorkItem> {
    common::item_paths()
        .iter()
        .map(|p| {
            let url = Url::parse(&format!("{}{}", server_uri, p)).unwrap();
            WorkItem::from_url(&url, "A / Sub A")
        })
        .collect()
}

#[tokio::test]
async fn test_every_item_is_collected_exactly_once() {
    let launcher = TaskLauncher::new(|n: u32| async move { Some(record(n)) });
    let report = FanOut::new(Duration::from_secs(5))
        .run((0..10).collect(), 3, &launcher)
        .await
        .unwrap();

    assert_eq!(report.chunk_sizes, vec![4, 4, 2]);
    assert_eq!(report.records.len(), 10);
    assert_eq!(report.completed, 3);
    assert_eq!(report.crashed, 0);

    let keys: HashSet<_> = report.records.iter().map(|r| r.natural_key.clone()).collect();
    assert_eq!(keys.len(), 10);
}

#[tokio::test]
async fn test_crashed_worker_does_not_affect_siblings() {
    let launcher = TaskLauncher::new(|n: u32| async move {
        if n == 5 {
            panic!("bad item {}", n);
        }
        Some(record(n))
    });
    let report = FanOut::new(Duration::from_secs(5))
        .run((0..10).collect(), 3, &launcher)
        .await
        .unwrap();

    // Worker 1 owns items 4..8 and flushed item 4 before crashing
    assert_eq!(report.completed, 2);
    assert_eq!(report.crashed, 1);
    assert_eq!(report.records.len(), 7);

    let keys: HashSet<_> = report.records.iter().map(|r| r.natural_key.clone()).collect();
    for n in [0, 1, 2, 3, 4, 8, 9] {
        assert!(keys.contains(&format!("item-{}", n)), "missing item-{}", n);
    }
}

#[tokio::test]
async fn test_dropped_items_are_not_collected() {
    let launcher = TaskLauncher::new(|n: u32| async move { (n % 2 == 0).then(|| record(n)) });
    let report = FanOut::default()
        .run((0..6).collect(), 2, &launcher)
        .await
        .unwrap();

    assert_eq!(report.records.len(), 3);
    assert_eq!(report.completed, 2);
}

#[tokio::test]
async fn test_worker_processes_enrich_their_chunks() {
    let server = MockServer::start().await;
    common::mount_catalog(&server).await;
    let dir = TempDir::new().unwrap();
    let config_path = common::write_config(dir.path(), &server.uri());

    let launcher = ProcessLauncher::new(BIN).arg("--config").arg(&config_path);
    let report = FanOut::new(Duration::from_secs(10))
        .run(work_items(&server.uri()), 3, &launcher)
        .await
        .unwrap();

    assert_eq!(report.chunk_sizes, vec![2, 2, 2]);
    assert_eq!(report.completed, 3);
    assert_eq!(report.crashed, 0);
    assert_eq!(report.records.len(), 6);
    assert!(report.records.iter().all(|r| !r.has_unavailable()));
    assert!(report
        .records
        .iter()
        .any(|r| r.attributes.get("title").map(String::as_str) == Some("Item b-3")));
}

#[tokio::test]
async fn test_unlaunchable_program_counts_as_crashed() {
    let launcher = ProcessLauncher::new("/nonexistent/catalog-harvester-worker");
    let item = WorkItem::from_url(&Url::parse("http://127.0.0.1/x").unwrap(), "G");
    let report = FanOut::new(Duration::from_secs(1))
        .run(vec![item], 1, &launcher)
        .await
        .unwrap();

    assert_eq!(report.crashed, 1);
    assert!(report.records.is_empty());
}

#[tokio::test]
async fn test_fanout_command_exports_and_stores_records() {
    let server = MockServer::start().await;
    common::mount_catalog(&server).await;
    let dir = TempDir::new().unwrap();
    let config_path = common::write_config(dir.path(), &server.uri());

    let output = tokio::process::Command::new(BIN)
        .arg("--config")
        .arg(&config_path)
        .arg("fanout")
        .arg("--store")
        .output()
        .await
        .unwrap();
    assert!(
        output.status.success(),
        "fanout failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let exported = load_json(&dir.path().join("records.json")).unwrap();
    assert_eq!(exported.len(), 6);

    let store = SqliteStore::new(&dir.path().join("records.db")).unwrap();
    assert_eq!(store.count_records().unwrap(), 6);
    let run = store.latest_run().unwrap().unwrap();
    assert_eq!(run.mode, "fanout");
    assert_eq!(run.totals.inserted, 6);
}
