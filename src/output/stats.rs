//! Statistics generation from the record database
//!
//! This module provides functionality for extracting and displaying
//! harvest statistics from the storage layer.

use crate::fanout::FanOutReport;
use crate::pipeline::HarvestSummary;
use crate::storage::{RecordStore, RunRecord, SqliteStore, StorageResult};

/// Storage statistics summary
#[derive(Debug, Clone)]
pub struct StorageStatistics {
    /// Total number of stored records
    pub total_records: u64,

    /// Record counts per group label, largest first
    pub records_by_group: Vec<(String, u64)>,

    /// Records holding at least one unavailable attribute
    pub unavailable_records: u64,

    /// Most recent run, if any
    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from storage
pub fn load_statistics(store: &SqliteStore) -> StorageResult<StorageStatistics> {
    Ok(StorageStatistics {
        total_records: store.count_records()?,
        records_by_group: store.count_by_group()?,
        unavailable_records: store.count_unavailable()?,
        latest_run: store.latest_run()?,
    })
}

fn percentage(part: u64, total: u64) -> f64 {
    if total > 0 {
        (part as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &StorageStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Overview:");
    println!("  Total records: {}", stats.total_records);
    println!("  Groups: {}", stats.records_by_group.len());
    println!(
        "  Records with unavailable fields: {} ({:.1}%)",
        stats.unavailable_records,
        percentage(stats.unavailable_records, stats.total_records)
    );
    println!();

    if !stats.records_by_group.is_empty() {
        println!("Records by Group:");
        for (group, count) in &stats.records_by_group {
            println!(
                "  {}: {} ({:.1}%)",
                group,
                count,
                percentage(*count, stats.total_records)
            );
        }
        println!();
    }

    match &stats.latest_run {
        Some(run) => {
            println!("Latest Run:");
            println!("  Run ID: {}", run.id);
            println!("  Mode: {}", run.mode);
            println!("  Status: {}", run.status.to_db_string());
            println!("  Started: {}", run.started_at);
            if let Some(finished) = &run.finished_at {
                println!("  Finished: {}", finished);
            }
            println!(
                "  Written: {} inserted, {} already stored, {} faults",
                run.totals.inserted, run.totals.already_existed, run.totals.faults
            );
        }
        None => println!("No runs recorded yet."),
    }
}

/// Prints the totals of a thread-parallel run
pub fn print_harvest_summary(summary: &HarvestSummary) {
    println!("=== Harvest Summary ===\n");
    println!("Discovery:");
    println!("  Categories: {}", summary.discovery.categories);
    println!("  Subcategories: {}", summary.discovery.subcategories);
    println!("  Listing pages: {}", summary.discovery.pages_fetched);
    println!("  Items found: {}", summary.discovery.items_discovered);
    if summary.discovery.truncated > 0 {
        println!(
            "  Listings cut off at the page cap: {}",
            summary.discovery.truncated
        );
    }
    println!();

    println!("Enrichment ({} workers):", summary.detail.workers);
    println!("  Records: {}", summary.detail.processed);
    println!("  With unavailable fields: {}", summary.detail.unavailable);
    println!();

    println!("Storage:");
    println!("  Inserted: {}", summary.writer.inserted);
    println!("  Already stored: {}", summary.writer.already_existed);
    println!("  Faults: {}", summary.writer.faults);

    if summary.cancelled {
        println!();
        println!(
            "Run cancelled: {} items dropped",
            summary.dropped + summary.detail.dropped
        );
    }
}

/// Prints the totals of a fan-out run
pub fn print_fanout_summary(report: &FanOutReport) {
    println!("=== Fan-out Summary ===\n");
    println!("  Workers: {}", report.chunk_sizes.len());
    println!("  Chunk sizes: {:?}", report.chunk_sizes);
    println!("  Records collected: {}", report.records.len());
    println!("  Completed: {}", report.completed);
    println!("  Crashed: {}", report.crashed);
    if report.terminated > 0 {
        println!("  Terminated after grace period: {}", report.terminated);
    }
}
