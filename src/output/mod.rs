//! Output module for harvest results and reports
//!
//! This module handles:
//! - Atomic JSON export of collected records
//! - Loading and printing storage statistics
//! - Printing run summaries

mod json;
pub mod stats;

pub use json::{export_json, load_json};
pub use stats::{
    load_statistics, print_fanout_summary, print_harvest_summary, print_statistics,
    StorageStatistics,
};
