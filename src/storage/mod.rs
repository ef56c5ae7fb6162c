//! Storage module for persisting harvested records
//!
//! This module handles:
//! - SQLite database initialization and schema management
//! - Idempotent record upserts keyed by natural key
//! - Run tracking with per-run write totals
//! - An in-memory store with the same upsert semantics

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{RecordStore, StorageError, StorageResult, UpsertOutcome};

use std::path::Path;

/// Initializes or opens a storage database
pub fn open_storage(path: &Path) -> StorageResult<SqliteStore> {
    SqliteStore::new(path)
}

/// Totals of one writer pass over a record stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterReport {
    pub inserted: u64,
    pub already_existed: u64,
    pub faults: u64,
}

impl WriterReport {
    /// Records counted as successfully persisted (including key collisions)
    pub fn persisted(&self) -> u64 {
        self.inserted + self.already_existed
    }

    pub fn total(&self) -> u64 {
        self.persisted() + self.faults
    }

    pub fn merge(&mut self, other: &WriterReport) {
        self.inserted += other.inserted;
        self.already_existed += other.already_existed;
        self.faults += other.faults;
    }
}

/// Represents a harvest run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub mode: String,
    pub status: RunStatus,
    pub totals: WriterReport,
}

/// Status of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
