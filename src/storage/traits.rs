//! Storage traits and error types
//!
//! This module defines the upsert surface the writer persists through and
//! the associated error types.

use crate::model::Record;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Outcome of writing one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The record was new and has been stored
    Inserted,
    /// A record with the same natural key is already stored
    AlreadyExists,
    /// The store failed for a reason other than a key collision
    Fault(String),
}

/// Key-value-like record store with a uniqueness constraint on natural key
///
/// Upserting the same record set twice leaves the store unchanged the second
/// time; every repeated key answers [`UpsertOutcome::AlreadyExists`].
pub trait RecordStore: Send {
    /// Stores a record unless its natural key is already present
    fn upsert(&mut self, record: &Record) -> UpsertOutcome;

    /// Number of stored records
    fn count_records(&self) -> StorageResult<u64>;
}
