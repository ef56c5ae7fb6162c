//! In-memory record store
//!
//! Shares the upsert semantics of [`SqliteStore`](super::SqliteStore). Clones
//! share the same contents, so a test can hand one clone to a writer and
//! inspect another afterwards.

use crate::model::Record;
use crate::storage::traits::{RecordStore, StorageResult, UpsertOutcome};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Inner {
    records: Vec<Record>,
    keys: HashSet<String>,
    faulty: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every upsert of `natural_key` report a fault
    pub fn fail_on(self, natural_key: &str) -> Self {
        if let Ok(mut inner) = self.inner.lock() {
            inner.faulty.insert(natural_key.to_string());
        }
        self
    }

    /// Snapshot of stored records in insertion order
    pub fn records(&self) -> Vec<Record> {
        self.inner
            .lock()
            .map(|inner| inner.records.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryStore {
    fn upsert(&mut self, record: &Record) -> UpsertOutcome {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(_) => return UpsertOutcome::Fault("memory store lock poisoned".to_string()),
        };

        if inner.faulty.contains(&record.natural_key) {
            return UpsertOutcome::Fault(format!("injected fault for {}", record.natural_key));
        }

        if !inner.keys.insert(record.natural_key.clone()) {
            return UpsertOutcome::AlreadyExists;
        }

        inner.records.push(record.clone());
        UpsertOutcome::Inserted
    }

    fn count_records(&self) -> StorageResult<u64> {
        Ok(self.len() as u64)
    }
}
