//! SQLite storage implementation
//!
//! Connections are never shared: every operation opens its own connection
//! and drops it when the operation returns, whether it succeeded or not.

use crate::model::{Attributes, Record, SOURCE_URL_KEY};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{RecordStore, StorageError, StorageResult, UpsertOutcome};
use crate::storage::{RunRecord, RunStatus, WriterReport};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// SQLite storage backend
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and initializes the
    /// schema
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self {
            path: path.to_path_buf(),
        };

        let conn = store.connect()?;
        // WAL mode is persistent, so setting it once is enough
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        ",
        )?;
        initialize_schema(&conn)?;

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> StorageResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Inserts a record, returning false on a natural-key collision
    fn insert_record(&self, record: &Record) -> StorageResult<bool> {
        let conn = self.connect()?;
        let attributes = serde_json::to_string(&record.attributes)?;

        let changed = conn.execute(
            "INSERT INTO records (natural_key, group_label, source_url, attributes, harvested_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(natural_key) DO NOTHING",
            params![
                record.natural_key,
                record.group_label,
                record.attributes.get(SOURCE_URL_KEY),
                attributes,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(changed == 1)
    }

    // ===== Run Management =====

    /// Creates a new run and returns its ID
    pub fn create_run(&self, config_hash: &str, mode: &str) -> StorageResult<i64> {
        let conn = self.connect()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO runs (started_at, config_hash, mode, status) VALUES (?1, ?2, ?3, ?4)",
            params![now, config_hash, mode, RunStatus::Running.to_db_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Marks a run as finished with the given status and write totals
    pub fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        totals: &WriterReport,
    ) -> StorageResult<()> {
        let conn = self.connect()?;
        let now = Utc::now().to_rfc3339();
        let updated = conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, inserted = ?3, already_existed = ?4, faults = ?5
             WHERE id = ?6",
            params![
                status.to_db_string(),
                now,
                totals.inserted as i64,
                totals.already_existed as i64,
                totals.faults as i64,
                run_id
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    /// Gets the most recent run
    pub fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let conn = self.connect()?;
        let run = conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, mode, status,
                        inserted, already_existed, faults
                 FROM runs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok(RunRecord {
                        id: row.get(0)?,
                        started_at: row.get(1)?,
                        finished_at: row.get(2)?,
                        config_hash: row.get(3)?,
                        mode: row.get(4)?,
                        status: RunStatus::from_db_string(&row.get::<_, String>(5)?)
                            .unwrap_or(RunStatus::Failed),
                        totals: WriterReport {
                            inserted: row.get::<_, i64>(6)? as u64,
                            already_existed: row.get::<_, i64>(7)? as u64,
                            faults: row.get::<_, i64>(8)? as u64,
                        },
                    })
                },
            )
            .optional()?;
        Ok(run)
    }

    // ===== Record Queries =====

    /// Loads a record by natural key
    pub fn get_record(&self, natural_key: &str) -> StorageResult<Option<Record>> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT natural_key, group_label, attributes FROM records WHERE natural_key = ?1",
                params![natural_key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(natural_key, group_label, attributes)| {
            decode_record(natural_key, group_label, &attributes)
        })
        .transpose()
    }

    /// Loads every record in insertion order
    pub fn load_records(&self) -> StorageResult<Vec<Record>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT natural_key, group_label, attributes FROM records ORDER BY id")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(natural_key, group_label, attributes)| {
                decode_record(natural_key, group_label, &attributes)
            })
            .collect()
    }

    /// Record counts per group label, largest first
    pub fn count_by_group(&self) -> StorageResult<Vec<(String, u64)>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT group_label, COUNT(*) FROM records
             GROUP BY group_label ORDER BY COUNT(*) DESC, group_label",
        )?;

        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(counts)
    }

    /// Number of records holding at least one unavailable attribute
    pub fn count_unavailable(&self) -> StorageResult<u64> {
        Ok(self
            .load_records()?
            .iter()
            .filter(|r| r.has_unavailable())
            .count() as u64)
    }
}

impl RecordStore for SqliteStore {
    fn upsert(&mut self, record: &Record) -> UpsertOutcome {
        match self.insert_record(record) {
            Ok(true) => UpsertOutcome::Inserted,
            Ok(false) => UpsertOutcome::AlreadyExists,
            Err(e) => UpsertOutcome::Fault(e.to_string()),
        }
    }

    fn count_records(&self) -> StorageResult<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn decode_record(
    natural_key: String,
    group_label: String,
    attributes: &str,
) -> StorageResult<Record> {
    let attributes: Attributes = serde_json::from_str(attributes)?;
    Ok(Record {
        natural_key,
        attributes,
        group_label,
    })
}
