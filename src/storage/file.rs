//! Directory-backed repository
//!
//! Each table is a directory `<dir>/<table>/` holding one JSON file per
//! record, named after its [`record_key`]. An upsert only touches the files
//! of the records it carries, so its cost does not grow with the table.
//! Access to a table serializes on `<dir>/.locks/<table>` so separate
//! processes replicating into the same directory do not interleave a
//! truncate with an upsert. Table names may not start with a dot.

use async_trait::async_trait;
use fd_lock::RwLock;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::storage::{decode_records, record_key, Repository, StorageError, StorageResult, UpsertAck};

const LOCK_DIR: &str = ".locks";

/// Repository writing one JSON file per record
#[derive(Debug, Clone)]
pub struct FileRepository {
    name: String,
    dir: PathBuf,
}

impl FileRepository {
    /// Open (creating if needed) a repository rooted at `dir`.
    pub async fn open(name: impl Into<String>, dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        let locks = dir.join(LOCK_DIR);
        tokio::fs::create_dir_all(&locks).await.map_err(|e| {
            StorageError::IoError(format!("Failed to create {}: {e}", locks.display()))
        })?;
        Ok(Self {
            name: name.into(),
            dir,
        })
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory holding the records of `table`
    pub fn table_dir(&self, table: &str) -> StorageResult<PathBuf> {
        validate_table(table)?;
        Ok(self.dir.join(table))
    }

    fn lock_path(&self, table: &str) -> PathBuf {
        self.dir.join(LOCK_DIR).join(table)
    }

    /// Read every record stored in `table`, ordered by key.
    pub async fn records(&self, table: &str) -> StorageResult<Vec<Value>> {
        let table_dir = self.table_dir(table)?;
        let lock_path = self.lock_path(table);
        tokio::task::spawn_blocking(move || with_table_lock(&lock_path, || read_table(&table_dir)))
            .await
            .map_err(|e| StorageError::IoError(format!("Reader task failed: {e}")))?
    }
}

fn validate_table(table: &str) -> StorageResult<()> {
    let valid = !table.is_empty()
        && !table.starts_with('.')
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidTable(table.to_string()))
    }
}

fn read_table(table_dir: &Path) -> StorageResult<Vec<Value>> {
    let entries = match fs::read_dir(table_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(StorageError::IoError(format!(
                "Failed to read {}: {e}",
                table_dir.display()
            )))
        }
    };

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| StorageError::IoError(format!("Failed to list table: {e}")))?
            .path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    paths
        .iter()
        .map(|path| {
            let contents = fs::read(path).map_err(|e| {
                StorageError::IoError(format!("Failed to read {}: {e}", path.display()))
            })?;
            serde_json::from_slice(&contents).map_err(|e| {
                StorageError::IoError(format!("Corrupt record {}: {e}", path.display()))
            })
        })
        .collect()
}

/// Atomically replace `path` with `record`.
fn write_record(path: &Path, record: &Value) -> StorageResult<()> {
    let json = serde_json::to_vec(record)
        .map_err(|e| StorageError::IoError(format!("Failed to serialize record: {e}")))?;

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp_file = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| StorageError::IoError(format!("Failed to create temp file: {e}")))?;
    temp_file
        .write_all(&json)
        .map_err(|e| StorageError::IoError(format!("Failed to write temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| StorageError::IoError(format!("Failed to sync temp file: {e}")))?;
    temp_file
        .persist(path)
        .map_err(|e| StorageError::IoError(format!("Failed to persist record: {e}")))?;
    Ok(())
}

/// Run `f` while holding the table's exclusive lock.
fn with_table_lock<T>(lock_path: &Path, f: impl FnOnce() -> StorageResult<T>) -> StorageResult<T> {
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|e| StorageError::LockError(format!("Failed to create lock file: {e}")))?;

    let mut lock = RwLock::new(lock_file);
    let _guard = lock
        .write()
        .map_err(|e| StorageError::LockError(format!("Failed to acquire write lock: {e}")))?;
    f()
}

#[async_trait]
impl Repository for FileRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert(
        &self,
        table: &str,
        payload: &[u8],
        key: &[String],
    ) -> StorageResult<UpsertAck> {
        let table_dir = self.table_dir(table)?;
        let lock_path = self.lock_path(table);
        let records = decode_records(table, payload)?;
        let key = key.to_vec();

        tokio::task::spawn_blocking(move || {
            with_table_lock(&lock_path, || {
                fs::create_dir_all(&table_dir).map_err(|e| {
                    StorageError::IoError(format!("Failed to create {}: {e}", table_dir.display()))
                })?;

                let mut ack = UpsertAck {
                    records: records.len(),
                    inserted: 0,
                };
                for record in &records {
                    let path = table_dir.join(format!("{}.json", record_key(record, &key)));
                    if !path.exists() {
                        ack.inserted += 1;
                    }
                    write_record(&path, record)?;
                }
                debug!(
                    table = %table_dir.display(),
                    inserted = ack.inserted,
                    updated = ack.updated(),
                    "Records written"
                );
                Ok(ack)
            })
        })
        .await
        .map_err(|e| StorageError::IoError(format!("Writer task failed: {e}")))?
    }

    async fn truncate(&self, table: &str) -> StorageResult<()> {
        let table_dir = self.table_dir(table)?;
        let lock_path = self.lock_path(table);
        tokio::task::spawn_blocking(move || {
            with_table_lock(&lock_path, || match fs::remove_dir_all(&table_dir) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StorageError::IoError(format!(
                    "Failed to truncate {}: {e}",
                    table_dir.display()
                ))),
            })
        })
        .await
        .map_err(|e| StorageError::IoError(format!("Writer task failed: {e}")))?
    }
}
