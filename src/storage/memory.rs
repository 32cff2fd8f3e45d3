//! In-process repository

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::storage::{decode_records, record_key, Repository, StorageResult, UpsertAck};

/// Repository holding tables in memory, keyed by [`record_key`]
#[derive(Debug)]
pub struct MemoryRepository {
    name: String,
    tables: Mutex<HashMap<String, BTreeMap<String, Value>>>,
    upserts: AtomicUsize,
    truncates: AtomicUsize,
}

impl MemoryRepository {
    /// Create an empty repository
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: Mutex::new(HashMap::new()),
            upserts: AtomicUsize::new(0),
            truncates: AtomicUsize::new(0),
        }
    }

    /// Records stored in `table`, ordered by key
    pub async fn records(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .await
            .get(table)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of tables holding records
    pub async fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of upsert calls received
    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Number of truncate calls received
    pub fn truncate_calls(&self) -> usize {
        self.truncates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert(
        &self,
        table: &str,
        payload: &[u8],
        key: &[String],
    ) -> StorageResult<UpsertAck> {
        let records = decode_records(table, payload)?;
        self.upserts.fetch_add(1, Ordering::SeqCst);

        let mut tables = self.tables.lock().await;
        let stored = tables.entry(table.to_string()).or_default();
        let mut ack = UpsertAck {
            records: records.len(),
            inserted: 0,
        };
        for record in records {
            if stored.insert(record_key(&record, key), record).is_none() {
                ack.inserted += 1;
            }
        }
        Ok(ack)
    }

    async fn truncate(&self, table: &str) -> StorageResult<()> {
        self.truncates.fetch_add(1, Ordering::SeqCst);
        self.tables.lock().await.remove(table);
        Ok(())
    }
}
