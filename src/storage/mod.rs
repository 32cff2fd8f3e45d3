//! Storage targets
//!
//! Every encoded payload is replicated into every configured
//! [`Repository`]. Identifiers from the config's DNS list are turned into
//! repositories by a [`RepositoryResolver`]; [`DefaultResolver`] understands:
//!
//! - `memory://<name>` - in-process [`MemoryRepository`]
//! - `file://<dir>` or a bare path - [`FileRepository`] writing one JSON document per table
//!
//! Payloads are JSON. An array is a batch of records, anything else is a
//! single record. Each record is stored under [`record_key`]: the digest of
//! its natural key when it has one, otherwise of the whole record. A record
//! whose key is already stored replaces the old one.

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub mod file;
pub mod memory;

pub use file::FileRepository;
pub use memory::MemoryRepository;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Identifier does not name a supported target
    #[error("unsupported storage target {0:?}")]
    UnsupportedTarget(String),

    /// Table name cannot be used by this target
    #[error("invalid table name {0:?}")]
    InvalidTable(String),

    /// Payload is not JSON
    #[error("failed to decode payload for table {table}: {reason}")]
    Decode {
        /// Destination table
        table: String,
        /// Parser message
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Lock could not be taken
    #[error("lock error: {0}")]
    LockError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Acknowledgement for one upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpsertAck {
    /// Records in the payload
    pub records: usize,
    /// Records whose key was not already stored
    pub inserted: usize,
}

impl UpsertAck {
    /// Records that replaced an existing one
    pub fn updated(&self) -> usize {
        self.records - self.inserted
    }
}

/// An upsert-capable destination
#[async_trait]
pub trait Repository: Send + Sync {
    /// Identifier the target was resolved from
    fn name(&self) -> &str;

    /// Upsert a JSON payload into `table`, matching records on `key` fields.
    async fn upsert(
        &self,
        table: &str,
        payload: &[u8],
        key: &[String],
    ) -> StorageResult<UpsertAck>;

    /// Remove every record from `table`.
    async fn truncate(&self, table: &str) -> StorageResult<()>;
}

/// Turns DNS-list identifiers into repositories
#[async_trait]
pub trait RepositoryResolver: Send + Sync {
    /// Resolve one identifier.
    async fn resolve(&self, identifier: &str) -> StorageResult<Arc<dyn Repository>>;
}

/// Decode a payload into records.
pub fn decode_records(table: &str, payload: &[u8]) -> StorageResult<Vec<Value>> {
    let value: Value = serde_json::from_slice(payload).map_err(|e| StorageError::Decode {
        table: table.to_string(),
        reason: e.to_string(),
    })?;
    Ok(match value {
        Value::Array(records) => records,
        record => vec![record],
    })
}

/// Stable storage key for a record.
///
/// Uses the values of `key` fields when the record has all of them, then an
/// `id` field, then the whole serialized record.
pub fn record_key(record: &Value, key: &[String]) -> String {
    let natural: Option<Vec<&Value>> = if key.is_empty() {
        record.get("id").map(|id| vec![id])
    } else {
        key.iter().map(|field| record.get(field)).collect()
    };

    let mut hasher = Sha256::new();
    match natural {
        Some(values) => {
            hasher.update(b"key");
            for value in values {
                hasher.update([0u8]);
                hasher.update(value.to_string().as_bytes());
            }
        }
        None => {
            hasher.update(b"record\0");
            hasher.update(record.to_string().as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Resolver for the built-in target schemes.
///
/// Memory targets are cached by name so a run and its caller observe the
/// same repository.
#[derive(Debug, Default)]
pub struct DefaultResolver {
    memory: Mutex<HashMap<String, Arc<MemoryRepository>>>,
}

impl DefaultResolver {
    /// Create a resolver with no cached memory targets
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the memory target called `name`.
    pub fn memory(&self, name: &str) -> Arc<MemoryRepository> {
        let mut memory = self
            .memory
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        memory
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryRepository::new(format!("memory://{name}"))))
            .clone()
    }
}

#[async_trait]
impl RepositoryResolver for DefaultResolver {
    async fn resolve(&self, identifier: &str) -> StorageResult<Arc<dyn Repository>> {
        if let Some(name) = identifier.strip_prefix("memory://") {
            if name.is_empty() {
                return Err(StorageError::UnsupportedTarget(identifier.to_string()));
            }
            return Ok(self.memory(name));
        }

        let dir = match identifier.split_once("://") {
            Some(("file", path)) => PathBuf::from(path),
            Some(_) => return Err(StorageError::UnsupportedTarget(identifier.to_string())),
            None if !identifier.trim().is_empty() => PathBuf::from(identifier),
            None => return Err(StorageError::UnsupportedTarget(identifier.to_string())),
        };

        let repository = FileRepository::open(identifier, dir).await?;
        Ok(Arc::new(repository))
    }
}
