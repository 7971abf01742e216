//! Persistence layer for the hash state

use crate::error::StorageError;
use crate::store::HashState;
use crate::tree::hasher::Algorithm;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::trace;

/// Stored digest with the stamp it was computed against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StateEntry {
    size: u64,
    mtime_ns: u128,
    digest: String,
}

/// Sled-based implementation of [`HashState`]
pub struct SledStateStore {
    db: sled::Db,
}

impl SledStateStore {
    /// Open (or create) the state database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)
            .map_err(|e| StorageError::State(format!("Failed to open sled database: {}", e)))?;
        Ok(Self { db })
    }

    fn key(location: &Path, algorithm: Algorithm) -> Vec<u8> {
        format!("{}:{}", algorithm, location.to_string_lossy()).into_bytes()
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db
            .flush()
            .map_err(|e| StorageError::State(format!("Failed to flush state: {}", e)))?;
        Ok(())
    }
}

impl HashState for SledStateStore {
    fn lookup(
        &self,
        location: &Path,
        algorithm: Algorithm,
        size: u64,
        mtime_ns: u128,
    ) -> Result<Option<String>, StorageError> {
        let key = Self::key(location, algorithm);
        let Some(value) = self
            .db
            .get(&key)
            .map_err(|e| StorageError::State(format!("Failed to read state entry: {}", e)))?
        else {
            return Ok(None);
        };

        let entry: StateEntry = bincode::deserialize(&value)
            .map_err(|e| StorageError::State(format!("Failed to deserialize state entry: {}", e)))?;
        if entry.size == size && entry.mtime_ns == mtime_ns {
            trace!(location = %location.display(), "State hit");
            Ok(Some(entry.digest))
        } else {
            trace!(location = %location.display(), "State entry is stale");
            Ok(None)
        }
    }

    fn record(
        &self,
        location: &Path,
        algorithm: Algorithm,
        size: u64,
        mtime_ns: u128,
        digest: &str,
    ) -> Result<(), StorageError> {
        let entry = StateEntry {
            size,
            mtime_ns,
            digest: digest.to_string(),
        };
        let value = bincode::serialize(&entry)
            .map_err(|e| StorageError::State(format!("Failed to serialize state entry: {}", e)))?;
        self.db
            .insert(Self::key(location, algorithm), value)
            .map_err(|e| StorageError::State(format!("Failed to write state entry: {}", e)))?;
        Ok(())
    }
}
