//! Object store and hash state
//!
//! The object store maps digests to immutable content: files by their digest,
//! directories by their manifest digest with the `.dir` suffix. The hash
//! state is a persistent memo of file digests keyed by location and stamp.

pub mod codec;
pub mod local;
pub mod state;

pub use local::LocalObjectStore;
pub use state::SledStateStore;

use crate::error::StorageError;
use crate::tree::hasher::{self, Algorithm};
use crate::tree::node::{HashRecord, Manifest};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

/// Content handed to [`ObjectStore::put`]
pub enum ObjectSource<'a> {
    /// Read and hash a file on disk
    File(&'a Path),
    /// Hash and store an in-memory buffer
    Bytes(&'a [u8]),
    /// Stream whose digest is already known. When the object is present no
    /// bytes are read; otherwise the stream is verified while copied.
    Hashed {
        reader: Box<dyn Read + Send + 'a>,
        record: &'a HashRecord,
    },
    /// Directory manifest; every referenced leaf must already be present.
    Manifest(&'a Manifest),
}

/// Content-addressable object store interface
pub trait ObjectStore: Send + Sync {
    /// Algorithm every object id in this store is computed with
    fn algorithm(&self) -> Algorithm;

    /// True when the object `oid` is present
    fn contains(&self, oid: &str) -> bool;

    /// Open a stored object. Fails with `ObjectMissing` when absent.
    fn open(&self, oid: &str) -> Result<Box<dyn Read + Send>, StorageError>;

    /// Store content and return its record. Idempotent: existing objects are
    /// not rewritten.
    fn put(&self, source: ObjectSource<'_>) -> Result<HashRecord, StorageError>;

    /// Load the manifest referenced by a directory record.
    fn load_manifest(&self, record: &HashRecord) -> Result<Arc<Manifest>, StorageError> {
        if let Some(manifest) = &record.manifest {
            return Ok(manifest.clone());
        }
        let mut reader = self.open(&record.value())?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(Arc::new(hasher::parse_manifest(record.algorithm, &bytes)?))
    }

    /// True when `record` and, for directories, every leaf it references is
    /// present.
    fn contains_record(&self, record: &HashRecord) -> bool {
        if !self.contains(&record.value()) {
            return false;
        }
        if !record.is_dir() {
            return true;
        }
        match self.load_manifest(record) {
            Ok(manifest) => manifest
                .entries()
                .iter()
                .all(|entry| self.contains(&entry.hash.value())),
            Err(_) => false,
        }
    }
}

/// Persistent memo of file digests, keyed by location and algorithm and
/// validated against a `(size, mtime)` stamp.
pub trait HashState: Send + Sync {
    /// Stored digest when the recorded stamp matches
    fn lookup(
        &self,
        location: &Path,
        algorithm: Algorithm,
        size: u64,
        mtime_ns: u128,
    ) -> Result<Option<String>, StorageError>;

    fn record(
        &self,
        location: &Path,
        algorithm: Algorithm,
        size: u64,
        mtime_ns: u128,
        digest: &str,
    ) -> Result<(), StorageError>;
}
