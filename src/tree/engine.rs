//! Content hash engine
//!
//! Computes content identities for any [`FileSystemView`]:
//!
//! - a file whose entry carries a recorded hash returns it without I/O;
//! - a working-directory file is memoized by `(location, algorithm)` and
//!   revalidated against its `(size, mtime)` stamp, with an optional
//!   persistent state as a second level;
//! - a directory hashes to the digest of its flattened, sorted manifest.
//!
//! Concurrent requests for the same location compute once.

use crate::concurrency::SingleFlight;
use crate::error::FsError;
use crate::fs::{EntryInfo, FileStamp, FileSystemView};
use crate::store::HashState;
use crate::tree::hasher::{self, Algorithm};
use crate::tree::node::{HashRecord, Manifest, ManifestEntry};
use crate::tree::path::PathKey;
use crate::types::EntryKind;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MemoKey {
    location: PathBuf,
    algorithm: Algorithm,
}

#[derive(Debug, Clone)]
struct MemoEntry {
    stamp: FileStamp,
    record: HashRecord,
}

/// Memoizing hash engine
pub struct HashEngine {
    memo: SingleFlight<MemoKey, MemoEntry>,
    state: Option<Arc<dyn HashState>>,
}

impl HashEngine {
    pub fn new(state: Option<Arc<dyn HashState>>) -> Self {
        Self {
            memo: SingleFlight::new(),
            state,
        }
    }

    /// Engine with an in-memory memo only
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Content identity of `path` in `view`.
    #[instrument(skip_all, fields(path = %path, algorithm = %algorithm))]
    pub fn get_hash(
        &self,
        view: &dyn FileSystemView,
        path: &PathKey,
        algorithm: Algorithm,
    ) -> Result<HashRecord, FsError> {
        let info = view.info(path)?;
        self.hash_entry(view, &info, algorithm)
    }

    /// Hash an entry whose info has already been fetched.
    pub fn hash_entry(
        &self,
        view: &dyn FileSystemView,
        info: &EntryInfo,
        algorithm: Algorithm,
    ) -> Result<HashRecord, FsError> {
        match info.kind {
            EntryKind::File => self.file_hash(view, info, algorithm),
            EntryKind::Directory => self.dir_hash(view, info, algorithm),
        }
    }

    /// Memoized record for a location, if its stamp still matches.
    pub fn peek(&self, location: &std::path::Path, stamp: FileStamp, algorithm: Algorithm) -> Option<HashRecord> {
        let key = MemoKey {
            location: location.to_path_buf(),
            algorithm,
        };
        self.memo
            .get(&key)
            .filter(|entry| entry.stamp == stamp)
            .map(|entry| entry.record)
    }

    /// Forget every memoized digest.
    pub fn clear(&self) {
        self.memo.clear();
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }

    fn file_hash(
        &self,
        view: &dyn FileSystemView,
        info: &EntryInfo,
        algorithm: Algorithm,
    ) -> Result<HashRecord, FsError> {
        if let Some(recorded) = info
            .hash
            .as_ref()
            .filter(|h| h.algorithm == algorithm && !h.is_dir())
        {
            trace!(path = %info.path, "Using recorded hash");
            return Ok(recorded.clone());
        }

        let (Some(location), Some(stamp)) = (info.location.as_ref(), info.stamp) else {
            return self.stream_hash(view, &info.path, algorithm);
        };

        let key = MemoKey {
            location: location.clone(),
            algorithm,
        };
        let entry = self.memo.get_fresh_or_try_init(
            &key,
            |entry| entry.stamp == stamp,
            || {
                if let Some(digest) = self.state_lookup(&key, stamp) {
                    let record = HashRecord::file(algorithm, digest).with_size(stamp.size);
                    return Ok(MemoEntry { stamp, record });
                }
                let record = self.stream_hash(view, &info.path, algorithm)?;
                self.state_record(&key, stamp, &record);
                Ok::<_, FsError>(MemoEntry { stamp, record })
            },
        )?;
        Ok(entry.record)
    }

    fn stream_hash(
        &self,
        view: &dyn FileSystemView,
        path: &PathKey,
        algorithm: Algorithm,
    ) -> Result<HashRecord, FsError> {
        let mut reader = view.open(path)?;
        let (digest, size) = hasher::hash_reader(algorithm, &mut reader)
            .map_err(|e| FsError::Io {
                path: PathBuf::from(path.as_posix()),
                source: e,
            })?;
        debug!(path = %path, %digest, size, "Hashed content");
        Ok(HashRecord::file(algorithm, digest).with_size(size))
    }

    fn state_lookup(&self, key: &MemoKey, stamp: FileStamp) -> Option<String> {
        let state = self.state.as_ref()?;
        match state.lookup(&key.location, key.algorithm, stamp.size, stamp.mtime_ns) {
            Ok(found) => found,
            Err(e) => {
                warn!(location = %key.location.display(), error = %e, "Hash state lookup failed");
                None
            }
        }
    }

    fn state_record(&self, key: &MemoKey, stamp: FileStamp, record: &HashRecord) {
        let Some(state) = self.state.as_ref() else {
            return;
        };
        if let Err(e) = state.record(&key.location, key.algorithm, stamp.size, stamp.mtime_ns, &record.digest) {
            warn!(location = %key.location.display(), error = %e, "Hash state write failed");
        }
    }

    fn dir_hash(
        &self,
        view: &dyn FileSystemView,
        info: &EntryInfo,
        algorithm: Algorithm,
    ) -> Result<HashRecord, FsError> {
        if let Some(recorded) = info
            .hash
            .as_ref()
            .filter(|h| h.algorithm == algorithm && h.is_dir() && h.manifest.is_some())
        {
            trace!(path = %info.path, "Using recorded directory hash");
            return Ok(recorded.clone());
        }

        let mut entries = Vec::new();
        for child in view.list_dir(&info.path)? {
            let child_path = info.path.child(&child.name);
            let rel = PathKey::root().child(&child.name);
            let record = self.get_hash(view, &child_path, algorithm)?;
            if let (true, Some(manifest)) = (record.is_dir(), record.manifest.as_ref()) {
                for leaf in manifest.entries() {
                    entries.push(ManifestEntry {
                        path: rel.concat(&leaf.path),
                        hash: leaf.hash.clone(),
                    });
                }
                continue;
            }
            entries.push(ManifestEntry { path: rel, hash: record });
        }

        let manifest = Manifest::from_entries(entries)?;
        let record = hasher::digest_manifest(algorithm, manifest)?;
        debug!(
            path = %info.path,
            digest = %record.digest,
            nfiles = record.file_count.unwrap_or(0),
            "Hashed directory"
        );
        Ok(record)
    }
}

impl Default for HashEngine {
    fn default() -> Self {
        Self::in_memory()
    }
}
