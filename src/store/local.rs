//! Filesystem-backed object store
//!
//! Objects live at `<root>/<oid[0..2]>/<oid[2..]>`. Writes land in
//! `<root>/tmp` first and are renamed into place, so a partially written
//! object is never visible under its id.

use crate::error::StorageError;
use crate::store::{ObjectSource, ObjectStore};
use crate::tree::hasher::{self, Algorithm, StreamHasher, CHUNK_SIZE};
use crate::tree::node::{HashRecord, Manifest, DIR_SUFFIX};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

const TMP_DIR: &str = "tmp";

/// Local content-addressable store
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    algorithm: Algorithm,
    /// Link strategies handed down to sub-repositories
    cache_types: Vec<String>,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, algorithm: Algorithm) -> Self {
        Self {
            root: root.into(),
            algorithm,
            cache_types: Vec::new(),
        }
    }

    pub fn with_cache_types(mut self, cache_types: Vec<String>) -> Self {
        self.cache_types = cache_types;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_types(&self) -> &[String] {
        &self.cache_types
    }

    /// Location of `oid`, validating its shape first.
    pub fn object_path(&self, oid: &str) -> Result<PathBuf, StorageError> {
        let digest = oid.strip_suffix(DIR_SUFFIX).unwrap_or(oid);
        if !hasher::is_valid_digest(self.algorithm, digest) {
            return Err(StorageError::InvalidObjectId(oid.to_string()));
        }
        Ok(self.root.join(&oid[..2]).join(&oid[2..]))
    }

    fn tmp_file(&self) -> Result<NamedTempFile, StorageError> {
        let tmp_dir = self.root.join(TMP_DIR);
        fs::create_dir_all(&tmp_dir)?;
        Ok(NamedTempFile::new_in(tmp_dir)?)
    }

    fn check_algorithm(&self, record: &HashRecord) -> Result<(), StorageError> {
        if record.algorithm != self.algorithm {
            return Err(StorageError::AlgorithmMismatch {
                expected: self.algorithm.to_string(),
                actual: record.algorithm.to_string(),
            });
        }
        Ok(())
    }

    /// Move a completed temp file into place unless the object already exists.
    fn commit(&self, tmp: NamedTempFile, oid: &str) -> Result<(), StorageError> {
        let dest = self.object_path(oid)?;
        if dest.exists() {
            debug!(%oid, "Object already cached");
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        tmp.persist(&dest).map_err(|e| StorageError::IoError(e.error))?;
        debug!(%oid, "Object stored");
        Ok(())
    }

    /// Copy `reader` into a temp file while hashing it.
    fn ingest(&self, reader: &mut dyn Read) -> Result<(NamedTempFile, String, u64), StorageError> {
        let mut tmp = self.tmp_file()?;
        let mut hasher = StreamHasher::new(self.algorithm);
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut size = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            hasher.update(&buf[..n]);
            tmp.write_all(&buf[..n])?;
            size += n as u64;
        }
        tmp.as_file().sync_all()?;
        Ok((tmp, hasher.finalize_hex(), size))
    }

    fn put_bytes(&self, bytes: &[u8], record: HashRecord) -> Result<HashRecord, StorageError> {
        let oid = record.value();
        if self.contains(&oid) {
            debug!(%oid, "Object already cached");
            return Ok(record);
        }
        let mut tmp = self.tmp_file()?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        self.commit(tmp, &oid)?;
        Ok(record)
    }

    fn put_manifest(&self, manifest: &Manifest) -> Result<HashRecord, StorageError> {
        let bytes = hasher::manifest_bytes(self.algorithm, manifest)?;
        let digest = hasher::hash_bytes(self.algorithm, &bytes);
        let oid = format!("{}{}", digest, DIR_SUFFIX);

        for entry in manifest.entries() {
            self.check_algorithm(&entry.hash)?;
            let leaf = entry.hash.value();
            if !self.contains(&leaf) {
                return Err(StorageError::ManifestInvariantViolation {
                    manifest: oid,
                    missing: leaf,
                });
            }
        }

        let record = HashRecord::directory(self.algorithm, digest, std::sync::Arc::new(manifest.clone()));
        self.put_bytes(&bytes, record)
    }
}

impl ObjectStore for LocalObjectStore {
    fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn contains(&self, oid: &str) -> bool {
        self.object_path(oid).map(|p| p.is_file()).unwrap_or(false)
    }

    fn open(&self, oid: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        let path = self.object_path(oid)?;
        match File::open(&path) {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::ObjectMissing {
                oid: oid.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, source), fields(cache = %self.root.display()))]
    fn put(&self, source: ObjectSource<'_>) -> Result<HashRecord, StorageError> {
        match source {
            ObjectSource::Bytes(bytes) => {
                let digest = hasher::hash_bytes(self.algorithm, bytes);
                let record = HashRecord::file(self.algorithm, digest).with_size(bytes.len() as u64);
                self.put_bytes(bytes, record)
            }
            ObjectSource::File(path) => {
                let mut file = BufReader::new(File::open(path)?);
                let (tmp, digest, size) = self.ingest(&mut file)?;
                let record = HashRecord::file(self.algorithm, digest).with_size(size);
                self.commit(tmp, &record.value())?;
                Ok(record)
            }
            ObjectSource::Hashed { mut reader, record } => {
                self.check_algorithm(record)?;
                if record.is_dir() {
                    return Err(StorageError::Codec(format!(
                        "directory {} must be stored through its manifest",
                        record.value()
                    )));
                }
                if self.contains(&record.value()) {
                    debug!(oid = %record.value(), "Object already cached");
                    return Ok(record.clone());
                }
                let (tmp, digest, size) = self.ingest(&mut reader)?;
                if digest != record.digest {
                    return Err(StorageError::HashMismatch {
                        expected: record.digest.clone(),
                        actual: digest,
                    });
                }
                self.commit(tmp, &record.value())?;
                Ok(record.clone().with_size(size))
            }
            ObjectSource::Manifest(manifest) => self.put_manifest(manifest),
        }
    }
}
