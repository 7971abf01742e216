//! Error types for the cask repository filesystem.

use crate::tree::path::PathKey;
use std::path::PathBuf;
use thiserror::Error;

/// Object store, codec and hash-state errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object {oid} is missing from the cache")]
    ObjectMissing { oid: String },

    #[error("Manifest {manifest} references missing object {missing}")]
    ManifestInvariantViolation { manifest: String, missing: String },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Invalid object id: {0}")]
    InvalidObjectId(String),

    #[error("Unsupported algorithm: store uses {expected}, record uses {actual}")]
    AlgorithmMismatch { expected: String, actual: String },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Hash state error: {0}")]
    State(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Version-control backend errors
#[derive(Debug, Error)]
pub enum ScmError {
    #[error("Unknown revision: {0}")]
    RevisionNotFound(String),

    #[error("Path not found in tree: {0}")]
    NotFound(PathKey),

    #[error("Not a directory in tree: {0}")]
    NotADirectory(PathKey),

    #[error("SCM backend error: {0}")]
    Backend(String),

    #[error("SCM I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors surfaced by the filesystem views and the hash engine
#[derive(Debug, Error)]
pub enum FsError {
    #[error("Path does not exist: {0}")]
    NotFound(PathKey),

    #[error("Not a directory: {0}")]
    NotADirectory(PathKey),

    #[error("Is a directory: {0}")]
    IsADirectory(PathKey),

    /// Reserved; the core never produces it.
    #[error("Ambiguous path: {0}")]
    AmbiguousPath(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Not a cask repository: {}", .0.display())]
    NotARepository(PathBuf),

    #[error("Read-only view: {0}")]
    ReadOnly(String),

    #[error("Failed to open sub-repository at {}: {source}", path.display())]
    Subrepo {
        path: PathBuf,
        #[source]
        source: Box<FsError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Scm(#[from] ScmError),
}

impl FsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FsError::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the path is absent from every consulted layer.
    pub fn is_not_found(&self) -> bool {
        match self {
            FsError::NotFound(_) | FsError::Scm(ScmError::NotFound(_)) => true,
            FsError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            FsError::Subrepo { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// True when a referenced object is absent from the cache.
    pub fn is_object_missing(&self) -> bool {
        match self {
            FsError::Storage(StorageError::ObjectMissing { .. }) => true,
            FsError::Subrepo { source, .. } => source.is_object_missing(),
            _ => false,
        }
    }
}

impl From<config::ConfigError> for FsError {
    fn from(err: config::ConfigError) -> Self {
        FsError::Config(err.to_string())
    }
}
