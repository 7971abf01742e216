//! Cask: Content-Addressed Data Versioning
//!
//! Versions large data files next to a version-controlled history. Content
//! is addressed by hash and kept in a local object store; small metafiles
//! committed alongside the code record which hash each tracked path has.
//! The repository view presents the working directory, the recorded entries
//! and nested repositories as one filesystem.

pub mod concurrency;
pub mod config;
pub mod error;
pub mod fs;
pub mod ignore;
pub mod logging;
pub mod repo;
pub mod scm;
pub mod stage;
pub mod store;
pub mod tree;
pub mod types;

pub use error::{FsError, ScmError, StorageError};
pub use fs::{FileSystemView, RepoFileSystem, RepoFsOptions, WalkEntry, WalkOptions};
pub use repo::{OpenOptions, RepoContext};
pub use tree::hasher::Algorithm;
pub use tree::node::HashRecord;
pub use tree::path::PathKey;
pub use types::DirtyState;
