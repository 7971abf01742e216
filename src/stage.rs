//! Bulk operations over the repository view
//!
//! Hashing many paths, saving a record's content into the object store and
//! tracking a working-directory path. Parallel work runs on a fixed pool of
//! scoped worker threads fed through a channel.

use crate::error::FsError;
use crate::fs::{FileSystemView, RepoFileSystem};
use crate::ignore;
use crate::store::codec::{self, MetaFile, OutRecord, METAFILE_SUFFIX};
use crate::store::{ObjectSource, ObjectStore};
use crate::tree::engine::HashEngine;
use crate::tree::hasher::Algorithm;
use crate::tree::node::HashRecord;
use crate::tree::path::PathKey;
use crossbeam_channel::unbounded;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Run `work` over `items` on `jobs` threads. Results come back in input
/// order. Once `stop` is set, remaining items report `Cancelled`.
fn run_pool<T, R, F>(items: &[T], jobs: usize, stop: &AtomicBool, work: F) -> Vec<Result<R, FsError>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R, FsError> + Sync,
{
    let jobs = jobs.clamp(1, items.len().max(1));
    let (work_tx, work_rx) = unbounded::<(usize, &T)>();
    let (done_tx, done_rx) = unbounded::<(usize, Result<R, FsError>)>();
    for item in items.iter().enumerate() {
        // Both ends live in this frame; the send cannot fail.
        let _ = work_tx.send(item);
    }
    drop(work_tx);

    thread::scope(|scope| {
        for _ in 0..jobs {
            let work_rx = work_rx.clone();
            let done_tx = done_tx.clone();
            let work = &work;
            scope.spawn(move || {
                for (index, item) in work_rx.iter() {
                    let result = if stop.load(Ordering::Acquire) {
                        Err(FsError::Cancelled)
                    } else {
                        work(item)
                    };
                    if done_tx.send((index, result)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(done_tx);

    let mut results: Vec<Option<Result<R, FsError>>> = (0..items.len()).map(|_| None).collect();
    for (index, result) in done_rx.try_iter() {
        results[index] = Some(result);
    }
    results
        .into_iter()
        .map(|result| result.unwrap_or_else(|| Err(FsError::Cancelled)))
        .collect()
}

/// Hash independent paths on `jobs` worker threads.
pub fn hash_many(
    engine: &HashEngine,
    view: &dyn FileSystemView,
    paths: &[PathKey],
    algorithm: Algorithm,
    jobs: usize,
) -> Vec<Result<HashRecord, FsError>> {
    let start = Instant::now();
    let never = AtomicBool::new(false);
    let results = run_pool(paths, jobs, &never, |path| engine.get_hash(view, path, algorithm));
    debug!(
        paths = paths.len(),
        jobs,
        duration_ms = start.elapsed().as_millis(),
        "Hashed paths"
    );
    results
}

/// Outcome of [`save`]
#[derive(Debug, Clone)]
pub struct SaveReport {
    pub record: HashRecord,
    /// Objects written to the store
    pub transferred: usize,
    /// Objects already present
    pub skipped: usize,
}

/// Store the content behind `record`, read from `path` in `view`.
///
/// Directory leaves are copied on a pool of `jobs` threads; the first
/// failure stops the pool and is returned. The manifest is stored last, so
/// it is only present once every leaf is.
#[instrument(skip(store, view, record), fields(value = %record.value()))]
pub fn save(
    store: &dyn ObjectStore,
    view: &dyn FileSystemView,
    path: &PathKey,
    record: &HashRecord,
    jobs: usize,
) -> Result<SaveReport, FsError> {
    if !record.is_dir() {
        let present = store.contains(&record.value());
        if !present {
            store.put(ObjectSource::Hashed {
                reader: view.open(path)?,
                record,
            })?;
        }
        return Ok(SaveReport {
            record: record.clone(),
            transferred: usize::from(!present),
            skipped: usize::from(present),
        });
    }

    let manifest = store.load_manifest(record)?;
    let stop = AtomicBool::new(false);
    let results = run_pool(manifest.entries(), jobs, &stop, |entry| {
        let oid = entry.hash.value();
        if store.contains(&oid) {
            return Ok(false);
        }
        let leaf = path.concat(&entry.path);
        let outcome = view.open(&leaf).and_then(|reader| {
            store
                .put(ObjectSource::Hashed {
                    reader,
                    record: &entry.hash,
                })
                .map_err(FsError::from)
        });
        if outcome.is_err() {
            stop.store(true, Ordering::Release);
        }
        outcome.map(|_| true)
    });

    let mut transferred = 0;
    let mut skipped = 0;
    let mut cancelled = 0;
    let mut failure = None;
    for result in results {
        match result {
            Ok(true) => transferred += 1,
            Ok(false) => skipped += 1,
            Err(FsError::Cancelled) => cancelled += 1,
            Err(e) => {
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }
    }
    if let Some(e) = failure {
        warn!(path = %path, cancelled, error = %e, "Save aborted");
        return Err(e);
    }

    let stored = store.put(ObjectSource::Manifest(&manifest))?;
    info!(path = %path, oid = %stored.value(), transferred, skipped, "Directory saved");
    Ok(SaveReport {
        record: stored,
        transferred,
        skipped,
    })
}

/// Result of tracking a path with [`add`]
#[derive(Debug, Clone)]
pub struct AddOutcome {
    pub path: PathKey,
    pub metafile: PathKey,
    pub record: HashRecord,
    /// True when a `.gitignore` entry was appended
    pub gitignored: bool,
}

/// Hash a working-directory path, store its content and record it in a
/// `<name>.cask` metafile next to it.
#[instrument(skip(repo), fields(root = %repo.root().display()))]
pub fn add(repo: &RepoFileSystem, path: &PathKey, jobs: usize) -> Result<AddOutcome, FsError> {
    let context = repo.context();
    if let Some(rev) = context.rev() {
        return Err(FsError::ReadOnly(format!(
            "view is pinned to revision {}",
            rev
        )));
    }
    let (Some(name), Some(parent)) = (path.name(), path.parent()) else {
        return Err(FsError::InvalidPath(
            "the repository root cannot be tracked".to_string(),
        ));
    };
    if let Some(boundary) = path.prefixes().find(|prefix| repo.is_boundary(prefix)) {
        return Err(FsError::InvalidPath(format!(
            "{} belongs to the sub-repository at {}",
            path, boundary
        )));
    }

    let start = Instant::now();
    let working = repo.working();
    let info = working.info(path)?;
    let record = repo
        .engine()
        .hash_entry(working, &info, context.config().core.algorithm)?;
    let store = context.store();
    let report = save(store.as_ref(), working, path, &record, jobs)?;

    let metafile = parent.child(&format!("{}{}", name, METAFILE_SUFFIX));
    let meta = MetaFile {
        outs: vec![OutRecord::from_record(name, &record)],
    };
    let metafile_path = metafile.to_path(context.root());
    fs::write(&metafile_path, codec::render_metafile(&meta)?)
        .map_err(|e| FsError::io(&metafile_path, e))?;

    let scm_path = context.scm_prefix().concat(path);
    let gitignored = if context.scm().is_ignored(&scm_path) {
        false
    } else {
        ignore::append_gitignore_entry(&parent.to_path(context.root()), name)?
    };
    repo.tracked().reset();

    info!(
        path = %path,
        value = %record.value(),
        transferred = report.transferred,
        duration_ms = start.elapsed().as_millis(),
        "Tracked path"
    );
    Ok(AddOutcome {
        path: path.clone(),
        metafile,
        record,
        gitignored,
    })
}
