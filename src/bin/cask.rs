//! Cask CLI Binary
//!
//! Thin command-line front end over the repository view.

use anyhow::{Context, Result};
use cask::config::ConfigLoader;
use cask::fs::{FileSystemView, RepoFileSystem, RepoFsOptions, WalkOptions};
use cask::logging::{init_logging, LoggingConfig};
use cask::repo::{OpenOptions, RepoContext};
use cask::stage;
use cask::{Algorithm, FsError};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "cask", version, about = "Content-addressed data versioning")]
struct Cli {
    /// Repository root
    #[arg(short = 'C', long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Inspect a committed revision instead of the working directory
    #[arg(long, global = true)]
    rev: Option<String>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a repository
    Init {
        dir: Option<PathBuf>,
    },
    /// List the repository tree
    Walk {
        path: Option<String>,
        /// Descend into sub-repositories
        #[arg(long)]
        subrepos: bool,
        /// Include metafiles and ignore files
        #[arg(long)]
        metadata_files: bool,
    },
    /// Print the content hash of a path
    Hash {
        path: String,
        #[arg(long)]
        algorithm: Option<Algorithm>,
    },
    /// Show what the view knows about a path
    Info {
        path: String,
    },
    /// Compare a path with its recorded entry
    Status {
        path: String,
    },
    /// Track paths: store their content and write metafiles
    Add {
        #[arg(required = true)]
        paths: Vec<String>,
        /// Worker threads
        #[arg(short, long)]
        jobs: Option<usize>,
    },
}

fn main() {
    let cli = Cli::parse();

    let logging_config = build_logging_config(&cli);
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(&cli) {
        error!("Command failed: {:#}", e);
        eprintln!("{}", describe(&e));
        process::exit(1);
    }
}

/// Logging settings from the repository configuration and `--log-level`.
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    let mut config = ConfigLoader::load(&cli.repo)
        .map(|c| c.logging)
        .unwrap_or_default();
    if let Some(level) = &cli.log_level {
        config.level = level.clone();
    }
    config
}

/// User-facing message for a failure
fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<FsError>() {
        Some(e) if e.is_not_found() => format!("error: path does not exist ({})", e),
        Some(e) if e.is_object_missing() => format!(
            "warning: cache is missing an object ({}); fetch the data again to repair it",
            e
        ),
        _ => format!("error: {:#}", err),
    }
}

fn open_view(cli: &Cli, subrepos: Option<bool>) -> Result<RepoFileSystem> {
    let mut options = OpenOptions::new();
    if let Some(rev) = &cli.rev {
        options = options.rev(rev.clone());
    }
    let context = RepoContext::open_with(&cli.repo, options)
        .with_context(|| format!("cannot open repository at {}", cli.repo.display()))?;
    let enabled = subrepos.unwrap_or(context.config().core.subrepos);
    let view = RepoFileSystem::with_options(Arc::new(context), RepoFsOptions::default().with_subrepos(enabled))?;
    Ok(view)
}

/// Key of a command-line path, relative to the working directory.
fn key(view: &RepoFileSystem, raw: &str) -> Result<cask::PathKey, FsError> {
    let path = Path::new(raw);
    if path.is_absolute() {
        return view.key(path);
    }
    let cwd = std::env::current_dir().map_err(|e| FsError::Io {
        path: PathBuf::from("."),
        source: e,
    })?;
    let absolute = cask::tree::path::canonicalize_root(&cwd.join(path))?;
    // Outside the repository, fall back to a root-relative reading.
    view.key(&absolute).or_else(|_| view.key(path))
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Init { dir } => {
            let root = RepoContext::init(dir.as_deref().unwrap_or(cli.repo.as_path()))?;
            println!("Initialized cask repository in {}", root.display());
        }
        Commands::Walk {
            path,
            subrepos,
            metadata_files,
        } => {
            let view = open_view(cli, Some(*subrepos))?;
            let top = match path {
                Some(raw) => key(&view, raw)?,
                None => cask::PathKey::root(),
            };
            let options = WalkOptions::new()
                .recurse_subrepos(*subrepos)
                .include_metadata_files(*metadata_files)
                .strict();
            for entry in view.walk(&top, options) {
                let entry = entry?;
                for name in &entry.dirs {
                    println!("{}/", entry.dir.child(name).as_posix());
                }
                for name in &entry.files {
                    println!("{}", entry.dir.child(name).as_posix());
                }
            }
        }
        Commands::Hash { path, algorithm } => {
            let view = open_view(cli, None)?;
            let path = key(&view, path)?;
            let algorithm = algorithm.unwrap_or(view.context().config().core.algorithm);
            let record = view.get_hash(&path, algorithm)?;
            println!("{}  {}", record.value(), path);
        }
        Commands::Info { path } => {
            let view = open_view(cli, None)?;
            let path = key(&view, path)?;
            let info = view.info(&path)?;
            println!("path:    {}", info.path);
            println!("type:    {:?}", info.kind);
            println!("layer:   {:?}", info.layer);
            if let Some(size) = info.size {
                println!("size:    {}", size);
            }
            if let Some(hash) = &info.hash {
                println!("hash:    {}", hash.value());
            }
            println!("tracked: {}", view.is_tracked(&path)?);
        }
        Commands::Status { path } => {
            let view = open_view(cli, None)?;
            let path = key(&view, path)?;
            let state = view.dirty_state(&path)?;
            println!("{:?}: {}", state, path);
        }
        Commands::Add { paths, jobs } => {
            let view = open_view(cli, None)?;
            let jobs = jobs.unwrap_or_else(|| view.context().config().core.jobs());
            for raw in paths {
                let path = key(&view, raw)?;
                let outcome = stage::add(&view, &path, jobs)?;
                info!(path = %outcome.path, "Added");
                println!("{}  {}", outcome.record.value(), outcome.metafile);
            }
        }
    }
    Ok(())
}
