//! Per-state working directories and cleanup policies.
//!
//! A run for state `42` works below `<root>/42/`: the primary dump is written
//! to `<root>/42/pg/` and the conversion output to `<root>/42/ng/`.

use planet_dumper_common::{CleanupMode, Result, SequenceNumber};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

const PRIMARY_DIR: &str = "pg";
const CONVERSION_DIR: &str = "ng";

/// Directories prepared for a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectories {
    pub state_dir: PathBuf,
    pub primary_dir: PathBuf,
    pub conversion_dir: PathBuf,
}

/// Manages the working root shared by all runs.
///
/// # Example
///
/// ```
/// use planet_dumper_common::SequenceNumber;
/// use planet_dumper_exec::WorkspaceManager;
/// use std::path::Path;
///
/// let workspace = WorkspaceManager::new("/work");
/// let state = SequenceNumber::new(42);
/// assert_eq!(workspace.primary_dir(state), Path::new("/work/42/pg"));
/// assert_eq!(workspace.conversion_dir(state), Path::new("/work/42/ng"));
/// ```
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    /// A relative `root` is resolved against the current directory once, so
    /// paths handed to tools stay valid whatever directory they run in.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: absolute_root(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self, state: SequenceNumber) -> PathBuf {
        self.root.join(state.to_string())
    }

    pub fn primary_dir(&self, state: SequenceNumber) -> PathBuf {
        self.state_dir(state).join(PRIMARY_DIR)
    }

    pub fn conversion_dir(&self, state: SequenceNumber) -> PathBuf {
        self.state_dir(state).join(CONVERSION_DIR)
    }

    /// Create the directory tree for `state`. Existing directories are kept.
    pub async fn prepare(&self, state: SequenceNumber) -> Result<RunDirectories> {
        let dirs = RunDirectories {
            state_dir: self.state_dir(state),
            primary_dir: self.primary_dir(state),
            conversion_dir: self.conversion_dir(state),
        };
        tokio::fs::create_dir_all(&dirs.primary_dir).await?;
        tokio::fs::create_dir_all(&dirs.conversion_dir).await?;
        debug!(state_dir = %dirs.state_dir.display(), "prepared working directories");
        Ok(dirs)
    }

    /// Apply the part of `mode` that runs before any stage.
    pub async fn apply_pre_cleanup(&self, mode: CleanupMode, state: SequenceNumber) -> Result<()> {
        if mode == CleanupMode::PreCleanOthers {
            self.clean_others(state).await?;
        }
        Ok(())
    }

    /// Apply the part of `mode` that runs once the run has finished,
    /// whatever its outcome.
    pub async fn apply_post_cleanup(&self, mode: CleanupMode, state: SequenceNumber) -> Result<()> {
        match mode {
            CleanupMode::None | CleanupMode::PreCleanOthers => Ok(()),
            CleanupMode::PostCleanOthers => self.clean_others(state).await,
            CleanupMode::PostCleanWorkdir => {
                info!(state = %state, "removing state working directory");
                remove_directory(&self.state_dir(state)).await
            }
            CleanupMode::PostCleanAll => {
                info!(root = %self.root.display(), "emptying working root");
                clear_directory(&self.root, &[]).await
            }
        }
    }

    async fn clean_others(&self, state: SequenceNumber) -> Result<()> {
        info!(root = %self.root.display(), keep = %state, "removing other state directories");
        let keep = state.to_string();
        clear_directory(&self.root, &[keep.as_str()]).await
    }
}

fn absolute_root(root: PathBuf) -> PathBuf {
    let root = if root.is_absolute() {
        root
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(root),
            Err(e) => {
                warn!(root = %root.display(), error = %e, "cannot resolve relative working root");
                return root;
            }
        }
    };
    root.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Remove every entry of `dir` whose file name is not listed in `except`.
///
/// A missing directory is a no-op.
pub async fn clear_directory(dir: &Path, except: &[&str]) -> Result<()> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if except.iter().any(|keep| name.as_os_str() == *keep) {
            continue;
        }

        let path = entry.path();
        debug!(path = %path.display(), "removing");
        if entry.file_type().await?.is_dir() {
            remove_directory(&path).await?;
        } else {
            match tokio::fs::remove_file(&path).await {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
    }

    Ok(())
}

/// Remove `dir` and everything below it. A missing directory is a no-op.
pub async fn remove_directory(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// The most recently modified regular file in `dir` with the given
/// extension, if any.
pub async fn find_latest_artifact(dir: &Path, extension: &str) -> Result<Option<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut latest: Option<(SystemTime, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }

        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }

        let modified = metadata.modified()?;
        let newer = match &latest {
            Some((t, _)) => modified > *t,
            None => true,
        };
        if newer {
            latest = Some((modified, path));
        }
    }

    Ok(latest.map(|(_, path)| path))
}
