//! Per-checkout state under `.dynasync/`
//!
//! ```text
//! .dynasync/
//!   repo.toml     repository name, profile, region
//!   baseline/     last-known committed content per file
//!   index         applied (ts, file) pairs
//!   cursor        incremental-listing watermark
//!   lock          held exclusively while a command runs
//! ```

pub mod apply_index;
pub mod baseline;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::debug;

pub use apply_index::ApplyIndex;
pub use baseline::BaselineStore;

use crate::config::{load_repo_config, save_repo_config, RepoConfig};
use crate::error::SyncError;
use crate::fsutil::{atomic_write, read_optional};
use crate::types::{to_native, MARKER_DIR};

/// Find the repository root containing `start`, walking up the tree
pub fn discover(start: &Path) -> Result<PathBuf, SyncError> {
    for dir in start.ancestors() {
        if dir.join(MARKER_DIR).is_dir() {
            return Ok(dir.to_path_buf());
        }
    }
    Err(SyncError::NotFound(format!(
        "not inside a dynasync repository (no {} directory in {} or its parents)",
        MARKER_DIR,
        start.display()
    )))
}

/// Whether `root` already holds a repository marker
pub fn is_initialized(root: &Path) -> bool {
    root.join(MARKER_DIR).is_dir()
}

/// Create the state directory and repo.toml.
///
/// An existing repo.toml is kept and returned as-is.
pub fn init(root: &Path, config: &RepoConfig) -> Result<RepoConfig, SyncError> {
    let state_dir = root.join(MARKER_DIR);
    std::fs::create_dir_all(state_dir.join("baseline"))?;

    if let Some(existing) = load_repo_config(&state_dir)? {
        debug!(repo = %existing.name, "reusing existing repo.toml");
        return Ok(existing);
    }
    save_repo_config(&state_dir, config)?;
    Ok(config.clone())
}

/// Read repo.toml of an initialized repository
pub fn load_config(root: &Path) -> Result<RepoConfig, SyncError> {
    load_repo_config(&root.join(MARKER_DIR))?.ok_or_else(|| {
        SyncError::NotFound(format!(
            "repository at {} has no {}/repo.toml; run 'dynasync init'",
            root.display(),
            MARKER_DIR
        ))
    })
}

/// Local state with the checkout lock held.
///
/// The lock is released when this is dropped.
pub struct LocalState {
    root: PathBuf,
    baseline: BaselineStore,
    index: ApplyIndex,
    _lock_file: File,
}

impl std::fmt::Debug for LocalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalState")
            .field("root", &self.root)
            .finish()
    }
}

impl LocalState {
    /// Open local state with the exclusive lock (blocking with timeout).
    ///
    /// Retries with exponential backoff until the lock is acquired or
    /// `timeout` expires, which is `SyncError::DbBusy`.
    pub fn open_locked(root: &Path, timeout: Duration) -> Result<Self, SyncError> {
        let state_dir = root.join(MARKER_DIR);
        if !state_dir.is_dir() {
            return Err(SyncError::NotFound(format!(
                "no dynasync repository at {}",
                root.display()
            )));
        }

        let lock_file = File::create(state_dir.join("lock"))?;
        let start = Instant::now();
        let mut delay = Duration::from_millis(10);
        loop {
            match lock_file.try_lock_exclusive() {
                Ok(()) => break,
                Err(_) if start.elapsed() < timeout => {
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(Duration::from_millis(200));
                }
                Err(e) => {
                    return Err(SyncError::DbBusy(format!(
                        "timeout waiting for the lock on {}: {}",
                        state_dir.display(),
                        e
                    )))
                }
            }
        }

        let baseline = BaselineStore::new(state_dir.join("baseline"));
        let index = ApplyIndex::open(&state_dir.join("index"), &state_dir.join("cursor"))?;

        Ok(Self {
            root: root.to_path_buf(),
            baseline,
            index,
            _lock_file: lock_file,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn baseline(&self) -> &BaselineStore {
        &self.baseline
    }

    pub fn index(&self) -> &ApplyIndex {
        &self.index
    }

    /// Working-copy content of `file`, `None` if it does not exist
    pub fn read_working(&self, file: &str) -> Result<Option<Vec<u8>>, SyncError> {
        read_optional(&to_native(&self.root, file))
    }

    /// Replace the working-copy content of `file`, creating directories
    pub fn write_working(&self, file: &str, content: &[u8]) -> Result<(), SyncError> {
        atomic_write(&to_native(&self.root, file), content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn repo_config() -> RepoConfig {
        RepoConfig {
            name: "notes".to_string(),
            profile: None,
            region: None,
        }
    }

    #[test]
    fn test_init_then_discover_from_subdir() {
        let dir = tempdir().unwrap();
        init(dir.path(), &repo_config()).unwrap();

        let sub = dir.path().join("a").join("b");
        std::fs::create_dir_all(&sub).unwrap();
        assert_eq!(discover(&sub).unwrap(), dir.path());
        assert_eq!(load_config(dir.path()).unwrap().name, "notes");
    }

    #[test]
    fn test_init_keeps_existing_config() {
        let dir = tempdir().unwrap();
        init(dir.path(), &repo_config()).unwrap();

        let other = RepoConfig {
            name: "other".to_string(),
            ..repo_config()
        };
        assert_eq!(init(dir.path(), &other).unwrap().name, "notes");
    }

    #[test]
    fn test_discover_outside_repo() {
        let dir = tempdir().unwrap();
        let err = discover(dir.path()).unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        init(dir.path(), &repo_config()).unwrap();

        let held = LocalState::open_locked(dir.path(), Duration::from_secs(1)).unwrap();
        let err = LocalState::open_locked(dir.path(), Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, SyncError::DbBusy(_)));

        drop(held);
        assert!(LocalState::open_locked(dir.path(), Duration::from_millis(50)).is_ok());
    }

    #[test]
    fn test_working_files() {
        let dir = tempdir().unwrap();
        init(dir.path(), &repo_config()).unwrap();
        let state = LocalState::open_locked(dir.path(), Duration::from_secs(1)).unwrap();

        assert_eq!(state.read_working("docs/a.txt").unwrap(), None);
        state.write_working("docs/a.txt", b"hi").unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("docs").join("a.txt")).unwrap(),
            b"hi"
        );
        assert_eq!(state.read_working("docs/a.txt").unwrap(), Some(b"hi".to_vec()));
    }
}
