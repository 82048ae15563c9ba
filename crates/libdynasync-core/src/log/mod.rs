//! Remote commit log
//!
//! The log is an append-only table of commits keyed by
//! `(repo, file, ts_unix_ms)`, plus a per-repository index and tags. Keys are
//! inserted conditionally: a second write to an existing key is rejected with
//! [`SyncError::Conflict`] and never overwrites.

pub mod memory;
pub mod sled_log;

pub use memory::MemoryCommitLog;
pub use sled_log::SledCommitLog;

use crate::error::SyncError;
use crate::types::{validate_repo_name, validate_repo_path, Commit, RepoIndex, Tag};

/// Storage backend for commits, tags and repository indexes.
///
/// Shared by all per-file workers of a command, so implementations must be
/// safe to call from several threads at once.
pub trait CommitLog: Send + Sync {
    /// Insert a new commit; `Conflict` if its key is taken, `NotFound` if the
    /// repository does not exist
    fn append(&self, commit: &Commit) -> Result<(), SyncError>;

    /// Commits of `repo` ordered by `(ts, file)`; with `after`, only those
    /// strictly newer
    fn list_by_repo(&self, repo: &str, after: Option<u64>) -> Result<Vec<Commit>, SyncError>;

    fn get(&self, repo: &str, file: &str, ts: u64) -> Result<Option<Commit>, SyncError>;

    fn repo_exists(&self, repo: &str) -> Result<bool, SyncError> {
        Ok(self.repo_index(repo)?.is_some())
    }

    /// Create the repository index; returns the existing one if present
    fn create_repo(&self, repo: &str, owner: &str) -> Result<RepoIndex, SyncError>;

    fn repo_index(&self, repo: &str) -> Result<Option<RepoIndex>, SyncError>;

    /// Insert a tag; same conflict rules as commits
    fn append_tag(&self, tag: &Tag) -> Result<(), SyncError>;

    /// Tags of `repo` in timestamp order
    fn list_tags(&self, repo: &str) -> Result<Vec<Tag>, SyncError>;
}

/// Reject commits that could not have come from a well-behaved client
pub(crate) fn check_commit(commit: &Commit) -> Result<(), SyncError> {
    validate_repo_name(&commit.repo).map_err(SyncError::InvalidArgs)?;
    validate_repo_path(&commit.file)
}

pub(crate) fn commit_conflict(commit: &Commit) -> SyncError {
    SyncError::Conflict(format!(
        "commit for '{}' at {} already exists in repo '{}'",
        commit.file, commit.ts_unix_ms, commit.repo
    ))
}

pub(crate) fn tag_conflict(tag: &Tag) -> SyncError {
    SyncError::Conflict(format!(
        "tag at {} already exists in repo '{}'",
        tag.ts_unix_ms, tag.repo
    ))
}
