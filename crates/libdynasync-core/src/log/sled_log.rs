use std::fs::File;
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::debug;

use super::{check_commit, commit_conflict, tag_conflict, CommitLog};
use crate::error::SyncError;
use crate::types::{now_unix_ms, validate_repo_name, Commit, RepoIndex, Tag};

/// Commit log backed by sled, shared through a directory.
///
/// Trees:
/// - `commits`: `repo 0x00 ts_be file` -> commit JSON
/// - `repos`: `repo` -> repo index JSON
/// - `tags`: `repo 0x00 ts_be` -> tag JSON
///
/// The big-endian timestamp makes a prefix scan come out in replay order,
/// and the whole key is the conditional-insert key.
///
/// A `.lock` file next to the store is held exclusively for the lifetime of
/// this struct, so only one process uses the log at a time; others wait up
/// to their timeout.
pub struct SledCommitLog {
    db: sled::Db,
    commits: sled::Tree,
    repos: sled::Tree,
    tags: sled::Tree,
    /// flock released on drop
    _lock_file: File,
}

impl std::fmt::Debug for SledCommitLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledCommitLog").finish_non_exhaustive()
    }
}

impl SledCommitLog {
    /// Open or create the log at `path`, waiting up to `timeout` for other
    /// processes to release it.
    ///
    /// Retries with exponential backoff. Returns `SyncError::Timeout` if the
    /// lock is still held when the timeout expires.
    pub fn open(path: &Path, timeout: Duration) -> Result<Self, SyncError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_path = path.with_extension("lock");
        let lock_file = File::create(&lock_path)?;

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
                    return Err(SyncError::Timeout(format!(
                        "remote log at {} still in use after {:?}: {}",
                        path.display(),
                        timeout,
                        e
                    )))
                }
            }
        }

        let db = sled::open(path)?;
        let commits = db.open_tree("commits")?;
        let repos = db.open_tree("repos")?;
        let tags = db.open_tree("tags")?;
        debug!(path = %path.display(), "opened remote log");

        Ok(Self {
            db,
            commits,
            repos,
            tags,
            _lock_file: lock_file,
        })
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<(), SyncError> {
        self.db.flush()?;
        Ok(())
    }

    /// Apply `update` to a repo index with compare-and-swap, retrying if
    /// another writer got there first
    fn update_index(
        &self,
        repo: &str,
        update: impl Fn(&mut RepoIndex),
    ) -> Result<(), SyncError> {
        loop {
            let current = self
                .repos
                .get(repo.as_bytes())?
                .ok_or_else(|| SyncError::repo_not_found(repo))?;
            let mut index: RepoIndex = serde_json::from_slice(&current)?;
            update(&mut index);
            let next = serde_json::to_vec(&index)?;

            match self
                .repos
                .compare_and_swap(repo.as_bytes(), Some(&current[..]), Some(next))?
            {
                Ok(()) => return Ok(()),
                Err(_) => continue,
            }
        }
    }
}

impl CommitLog for SledCommitLog {
    fn append(&self, commit: &Commit) -> Result<(), SyncError> {
        check_commit(commit)?;
        if !self.repos.contains_key(commit.repo.as_bytes())? {
            return Err(SyncError::repo_not_found(&commit.repo));
        }

        let key = commit_key(&commit.repo, commit.ts_unix_ms, &commit.file);
        let value = serde_json::to_vec(commit)?;
        if self
            .commits
            .compare_and_swap(&key, None::<&[u8]>, Some(value))?
            .is_err()
        {
            return Err(commit_conflict(commit));
        }

        self.update_index(&commit.repo, |index| index.record(commit))?;
        self.flush()
    }

    fn list_by_repo(&self, repo: &str, after: Option<u64>) -> Result<Vec<Commit>, SyncError> {
        let prefix = repo_prefix(repo);
        let start = match after {
            Some(u64::MAX) => return Ok(Vec::new()),
            Some(ts) => ts_key(repo, ts + 1),
            None => prefix.clone(),
        };

        let mut commits = Vec::new();
        for result in self.commits.range(start..) {
            let (key, value) = result?;
            if !key.starts_with(&prefix) {
                break;
            }
            commits.push(serde_json::from_slice(&value)?);
        }
        Ok(commits)
    }

    fn get(&self, repo: &str, file: &str, ts: u64) -> Result<Option<Commit>, SyncError> {
        match self.commits.get(commit_key(repo, ts, file))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn repo_exists(&self, repo: &str) -> Result<bool, SyncError> {
        Ok(self.repos.contains_key(repo.as_bytes())?)
    }

    fn create_repo(&self, repo: &str, owner: &str) -> Result<RepoIndex, SyncError> {
        validate_repo_name(repo).map_err(SyncError::InvalidArgs)?;
        let index = RepoIndex::new(repo, owner, now_unix_ms());
        let value = serde_json::to_vec(&index)?;

        match self
            .repos
            .compare_and_swap(repo.as_bytes(), None::<&[u8]>, Some(value))?
        {
            Ok(()) => {
                self.flush()?;
                Ok(index)
            }
            Err(_) => self
                .repo_index(repo)?
                .ok_or_else(|| SyncError::Internal(format!("repo '{}' vanished", repo))),
        }
    }

    fn repo_index(&self, repo: &str) -> Result<Option<RepoIndex>, SyncError> {
        match self.repos.get(repo.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn append_tag(&self, tag: &Tag) -> Result<(), SyncError> {
        if !self.repos.contains_key(tag.repo.as_bytes())? {
            return Err(SyncError::repo_not_found(&tag.repo));
        }
        let value = serde_json::to_vec(tag)?;
        if self
            .tags
            .compare_and_swap(ts_key(&tag.repo, tag.ts_unix_ms), None::<&[u8]>, Some(value))?
            .is_err()
        {
            return Err(tag_conflict(tag));
        }
        self.flush()
    }

    fn list_tags(&self, repo: &str) -> Result<Vec<Tag>, SyncError> {
        let mut tags = Vec::new();
        for result in self.tags.scan_prefix(repo_prefix(repo)) {
            let (_, value) = result?;
            tags.push(serde_json::from_slice(&value)?);
        }
        Ok(tags)
    }
}

// Key construction helpers

fn repo_prefix(repo: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(repo.len() + 1);
    key.extend_from_slice(repo.as_bytes());
    key.push(0);
    key
}

fn ts_key(repo: &str, ts: u64) -> Vec<u8> {
    let mut key = repo_prefix(repo);
    key.extend_from_slice(&ts.to_be_bytes());
    key
}

fn commit_key(repo: &str, ts: u64, file: &str) -> Vec<u8> {
    let mut key = ts_key(repo, ts);
    key.extend_from_slice(file.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::contract;
    use tempfile::tempdir;

    fn open(dir: &Path) -> SledCommitLog {
        SledCommitLog::open(&dir.join("log.sled"), Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_append_requires_repo() {
        let dir = tempdir().unwrap();
        contract::append_requires_repo(&open(dir.path()));
    }

    #[test]
    fn test_duplicate_key_is_rejected() {
        let dir = tempdir().unwrap();
        contract::duplicate_key_is_rejected(&open(dir.path()));
    }

    #[test]
    fn test_listing_is_ordered_and_incremental() {
        let dir = tempdir().unwrap();
        contract::listing_is_ordered_and_incremental(&open(dir.path()));
    }

    #[test]
    fn test_create_repo_is_idempotent() {
        let dir = tempdir().unwrap();
        contract::create_repo_is_idempotent(&open(dir.path()));
    }

    #[test]
    fn test_tags() {
        let dir = tempdir().unwrap();
        contract::tags(&open(dir.path()));
    }

    #[test]
    fn test_rejects_unsafe_paths() {
        let dir = tempdir().unwrap();
        contract::rejects_unsafe_paths(&open(dir.path()));
    }

    #[test]
    fn test_commits_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let log = open(dir.path());
            log.create_repo("notes", "tester").unwrap();
            log.append(&contract::commit("notes", "a.txt", 7)).unwrap();
        }

        let log = open(dir.path());
        assert_eq!(log.list_by_repo("notes", None).unwrap().len(), 1);
        assert_eq!(log.repo_index("notes").unwrap().unwrap().commit_count, 1);
    }

    #[test]
    fn test_open_times_out_while_held() {
        let dir = tempdir().unwrap();
        let _held = open(dir.path());

        let err = SledCommitLog::open(&dir.path().join("log.sled"), Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, SyncError::Timeout(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::IoFailure);
    }

    #[test]
    fn test_repo_prefixes_do_not_bleed() {
        let dir = tempdir().unwrap();
        let log = open(dir.path());
        log.create_repo("a", "t").unwrap();
        log.create_repo("a-b", "t").unwrap();
        log.append(&contract::commit("a", "x", 1)).unwrap();
        log.append(&contract::commit("a-b", "x", 1)).unwrap();

        assert_eq!(log.list_by_repo("a", None).unwrap().len(), 1);
        assert_eq!(log.list_by_repo("a-b", None).unwrap().len(), 1);
    }
}
