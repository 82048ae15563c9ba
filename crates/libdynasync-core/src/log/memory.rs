use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::{check_commit, commit_conflict, tag_conflict, CommitLog};
use crate::error::SyncError;
use crate::types::{now_unix_ms, Commit, RepoIndex, Tag};

/// In-process commit log, for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryCommitLog {
    inner: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Keyed by (repo, ts, file) so a range scan is in replay order
    commits: BTreeMap<(String, u64, String), Commit>,
    repos: BTreeMap<String, RepoIndex>,
    tags: BTreeMap<(String, u64), Tag>,
}

impl MemoryCommitLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommitLog for MemoryCommitLog {
    fn append(&self, commit: &Commit) -> Result<(), SyncError> {
        check_commit(commit)?;
        let mut state = self.inner.write();
        if !state.repos.contains_key(&commit.repo) {
            return Err(SyncError::repo_not_found(&commit.repo));
        }

        let key = (commit.repo.clone(), commit.ts_unix_ms, commit.file.clone());
        if state.commits.contains_key(&key) {
            return Err(commit_conflict(commit));
        }
        state.commits.insert(key, commit.clone());
        if let Some(index) = state.repos.get_mut(&commit.repo) {
            index.record(commit);
        }
        Ok(())
    }

    fn list_by_repo(&self, repo: &str, after: Option<u64>) -> Result<Vec<Commit>, SyncError> {
        let start = match after {
            Some(u64::MAX) => return Ok(Vec::new()),
            Some(ts) => ts + 1,
            None => 0,
        };
        let state = self.inner.read();
        Ok(state
            .commits
            .range((repo.to_string(), start, String::new())..)
            .take_while(|((r, _, _), _)| r == repo)
            .map(|(_, c)| c.clone())
            .collect())
    }

    fn get(&self, repo: &str, file: &str, ts: u64) -> Result<Option<Commit>, SyncError> {
        let key = (repo.to_string(), ts, file.to_string());
        Ok(self.inner.read().commits.get(&key).cloned())
    }

    fn create_repo(&self, repo: &str, owner: &str) -> Result<RepoIndex, SyncError> {
        crate::types::validate_repo_name(repo).map_err(SyncError::InvalidArgs)?;
        let mut state = self.inner.write();
        let index = state
            .repos
            .entry(repo.to_string())
            .or_insert_with(|| RepoIndex::new(repo, owner, now_unix_ms()));
        Ok(index.clone())
    }

    fn repo_index(&self, repo: &str) -> Result<Option<RepoIndex>, SyncError> {
        Ok(self.inner.read().repos.get(repo).cloned())
    }

    fn append_tag(&self, tag: &Tag) -> Result<(), SyncError> {
        let mut state = self.inner.write();
        if !state.repos.contains_key(&tag.repo) {
            return Err(SyncError::repo_not_found(&tag.repo));
        }
        let key = (tag.repo.clone(), tag.ts_unix_ms);
        if state.tags.contains_key(&key) {
            return Err(tag_conflict(tag));
        }
        state.tags.insert(key, tag.clone());
        Ok(())
    }

    fn list_tags(&self, repo: &str) -> Result<Vec<Tag>, SyncError> {
        let state = self.inner.read();
        Ok(state
            .tags
            .range((repo.to_string(), 0)..)
            .take_while(|((r, _), _)| r == repo)
            .map(|(_, t)| t.clone())
            .collect())
    }
}
