use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// An immutable record in the remote commit log.
///
/// For a fixed `(repo, file)`, commits ordered by `ts_unix_ms` form a chain:
/// each `patch` transforms the content produced by all earlier commits of
/// that file into the content this commit was made from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub repo: String,
    /// Normalized repo-relative path, `/`-separated
    pub file: String,
    /// Replay order key (Unix timestamp in ms)
    pub ts_unix_ms: u64,
    /// Patch text from the previous committed content of `file`
    pub patch: String,
    pub message: String,
    pub author: String,
    /// Hex SHA-256 of the content after applying `patch`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Commit {
    /// The conditional-insert key of this commit
    pub fn key(&self) -> CommitKey {
        CommitKey {
            repo: self.repo.clone(),
            file: self.file.clone(),
            ts_unix_ms: self.ts_unix_ms,
        }
    }
}

/// Unique key of a commit in the log
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommitKey {
    pub repo: String,
    pub file: String,
    pub ts_unix_ms: u64,
}

/// A named marker over the repository history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub repo: String,
    pub ts_unix_ms: u64,
    pub message: String,
    pub author: String,
    /// Latest commit timestamp reflected locally when the tag was made
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_ts: Option<u64>,
}

/// Per-repository index kept next to the commit log.
///
/// Grows monotonically: files and timestamps are only ever added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoIndex {
    pub repo: String,
    pub owner: String,
    pub created_ts: u64,
    #[serde(default)]
    pub files: BTreeSet<String>,
    #[serde(default)]
    pub timestamps: BTreeSet<u64>,
    #[serde(default)]
    pub commit_count: u64,
}

impl RepoIndex {
    pub fn new(repo: &str, owner: &str, created_ts: u64) -> Self {
        Self {
            repo: repo.to_string(),
            owner: owner.to_string(),
            created_ts,
            files: BTreeSet::new(),
            timestamps: BTreeSet::new(),
            commit_count: 0,
        }
    }

    /// Record a newly appended commit
    pub fn record(&mut self, commit: &Commit) {
        self.files.insert(commit.file.clone());
        self.timestamps.insert(commit.ts_unix_ms);
        self.commit_count += 1;
    }

    /// Timestamp of the newest commit in the repository
    pub fn latest_ts(&self) -> Option<u64> {
        self.timestamps.iter().next_back().copied()
    }
}

/// Check that a repository name is usable as a log key
pub fn validate_repo_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("repository name must not be empty".to_string());
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(format!(
            "repository name '{}' contains invalid character {:?}",
            name, bad
        ));
    }
    Ok(())
}
