//! Commit, get, clone and the read-only views over a checkout
//!
//! Every per-file operation is independent: one file failing never rolls
//! back or blocks another. Within a file, remote commits are replayed
//! strictly in timestamp order and local state is advanced after each one,
//! so an interrupted or failed `get` resumes from the first commit that was
//! not recorded as applied.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{RepoConfig, SyncConfig};
use crate::error::SyncError;
use crate::hash::{content_hash, matches_hash};
use crate::local::{self, LocalState};
use crate::log::CommitLog;
use crate::patch::{self, Patch, PatchStats};
use crate::pool::run_bounded;
use crate::types::{now_unix_ms, validate_repo_path, Commit, RepoIndex, Tag};

/// Retries after a timestamp collision in the log
pub const MAX_APPEND_RETRIES: usize = 3;

/// What happened to one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    /// A new commit was appended
    Committed {
        ts: u64,
        additions: usize,
        deletions: usize,
    },
    /// Working copy equals the baseline; nothing to commit
    Unchanged,
    /// Pending remote commits were replayed
    Applied {
        commits: usize,
        /// Commits whose result was already on disk
        recovered: usize,
    },
}

#[derive(Debug)]
pub struct FileReport {
    pub file: String,
    pub result: Result<FileOutcome, SyncError>,
}

/// Per-file results of a batch operation, in processing order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
}

impl BatchReport {
    pub fn failed(&self) -> usize {
        self.files.iter().filter(|f| f.result.is_err()).count()
    }

    pub fn succeeded(&self) -> usize {
        self.files.len() - self.failed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// The aggregate error to exit with, if any file failed
    pub fn partial_error(&self) -> Option<SyncError> {
        let failed = self.failed();
        (failed > 0).then(|| SyncError::Partial {
            failed,
            total: self.files.len(),
        })
    }
}

/// Local condition of a file relative to its baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileState {
    Clean,
    Modified,
    /// Tracked, but the working file is gone
    Missing,
    /// Known to the remote log, never applied here
    UntrackedRemote,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::Clean => "clean",
            FileState::Modified => "modified",
            FileState::Missing => "missing",
            FileState::UntrackedRemote => "untracked-remote",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    pub file: String,
    pub state: FileState,
    /// Remote commits not yet applied locally
    pub pending: usize,
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub commit: Commit,
    /// `None` if the stored patch does not parse
    pub stats: Option<PatchStats>,
}

#[derive(Debug, Clone, Default)]
pub struct History {
    pub commits: Vec<HistoryEntry>,
    pub tags: Vec<Tag>,
}

/// Remote commits this checkout has not applied yet
#[derive(Debug)]
struct RemoteView {
    index: RepoIndex,
    /// Everything listed, in replay order
    listed: Vec<Commit>,
    watermark: Option<u64>,
}

impl RemoteView {
    fn pending(&self, local: &LocalState) -> BTreeMap<String, Vec<Commit>> {
        let mut pending: BTreeMap<String, Vec<Commit>> = BTreeMap::new();
        for commit in &self.listed {
            if !local.index().is_applied(&commit.file, commit.ts_unix_ms) {
                pending
                    .entry(commit.file.clone())
                    .or_default()
                    .push(commit.clone());
            }
        }
        pending
    }
}

/// Runs operations for one checkout against one remote log
pub struct Synchronizer<'a> {
    config: &'a SyncConfig,
    log: &'a dyn CommitLog,
    local: &'a LocalState,
}

impl<'a> Synchronizer<'a> {
    pub fn new(config: &'a SyncConfig, log: &'a dyn CommitLog, local: &'a LocalState) -> Self {
        Self { config, log, local }
    }

    fn repo(&self) -> &str {
        &self.config.repo
    }

    /// Commit the given repo-relative files
    pub fn commit(&self, files: &[String], message: &str) -> Result<BatchReport, SyncError> {
        let view = self.remote_view()?;
        let pending = view.pending(self.local);
        let floor = view.index.latest_ts().unwrap_or(0);

        let mut seen = BTreeSet::new();
        let files: Vec<&String> = files.iter().filter(|f| seen.insert(f.as_str())).collect();

        let results = run_bounded(&files, self.config.workers, |file| {
            let result = self.commit_file(file, message, &pending, floor);
            match &result {
                Ok(outcome) => info!(file = %file, ?outcome, "commit"),
                Err(e) => warn!(file = %file, error = %e, "commit failed"),
            }
            FileReport {
                file: file.to_string(),
                result,
            }
        });

        Ok(BatchReport { files: results })
    }

    fn commit_file(
        &self,
        file: &str,
        message: &str,
        pending: &BTreeMap<String, Vec<Commit>>,
        floor: u64,
    ) -> Result<FileOutcome, SyncError> {
        validate_repo_path(file)?;

        let working = self.local.read_working(file)?.ok_or_else(|| {
            SyncError::NotFound(format!("'{}' does not exist in the working copy", file))
        })?;

        if let Some(behind) = pending.get(file).filter(|p| !p.is_empty()) {
            return Err(SyncError::Conflict(format!(
                "'{}' is behind remote by {} commit(s)",
                file,
                behind.len()
            )));
        }

        let baseline = self.local.baseline().read(file)?;
        if baseline.as_deref() == Some(working.as_slice()) {
            return Ok(FileOutcome::Unchanged);
        }

        let patch = Patch::compute(baseline.as_deref().unwrap_or_default(), &working);
        let stats = patch.stats();

        let local_floor = self.local.index().latest(file).unwrap_or(0);
        let mut commit = Commit {
            repo: self.repo().to_string(),
            file: file.to_string(),
            ts_unix_ms: now_unix_ms().max(floor + 1).max(local_floor + 1),
            patch: patch.to_string(),
            message: message.to_string(),
            author: self.config.author.clone(),
            content_hash: Some(content_hash(&working)),
        };

        let mut retries = 0;
        loop {
            match self.log.append(&commit) {
                Ok(()) => break,
                Err(SyncError::Conflict(reason)) if retries < MAX_APPEND_RETRIES => {
                    retries += 1;
                    let next = now_unix_ms().max(commit.ts_unix_ms + 1);
                    warn!(
                        file,
                        ts = commit.ts_unix_ms,
                        next,
                        attempt = retries,
                        %reason,
                        "commit timestamp taken, retrying"
                    );
                    commit.ts_unix_ms = next;
                }
                Err(e) => return Err(e),
            }
        }

        self.local.baseline().write(file, &working)?;
        self.local.index().mark_applied(file, commit.ts_unix_ms)?;

        Ok(FileOutcome::Committed {
            ts: commit.ts_unix_ms,
            additions: stats.additions,
            deletions: stats.deletions,
        })
    }

    /// Replay every pending remote commit
    pub fn get(&self) -> Result<BatchReport, SyncError> {
        let view = self.remote_view()?;
        let pending = view.pending(self.local);
        let files: Vec<(&String, &Vec<Commit>)> = pending.iter().collect();
        debug!(files = files.len(), listed = view.listed.len(), "replaying pending commits");

        let results = run_bounded(&files, self.config.workers, |(file, commits)| {
            let result = self.replay_file(file, commits);
            match &result {
                Ok(outcome) => info!(file = %file, ?outcome, "get"),
                Err(e) => warn!(file = %file, error = %e, "get failed"),
            }
            FileReport {
                file: file.to_string(),
                result,
            }
        });

        self.advance_watermark(&view)?;
        Ok(BatchReport { files: results })
    }

    fn replay_file(&self, file: &str, commits: &[Commit]) -> Result<FileOutcome, SyncError> {
        validate_repo_path(file)?;

        let mut content = self.local.read_working(file)?.unwrap_or_default();
        let mut applied = 0;
        let mut recovered = 0;

        for commit in commits {
            let ts = commit.ts_unix_ms;
            let at_target = commit
                .content_hash
                .as_deref()
                .map_or(false, |h| matches_hash(&content, h));

            if at_target {
                warn!(file, ts, "content already matches commit, recording as applied");
                recovered += 1;
            } else {
                let next = patch::apply(&commit.patch, &content)
                    .map_err(|e| SyncError::replay(file, ts, e.to_string()))?;
                if let Some(expected) = &commit.content_hash {
                    if !matches_hash(&next, expected) {
                        return Err(SyncError::replay(
                            file,
                            ts,
                            "content hash mismatch after applying patch",
                        ));
                    }
                }
                content = next;
            }

            self.local.write_working(file, &content)?;
            self.local.baseline().write(file, &content)?;
            self.local.index().mark_applied(file, ts)?;
            applied += 1;
            debug!(file, ts, "applied");
        }

        Ok(FileOutcome::Applied {
            commits: applied,
            recovered,
        })
    }

    /// Append a tag pointing at the newest locally applied commit
    pub fn tag(&self, message: &str) -> Result<Tag, SyncError> {
        let index = self
            .log
            .repo_index(self.repo())?
            .ok_or_else(|| SyncError::repo_not_found(self.repo()))?;
        let head_ts = self.local.index().latest_overall();
        let floor = index.latest_ts().max(head_ts).unwrap_or(0);

        let mut tag = Tag {
            repo: self.repo().to_string(),
            ts_unix_ms: now_unix_ms().max(floor + 1),
            message: message.to_string(),
            author: self.config.author.clone(),
            head_ts,
        };

        let mut retries = 0;
        loop {
            match self.log.append_tag(&tag) {
                Ok(()) => return Ok(tag),
                Err(SyncError::Conflict(reason)) if retries < MAX_APPEND_RETRIES => {
                    retries += 1;
                    warn!(ts = tag.ts_unix_ms, attempt = retries, %reason, "tag timestamp taken, retrying");
                    tag.ts_unix_ms = now_unix_ms().max(tag.ts_unix_ms + 1);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Local and remote state of every known file
    pub fn status(&self) -> Result<Vec<FileStatus>, SyncError> {
        let view = self.remote_view()?;
        let pending = view.pending(self.local);

        let mut files: BTreeSet<String> = self.local.baseline().tracked()?.into_iter().collect();
        files.extend(view.index.files.iter().cloned());
        files.extend(pending.keys().cloned());

        let mut statuses = Vec::with_capacity(files.len());
        for file in files {
            if validate_repo_path(&file).is_err() {
                continue;
            }
            let state = match self.local.baseline().read(&file)? {
                None => FileState::UntrackedRemote,
                Some(base) => match self.local.read_working(&file)? {
                    None => FileState::Missing,
                    Some(work) if work == base => FileState::Clean,
                    Some(_) => FileState::Modified,
                },
            };
            let pending = pending.get(&file).map_or(0, Vec::len);
            statuses.push(FileStatus {
                file,
                state,
                pending,
            });
        }
        Ok(statuses)
    }

    /// Commits and tags of the repository, optionally for one file
    pub fn history(&self, file: Option<&str>) -> Result<History, SyncError> {
        if !self.log.repo_exists(self.repo())? {
            return Err(SyncError::repo_not_found(self.repo()));
        }

        let commits = self
            .log
            .list_by_repo(self.repo(), None)?
            .into_iter()
            .filter(|c| file.map_or(true, |f| c.file == f))
            .map(|commit| {
                let stats = Patch::parse(&commit.patch).ok().map(|p| p.stats());
                HistoryEntry { commit, stats }
            })
            .collect();

        let tags = if file.is_none() {
            self.log.list_tags(self.repo())?
        } else {
            Vec::new()
        };

        Ok(History { commits, tags })
    }

    /// List remote commits newer than the watermark, falling back to a full
    /// listing when the repo index shows commits the watermark would hide
    fn remote_view(&self) -> Result<RemoteView, SyncError> {
        let index = self
            .log
            .repo_index(self.repo())?
            .ok_or_else(|| SyncError::repo_not_found(self.repo()))?;
        let watermark = self.local.index().watermark()?;

        let listed = self.log.list_by_repo(self.repo(), watermark)?;
        let view = RemoteView {
            index,
            listed,
            watermark,
        };

        if watermark.is_some() {
            let pending: u64 = view.pending(self.local).values().map(|v| v.len() as u64).sum();
            let known = self.local.index().total() + pending;
            if known < view.index.commit_count {
                warn!(
                    known,
                    remote = view.index.commit_count,
                    "remote has commits older than the watermark, listing everything"
                );
                let listed = self.log.list_by_repo(self.repo(), None)?;
                return Ok(RemoteView {
                    listed,
                    watermark: None,
                    ..view
                });
            }
        }

        Ok(view)
    }

    /// Move the watermark up to just below the first commit still unapplied
    fn advance_watermark(&self, view: &RemoteView) -> Result<(), SyncError> {
        let index = self.local.index();
        let first_unapplied = view
            .listed
            .iter()
            .filter(|c| !index.is_applied(&c.file, c.ts_unix_ms))
            .map(|c| c.ts_unix_ms)
            .min();

        let candidate = match first_unapplied {
            Some(ts) => ts.checked_sub(1),
            None => view.listed.iter().map(|c| c.ts_unix_ms).max(),
        };
        let current = index.watermark()?;

        if let Some(next) = candidate {
            if current.map_or(true, |w| next > w) {
                debug!(watermark = next, previous = ?view.watermark, "advancing watermark");
                index.set_watermark(next)?;
            }
        }
        Ok(())
    }
}

/// Create a checkout of `config.repo` at `config.root` and replay its
/// whole history
pub fn clone_repo(config: &SyncConfig, log: &dyn CommitLog) -> Result<BatchReport, SyncError> {
    if !log.repo_exists(&config.repo)? {
        return Err(SyncError::repo_not_found(&config.repo));
    }
    if local::is_initialized(&config.root) {
        return Err(SyncError::InvalidArgs(format!(
            "{} already contains a dynasync repository",
            config.root.display()
        )));
    }

    std::fs::create_dir_all(&config.root)?;
    local::init(
        &config.root,
        &RepoConfig {
            name: config.repo.clone(),
            profile: Some(config.profile.clone()),
            region: Some(config.region.clone()),
        },
    )?;
    info!(repo = %config.repo, root = %config.root.display(), "cloning");

    let state = LocalState::open_locked(&config.root, config.remote_timeout)?;
    Synchronizer::new(config, log, &state).get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryCommitLog;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    fn config(root: &Path) -> SyncConfig {
        SyncConfig {
            root: root.to_path_buf(),
            repo: "notes".to_string(),
            profile: "default".to_string(),
            region: "local".to_string(),
            author: "tester".to_string(),
            store_path: root.join("unused"),
            workers: 2,
            remote_timeout: Duration::from_secs(1),
        }
    }

    fn checkout(root: &Path) -> LocalState {
        local::init(
            root,
            &RepoConfig {
                name: "notes".to_string(),
                profile: None,
                region: None,
            },
        )
        .unwrap();
        LocalState::open_locked(root, Duration::from_secs(1)).unwrap()
    }

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_commit_then_unchanged() {
        let dir = tempdir().unwrap();
        let log = MemoryCommitLog::new();
        log.create_repo("notes", "tester").unwrap();
        let cfg = config(dir.path());
        let state = checkout(dir.path());
        let sync = Synchronizer::new(&cfg, &log, &state);

        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let report = sync.commit(&files(&["a.txt", "a.txt"]), "first").unwrap();
        assert_eq!(report.files.len(), 1);
        assert!(matches!(
            report.files[0].result,
            Ok(FileOutcome::Committed { additions: 1, deletions: 0, .. })
        ));

        let report = sync.commit(&files(&["a.txt"]), "again").unwrap();
        assert!(matches!(report.files[0].result, Ok(FileOutcome::Unchanged)));
        assert_eq!(log.list_by_repo("notes", None).unwrap().len(), 1);
    }

    #[test]
    fn test_commit_missing_file_is_per_file_failure() {
        let dir = tempdir().unwrap();
        let log = MemoryCommitLog::new();
        log.create_repo("notes", "tester").unwrap();
        let cfg = config(dir.path());
        let state = checkout(dir.path());
        let sync = Synchronizer::new(&cfg, &log, &state);

        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        let report = sync.commit(&files(&["a.txt", "b.txt"]), "m").unwrap();
        assert!(matches!(report.files[0].result, Err(SyncError::NotFound(_))));
        assert!(report.files[1].result.is_ok());
        assert!(matches!(
            report.partial_error(),
            Some(SyncError::Partial { failed: 1, total: 2 })
        ));
    }

    #[test]
    fn test_commit_without_remote_repo() {
        let dir = tempdir().unwrap();
        let log = MemoryCommitLog::new();
        let cfg = config(dir.path());
        let state = checkout(dir.path());
        let sync = Synchronizer::new(&cfg, &log, &state);

        let err = sync.commit(&files(&["a.txt"]), "m").unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    /// Rejects the first `conflicts` appends as if another writer won
    struct ContendedLog {
        inner: MemoryCommitLog,
        conflicts: std::sync::atomic::AtomicUsize,
    }

    impl CommitLog for ContendedLog {
        fn append(&self, commit: &Commit) -> Result<(), SyncError> {
            use std::sync::atomic::Ordering;
            let left = self.conflicts.load(Ordering::SeqCst);
            if left > 0 {
                self.conflicts.store(left - 1, Ordering::SeqCst);
                return Err(SyncError::Conflict("taken".to_string()));
            }
            self.inner.append(commit)
        }
        fn list_by_repo(&self, repo: &str, after: Option<u64>) -> Result<Vec<Commit>, SyncError> {
            self.inner.list_by_repo(repo, after)
        }
        fn get(&self, repo: &str, file: &str, ts: u64) -> Result<Option<Commit>, SyncError> {
            self.inner.get(repo, file, ts)
        }
        fn create_repo(&self, repo: &str, owner: &str) -> Result<RepoIndex, SyncError> {
            self.inner.create_repo(repo, owner)
        }
        fn repo_index(&self, repo: &str) -> Result<Option<RepoIndex>, SyncError> {
            self.inner.repo_index(repo)
        }
        fn append_tag(&self, tag: &Tag) -> Result<(), SyncError> {
            self.inner.append_tag(tag)
        }
        fn list_tags(&self, repo: &str) -> Result<Vec<Tag>, SyncError> {
            self.inner.list_tags(repo)
        }
    }

    fn contended(conflicts: usize) -> ContendedLog {
        let log = ContendedLog {
            inner: MemoryCommitLog::new(),
            conflicts: std::sync::atomic::AtomicUsize::new(conflicts),
        };
        log.create_repo("notes", "tester").unwrap();
        log
    }

    #[test]
    fn test_commit_retries_on_taken_timestamp() {
        let dir = tempdir().unwrap();
        let log = contended(MAX_APPEND_RETRIES);
        let cfg = config(dir.path());
        let state = checkout(dir.path());
        let sync = Synchronizer::new(&cfg, &log, &state);

        std::fs::write(dir.path().join("a.txt"), "new").unwrap();
        let report = sync.commit(&files(&["a.txt"]), "m").unwrap();
        assert!(matches!(
            report.files[0].result,
            Ok(FileOutcome::Committed { .. })
        ));
        assert_eq!(log.list_by_repo("notes", None).unwrap().len(), 1);
    }

    #[test]
    fn test_commit_gives_up_after_retries() {
        let dir = tempdir().unwrap();
        let log = contended(MAX_APPEND_RETRIES + 1);
        let cfg = config(dir.path());
        let state = checkout(dir.path());
        let sync = Synchronizer::new(&cfg, &log, &state);

        std::fs::write(dir.path().join("a.txt"), "new").unwrap();
        let report = sync.commit(&files(&["a.txt"]), "m").unwrap();
        assert!(matches!(report.files[0].result, Err(SyncError::Conflict(_))));
        // Nothing recorded locally for the failed file
        assert_eq!(state.baseline().read("a.txt").unwrap(), None);
        assert_eq!(state.index().total(), 0);
    }

    #[test]
    fn test_tag_points_at_latest_applied() {
        let dir = tempdir().unwrap();
        let log = MemoryCommitLog::new();
        log.create_repo("notes", "tester").unwrap();
        let cfg = config(dir.path());
        let state = checkout(dir.path());
        let sync = Synchronizer::new(&cfg, &log, &state);

        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let report = sync.commit(&files(&["a.txt"]), "m").unwrap();
        let ts = match &report.files[0].result {
            Ok(FileOutcome::Committed { ts, .. }) => *ts,
            other => panic!("unexpected {:?}", other),
        };

        let tag = sync.tag("release").unwrap();
        assert_eq!(tag.head_ts, Some(ts));
        assert!(tag.ts_unix_ms > ts);
        assert_eq!(log.list_tags("notes").unwrap(), vec![tag]);
    }

    #[test]
    fn test_status_states() {
        let dir = tempdir().unwrap();
        let log = MemoryCommitLog::new();
        log.create_repo("notes", "tester").unwrap();
        let cfg = config(dir.path());
        let state = checkout(dir.path());
        let sync = Synchronizer::new(&cfg, &log, &state);

        for name in ["clean.txt", "modified.txt", "missing.txt"] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }
        sync.commit(&files(&["clean.txt", "modified.txt", "missing.txt"]), "m")
            .unwrap();
        std::fs::write(dir.path().join("modified.txt"), "changed").unwrap();
        std::fs::remove_file(dir.path().join("missing.txt")).unwrap();

        let mut remote = crate::log::contract::commit("notes", "remote.txt", now_unix_ms() + 10_000);
        remote.patch = patch::diff(b"", b"r");
        log.append(&remote).unwrap();

        let statuses = sync.status().unwrap();
        let by_name: BTreeMap<_, _> = statuses
            .iter()
            .map(|s| (s.file.as_str(), (s.state, s.pending)))
            .collect();
        assert_eq!(by_name["clean.txt"], (FileState::Clean, 0));
        assert_eq!(by_name["modified.txt"], (FileState::Modified, 0));
        assert_eq!(by_name["missing.txt"], (FileState::Missing, 0));
        assert_eq!(by_name["remote.txt"], (FileState::UntrackedRemote, 1));
    }

    #[test]
    fn test_history_filters_by_file() {
        let dir = tempdir().unwrap();
        let log = MemoryCommitLog::new();
        log.create_repo("notes", "tester").unwrap();
        let cfg = config(dir.path());
        let state = checkout(dir.path());
        let sync = Synchronizer::new(&cfg, &log, &state);

        std::fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "b\n").unwrap();
        sync.commit(&files(&["a.txt", "b.txt"]), "m").unwrap();
        sync.tag("t").unwrap();

        let all = sync.history(None).unwrap();
        assert_eq!(all.commits.len(), 2);
        assert_eq!(all.tags.len(), 1);

        let only_a = sync.history(Some("a.txt")).unwrap();
        assert_eq!(only_a.commits.len(), 1);
        assert_eq!(
            only_a.commits[0].stats,
            Some(PatchStats { additions: 1, deletions: 0 })
        );
    }
}
