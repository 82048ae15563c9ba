pub mod commit;
pub mod path;

pub use commit::{validate_repo_name, Commit, CommitKey, RepoIndex, Tag};
pub use path::{normalize_user_path, to_native, validate_repo_path, MARKER_DIR};

/// Current wall-clock time as Unix milliseconds
pub fn now_unix_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
