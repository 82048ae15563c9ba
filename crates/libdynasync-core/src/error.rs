use thiserror::Error;

/// Coarse failure classes used when reporting per-file results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A commit or tag with the same key already exists
    Conflict,
    /// A patch did not apply cleanly (baseline drift or corruption)
    ReplayFailure,
    /// Local filesystem, store, or remote transport failure
    IoFailure,
    /// Missing repository, commit, or file
    NotFound,
    /// Bad input from the user
    Invalid,
    /// Anything else
    Internal,
}

/// Main error type for dynasync operations
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("replay failed for {file} at commit {ts}: {reason}")]
    ReplayFailure {
        file: String,
        ts: u64,
        reason: String,
    },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("store busy: {0}")]
    DbBusy(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("{failed} of {total} file(s) failed")]
    Partial { failed: usize, total: usize },

    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Classify the error into the reporting taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::InvalidArgs(_) | SyncError::TomlParse(_) => ErrorKind::Invalid,
            SyncError::NotFound(_) => ErrorKind::NotFound,
            SyncError::Conflict(_) => ErrorKind::Conflict,
            SyncError::ReplayFailure { .. } => ErrorKind::ReplayFailure,
            SyncError::Timeout(_)
            | SyncError::DbBusy(_)
            | SyncError::Io(_)
            | SyncError::Sled(_) => ErrorKind::IoFailure,
            SyncError::Json(_)
            | SyncError::TomlSerialize(_)
            | SyncError::Partial { .. }
            | SyncError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Get the error code for JSON output
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::InvalidArgs(_) => "invalid_args",
            SyncError::NotFound(_) => "not_found",
            SyncError::Conflict(_) => "conflict",
            SyncError::ReplayFailure { .. } => "replay_failure",
            SyncError::Timeout(_) => "timeout",
            SyncError::DbBusy(_) => "db_busy",
            SyncError::Io(_) => "io_error",
            SyncError::Sled(_) => "db_error",
            SyncError::Json(_) => "internal_error",
            SyncError::TomlParse(_) => "invalid_args",
            SyncError::TomlSerialize(_) => "internal_error",
            SyncError::Partial { .. } => "partial_failure",
            SyncError::Internal(_) => "internal_error",
        }
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::InvalidArgs(_) => 2,
            SyncError::TomlParse(_) => 2,
            SyncError::NotFound(_) => 3,
            SyncError::Conflict(_) => 4,
            SyncError::Timeout(_) => 5,
            SyncError::DbBusy(_) => 5,
            SyncError::Io(_) => 5,
            SyncError::Sled(_) => 5,
            SyncError::ReplayFailure { .. } => 6,
            _ => 1,
        }
    }

    /// Get actionable suggestions for fixing the error
    pub fn suggestions(&self) -> Vec<&'static str> {
        match self {
            SyncError::NotFound(msg) => {
                if msg.contains("repository") {
                    vec!["Run 'dynasync init' to create a repository here"]
                } else if msg.contains("repo ") {
                    vec!["Check the repository name and the --profile/--region flags"]
                } else {
                    vec![]
                }
            }
            SyncError::Conflict(msg) => {
                if msg.contains("behind") {
                    vec!["Run 'dynasync get' to apply remote commits, then commit again"]
                } else {
                    vec!["Retry the command"]
                }
            }
            SyncError::ReplayFailure { .. } => vec![
                "The local copy no longer matches the commit history",
                "Re-clone the repository into a fresh directory to rebuild the file",
            ],
            SyncError::DbBusy(_) | SyncError::Timeout(_) => vec![
                "Another dynasync process may be running; wait for it to finish",
                "Or raise the limit with --timeout",
            ],
            SyncError::Sled(_) => vec![
                "If problem persists, check disk space and permissions of the remote root",
            ],
            SyncError::Partial { .. } => vec![
                "Re-run the command for the files that failed",
            ],
            _ => vec![],
        }
    }

    /// Create a ReplayFailure for a file at a specific commit
    pub fn replay(file: &str, ts: u64, reason: impl Into<String>) -> Self {
        SyncError::ReplayFailure {
            file: file.to_string(),
            ts,
            reason: reason.into(),
        }
    }

    /// Create a NotFound error for a remote repository
    pub fn repo_not_found(repo: &str) -> Self {
        SyncError::NotFound(format!("repo '{}' does not exist in the remote log", repo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_mapping() {
        assert_eq!(SyncError::Conflict("x".into()).kind(), ErrorKind::Conflict);
        assert_eq!(SyncError::replay("a.txt", 1, "x").kind(), ErrorKind::ReplayFailure);
        assert_eq!(SyncError::Timeout("x".into()).kind(), ErrorKind::IoFailure);
        assert_eq!(
            SyncError::Io(std::io::Error::new(std::io::ErrorKind::Other, "x")).kind(),
            ErrorKind::IoFailure
        );
        assert_eq!(SyncError::repo_not_found("r").kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_exit_codes_are_distinct_per_class() {
        assert_eq!(SyncError::InvalidArgs("x".into()).exit_code(), 2);
        assert_eq!(SyncError::repo_not_found("r").exit_code(), 3);
        assert_eq!(SyncError::Conflict("x".into()).exit_code(), 4);
        assert_eq!(SyncError::Timeout("x".into()).exit_code(), 5);
        assert_eq!(SyncError::replay("a", 1, "x").exit_code(), 6);
        assert_eq!(SyncError::Partial { failed: 1, total: 2 }.exit_code(), 1);
    }

    #[test]
    fn test_replay_message_names_file_and_commit() {
        let err = SyncError::replay("docs/a.txt", 1700000000000, "context mismatch");
        let msg = err.to_string();
        assert!(msg.contains("docs/a.txt"));
        assert!(msg.contains("1700000000000"));
        assert!(msg.contains("context mismatch"));
    }
}
