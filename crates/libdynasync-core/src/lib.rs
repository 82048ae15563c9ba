pub mod types;
pub mod hash;
pub mod patch;
pub mod fsutil;
pub mod local;
pub mod log;
pub mod pool;
pub mod sync;
pub mod config;
pub mod error;

pub use error::{ErrorKind, SyncError};
pub use types::{Commit, CommitKey, RepoIndex, Tag};
pub use patch::{Patch, PatchError, PatchStats};
pub use local::LocalState;
pub use log::{CommitLog, MemoryCommitLog, SledCommitLog};
pub use sync::{clone_repo, BatchReport, FileOutcome, FileReport, FileState, FileStatus, History, Synchronizer};
pub use config::{ConfigOverrides, DynasyncHome, GlobalConfig, RepoConfig, SyncConfig};
