use std::path::{Path, PathBuf};

use libdynasync_core::{
    config::{load_global_config, ConfigOverrides, DynasyncHome, GlobalConfig, SyncConfig},
    local::{self, LocalState},
    types::normalize_user_path,
    SledCommitLog, SyncError,
};

use crate::cli::Cli;

/// Process-level inputs, read once at startup
pub struct DynasyncContext {
    pub cwd: PathBuf,
    pub home: DynasyncHome,
    pub global: GlobalConfig,
    pub overrides: ConfigOverrides,
}

impl DynasyncContext {
    pub fn load(cli: &Cli) -> Result<Self, SyncError> {
        let cwd = std::env::current_dir()?;
        let home = DynasyncHome::from_env()?;
        let global = load_global_config(&home)?;
        let overrides = ConfigOverrides {
            profile: cli.profile.clone(),
            region: cli.region.clone(),
            author: None,
            remote_root: cli.remote_root.as_ref().map(|p| absolutize(&cwd, p)),
            workers: cli.workers,
            timeout_secs: cli.timeout,
        };
        Ok(Self {
            cwd,
            home,
            global,
            overrides,
        })
    }

    /// Resolve settings for the repository containing the current directory
    pub fn repo_config(&self) -> Result<SyncConfig, SyncError> {
        let root = local::discover(&self.cwd)?;
        let repo = local::load_config(&root)?;
        SyncConfig::resolve(
            &root,
            &repo.name,
            Some(&repo),
            &self.global,
            &self.overrides,
            &self.home,
        )
    }

    /// Resolve settings for a checkout that does not exist yet
    pub fn config_for(&self, root: &Path, repo: &str) -> Result<SyncConfig, SyncError> {
        SyncConfig::resolve(root, repo, None, &self.global, &self.overrides, &self.home)
    }

    /// Turn command-line file arguments into repo-relative paths
    pub fn repo_paths(&self, config: &SyncConfig, files: &[String]) -> Result<Vec<String>, SyncError> {
        files
            .iter()
            .map(|f| normalize_user_path(&config.root, &self.cwd, f))
            .collect()
    }
}

/// Open the local checkout with its lock held
pub fn open_local(config: &SyncConfig) -> Result<LocalState, SyncError> {
    LocalState::open_locked(&config.root, config.remote_timeout)
}

/// Open the remote log for this configuration
pub fn open_log(config: &SyncConfig) -> Result<SledCommitLog, SyncError> {
    SledCommitLog::open(&config.store_path, config.remote_timeout)
}

pub fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}
