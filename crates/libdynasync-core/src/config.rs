use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::types::validate_repo_name;

pub const DEFAULT_PROFILE: &str = "default";
pub const DEFAULT_REGION: &str = "local";
pub const DEFAULT_AUTHOR: &str = "default";
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Environment variable overriding the config and data directories
pub const HOME_ENV: &str = "DYNASYNC_HOME";

const REPO_CONFIG_FILE: &str = "repo.toml";
const GLOBAL_CONFIG_FILE: &str = "global.toml";

/// Repo-level configuration stored in .dynasync/repo.toml
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Repository name in the remote log
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// User-level defaults stored in <home>/global.toml
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Directory holding the remote commit logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl GlobalConfig {
    /// The values written on first use
    pub fn initial() -> Self {
        Self {
            profile: Some(DEFAULT_PROFILE.to_string()),
            region: Some(DEFAULT_REGION.to_string()),
            author: Some(default_author()),
            remote_root: None,
            workers: None,
            timeout_secs: None,
        }
    }
}

/// Values given on the command line; they win over every file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub profile: Option<String>,
    pub region: Option<String>,
    pub author: Option<String>,
    pub remote_root: Option<PathBuf>,
    pub workers: Option<usize>,
    pub timeout_secs: Option<u64>,
}

/// Where global config and default remote data live
#[derive(Debug, Clone)]
pub struct DynasyncHome {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl DynasyncHome {
    /// `$DYNASYNC_HOME` if set, else the platform directories
    pub fn from_env() -> Result<Self, SyncError> {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::at(PathBuf::from(home)));
        }
        let dirs = ProjectDirs::from("", "", "dynasync").ok_or_else(|| {
            SyncError::InvalidArgs(format!(
                "cannot determine a home directory; set {}",
                HOME_ENV
            ))
        })?;
        Ok(Self {
            config_dir: dirs.config_dir().to_path_buf(),
            data_dir: dirs.data_dir().to_path_buf(),
        })
    }

    /// Use one directory for both config and data
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            config_dir: dir.clone(),
            data_dir: dir,
        }
    }

    pub fn global_config_path(&self) -> PathBuf {
        self.config_dir.join(GLOBAL_CONFIG_FILE)
    }

    pub fn default_remote_root(&self) -> PathBuf {
        self.data_dir.join("remote")
    }
}

/// Fully resolved settings for one invocation.
///
/// Built once at startup and handed to the synchronizer by reference.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Absolute repository root (directory containing .dynasync)
    pub root: PathBuf,
    pub repo: String,
    pub profile: String,
    pub region: String,
    pub author: String,
    /// Location of the remote commit log
    pub store_path: PathBuf,
    /// Upper bound on concurrent per-file work
    pub workers: usize,
    /// Bound on waiting for the remote store
    pub remote_timeout: Duration,
}

impl SyncConfig {
    /// Merge the layers: override > repo.toml > global.toml > default
    pub fn resolve(
        root: &Path,
        repo_name: &str,
        repo: Option<&RepoConfig>,
        global: &GlobalConfig,
        overrides: &ConfigOverrides,
        home: &DynasyncHome,
    ) -> Result<Self, SyncError> {
        validate_repo_name(repo_name).map_err(SyncError::InvalidArgs)?;

        let profile = overrides
            .profile
            .clone()
            .or_else(|| repo.and_then(|r| r.profile.clone()))
            .or_else(|| global.profile.clone())
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string());
        let region = overrides
            .region
            .clone()
            .or_else(|| repo.and_then(|r| r.region.clone()))
            .or_else(|| global.region.clone())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        validate_location_part("profile", &profile)?;
        validate_location_part("region", &region)?;

        let author = overrides
            .author
            .clone()
            .or_else(|| global.author.clone())
            .unwrap_or_else(default_author);

        let remote_root = overrides
            .remote_root
            .clone()
            .or_else(|| global.remote_root.clone())
            .unwrap_or_else(|| home.default_remote_root());

        let workers = overrides
            .workers
            .or(global.workers)
            .unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            return Err(SyncError::InvalidArgs(
                "workers must be at least 1".to_string(),
            ));
        }

        let timeout_secs = overrides
            .timeout_secs
            .or(global.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Ok(Self {
            root: root.to_path_buf(),
            repo: repo_name.to_string(),
            store_path: store_path(&remote_root, &region, &profile),
            profile,
            region,
            author,
            workers,
            remote_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Path of the commit log for a `(region, profile)` pair
pub fn store_path(remote_root: &Path, region: &str, profile: &str) -> PathBuf {
    remote_root.join(region).join(profile).join("log.sled")
}

/// Author name from the environment, falling back to "default"
pub fn default_author() -> String {
    ["DYNASYNC_AUTHOR", "USER", "USERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_AUTHOR.to_string())
}

fn validate_location_part(what: &str, value: &str) -> Result<(), SyncError> {
    validate_repo_name(value)
        .map_err(|_| SyncError::InvalidArgs(format!("invalid {} '{}'", what, value)))?;
    if value == "." || value == ".." {
        return Err(SyncError::InvalidArgs(format!("invalid {} '{}'", what, value)));
    }
    Ok(())
}

/// Load repo config from .dynasync/repo.toml
pub fn load_repo_config(state_dir: &Path) -> Result<Option<RepoConfig>, SyncError> {
    let config_path = state_dir.join(REPO_CONFIG_FILE);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&config_path)?;
    let config: RepoConfig = toml::from_str(&content)?;
    Ok(Some(config))
}

/// Save repo config to .dynasync/repo.toml
pub fn save_repo_config(state_dir: &Path, config: &RepoConfig) -> Result<(), SyncError> {
    std::fs::create_dir_all(state_dir)?;
    let content = toml::to_string_pretty(config)?;
    crate::fsutil::atomic_write(&state_dir.join(REPO_CONFIG_FILE), content.as_bytes())
}

/// Load global config; a missing file means all defaults
pub fn load_global_config(home: &DynasyncHome) -> Result<GlobalConfig, SyncError> {
    let config_path = home.global_config_path();
    if !config_path.exists() {
        return Ok(GlobalConfig::default());
    }
    let content = std::fs::read_to_string(&config_path)?;
    let config: GlobalConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save global config to <home>/global.toml
pub fn save_global_config(home: &DynasyncHome, config: &GlobalConfig) -> Result<(), SyncError> {
    let content = toml::to_string_pretty(config)?;
    crate::fsutil::atomic_write(&home.global_config_path(), content.as_bytes())
}

/// Write the initial global config unless one already exists
pub fn ensure_global_config(home: &DynasyncHome) -> Result<GlobalConfig, SyncError> {
    if home.global_config_path().exists() {
        return load_global_config(home);
    }
    let config = GlobalConfig::initial();
    save_global_config(home, &config)?;
    Ok(config)
}
