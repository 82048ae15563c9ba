use libdynasync_core::{
    config::{ensure_global_config, RepoConfig},
    local, CommitLog, SyncConfig, SyncError,
};
use serde::Serialize;
use tracing::info;

use crate::cli::Cli;
use crate::context::{open_log, DynasyncContext};
use crate::output::{output_success, print_human};

#[derive(Serialize)]
struct InitOutput {
    repo: String,
    root: String,
    profile: String,
    region: String,
    store: String,
    created: bool,
}

pub fn run(cli: &Cli, name: Option<String>) -> Result<(), SyncError> {
    let ctx = DynasyncContext::load(cli)?;
    // First use writes global.toml so later commands share the same defaults
    let global = ensure_global_config(&ctx.home)?;

    let root = ctx.cwd.clone();
    let existing = if local::is_initialized(&root) {
        Some(local::load_config(&root)?)
    } else {
        None
    };

    let repo_name = match (&existing, name) {
        (Some(current), Some(requested)) if current.name != requested => {
            return Err(SyncError::InvalidArgs(format!(
                "{} is already initialized as '{}'",
                root.display(),
                current.name
            )));
        }
        (Some(current), _) => current.name.clone(),
        (None, Some(requested)) => requested,
        (None, None) => root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                SyncError::InvalidArgs("cannot derive a repository name; pass one explicitly".to_string())
            })?,
    };

    let config = SyncConfig::resolve(
        &root,
        &repo_name,
        existing.as_ref(),
        &global,
        &ctx.overrides,
        &ctx.home,
    )?;

    local::init(
        &root,
        &RepoConfig {
            name: config.repo.clone(),
            profile: Some(config.profile.clone()),
            region: Some(config.region.clone()),
        },
    )?;

    let log = open_log(&config)?;
    let created = !log.repo_exists(&config.repo)?;
    log.create_repo(&config.repo, &config.author)?;
    info!(repo = %config.repo, created, "repository initialized");

    let output = InitOutput {
        repo: config.repo.clone(),
        root: root.to_string_lossy().into_owned(),
        profile: config.profile.clone(),
        region: config.region.clone(),
        store: config.store_path.to_string_lossy().into_owned(),
        created,
    };
    output_success(cli, &output);

    if existing.is_some() {
        print_human(cli, &format!("Reinitialized repository '{}' in {}", output.repo, output.root));
    } else {
        print_human(cli, &format!("Initialized repository '{}' in {}", output.repo, output.root));
    }
    if !created {
        print_human(cli, "  remote repository already existed; run 'dynasync get' to fetch its files");
    }
    Ok(())
}
