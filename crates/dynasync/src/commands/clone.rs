use std::path::PathBuf;

use libdynasync_core::{clone_repo, types::validate_repo_name, SyncError};

use crate::cli::Cli;
use crate::context::{absolutize, open_log, DynasyncContext};
use crate::output::{output_batch, print_human};

pub fn run(cli: &Cli, repo: &str, into: Option<PathBuf>) -> Result<(), SyncError> {
    validate_repo_name(repo).map_err(SyncError::InvalidArgs)?;

    let ctx = DynasyncContext::load(cli)?;
    let dest = match into {
        Some(path) => absolutize(&ctx.cwd, &path),
        None => ctx.cwd.join(repo),
    };
    let config = ctx.config_for(&dest, repo)?;
    let log = open_log(&config)?;

    let report = clone_repo(&config, &log)?;

    output_batch(cli, "clone", &report);
    print_human(cli, &format!("Cloned '{}' into {}", repo, dest.display()));
    report.partial_error().map_or(Ok(()), Err)
}
