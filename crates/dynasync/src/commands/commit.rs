use libdynasync_core::{SyncError, Synchronizer};

use crate::cli::Cli;
use crate::context::{open_local, open_log, DynasyncContext};
use crate::output::output_batch;

pub fn run(cli: &Cli, files: &[String], message: &str) -> Result<(), SyncError> {
    let ctx = DynasyncContext::load(cli)?;
    let config = ctx.repo_config()?;
    // Every argument must name a file inside the checkout before anything is sent
    let files = ctx.repo_paths(&config, files)?;

    let local = open_local(&config)?;
    let log = open_log(&config)?;
    let report = Synchronizer::new(&config, &log, &local).commit(&files, message)?;

    output_batch(cli, "commit", &report);
    match report.partial_error() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
