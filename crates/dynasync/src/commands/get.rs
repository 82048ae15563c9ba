use libdynasync_core::{SyncError, Synchronizer};

use crate::cli::Cli;
use crate::context::{open_local, open_log, DynasyncContext};
use crate::output::output_batch;

pub fn run(cli: &Cli) -> Result<(), SyncError> {
    let ctx = DynasyncContext::load(cli)?;
    let config = ctx.repo_config()?;
    let local = open_local(&config)?;
    let log = open_log(&config)?;

    let report = Synchronizer::new(&config, &log, &local).get()?;

    output_batch(cli, "get", &report);
    report.partial_error().map_or(Ok(()), Err)
}
