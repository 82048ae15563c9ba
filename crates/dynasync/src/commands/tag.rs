use libdynasync_core::{SyncError, Synchronizer};

use crate::cli::Cli;
use crate::context::{open_local, open_log, DynasyncContext};
use crate::output::{format_ts, output_success, print_human};

pub fn run(cli: &Cli, message: &str) -> Result<(), SyncError> {
    let ctx = DynasyncContext::load(cli)?;
    let config = ctx.repo_config()?;
    let local = open_local(&config)?;
    let log = open_log(&config)?;

    let tag = Synchronizer::new(&config, &log, &local).tag(message)?;

    output_success(cli, &tag);
    let head = tag
        .head_ts
        .map(format_ts)
        .unwrap_or_else(|| "empty history".to_string());
    print_human(
        cli,
        &format!("Tagged {} at {} (head: {})", config.repo, format_ts(tag.ts_unix_ms), head),
    );
    Ok(())
}
