use comfy_table::{presets::UTF8_FULL, Table};
use libdynasync_core::{FileStatus, SyncError, Synchronizer};
use serde::Serialize;

use crate::cli::Cli;
use crate::context::{open_local, open_log, DynasyncContext};
use crate::output::{output_success, print_human};

#[derive(Serialize)]
struct StatusOutput {
    repo: String,
    files: Vec<FileStatus>,
    pending: usize,
}

pub fn run(cli: &Cli) -> Result<(), SyncError> {
    let ctx = DynasyncContext::load(cli)?;
    let config = ctx.repo_config()?;
    let local = open_local(&config)?;
    let log = open_log(&config)?;

    let files = Synchronizer::new(&config, &log, &local).status()?;
    let pending = files.iter().map(|f| f.pending).sum();

    if files.is_empty() {
        print_human(cli, &format!("Repository '{}' has no files yet", config.repo));
    } else {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["FILE", "STATE", "PENDING"]);
        for f in &files {
            table.add_row(vec![f.file.clone(), f.state.as_str().to_string(), f.pending.to_string()]);
        }
        print_human(cli, &table.to_string());
        if pending > 0 {
            print_human(cli, &format!("{} remote commit(s) pending; run 'dynasync get'", pending));
        }
    }

    output_success(
        cli,
        StatusOutput {
            repo: config.repo.clone(),
            files,
            pending,
        },
    );
    Ok(())
}
