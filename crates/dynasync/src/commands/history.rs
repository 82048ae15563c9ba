use comfy_table::{presets::UTF8_FULL, Table};
use libdynasync_core::{types::normalize_user_path, Commit, SyncError, Synchronizer, Tag};
use serde::Serialize;

use crate::cli::Cli;
use crate::context::{open_local, open_log, DynasyncContext};
use crate::output::{format_ts, output_success, print_human};

#[derive(Serialize)]
struct CommitJson {
    file: String,
    ts: u64,
    author: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    additions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deletions: Option<usize>,
}

#[derive(Serialize)]
struct HistoryOutput {
    repo: String,
    commits: Vec<CommitJson>,
    tags: Vec<Tag>,
}

pub fn run(cli: &Cli, file: Option<&str>) -> Result<(), SyncError> {
    let ctx = DynasyncContext::load(cli)?;
    let config = ctx.repo_config()?;
    let file = file
        .map(|f| normalize_user_path(&config.root, &ctx.cwd, f))
        .transpose()?;
    let local = open_local(&config)?;
    let log = open_log(&config)?;

    let history = Synchronizer::new(&config, &log, &local).history(file.as_deref())?;

    if history.commits.is_empty() {
        print_human(cli, "No commits");
    } else {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["TIME", "FILE", "AUTHOR", "+/-", "MESSAGE"]);
        for entry in &history.commits {
            let Commit {
                file,
                ts_unix_ms,
                author,
                message,
                ..
            } = &entry.commit;
            let stats = entry
                .stats
                .map(|s| format!("+{} -{}", s.additions, s.deletions))
                .unwrap_or_else(|| "?".to_string());
            table.add_row(vec![
                format_ts(*ts_unix_ms),
                file.clone(),
                author.clone(),
                stats,
                message.clone(),
            ]);
        }
        print_human(cli, &table.to_string());
    }

    if !history.tags.is_empty() {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["TAGGED", "HEAD", "AUTHOR", "MESSAGE"]);
        for tag in &history.tags {
            table.add_row(vec![
                format_ts(tag.ts_unix_ms),
                tag.head_ts.map(format_ts).unwrap_or_else(|| "-".to_string()),
                tag.author.clone(),
                tag.message.clone(),
            ]);
        }
        print_human(cli, &table.to_string());
    }

    let commits = history
        .commits
        .into_iter()
        .map(|entry| CommitJson {
            file: entry.commit.file,
            ts: entry.commit.ts_unix_ms,
            author: entry.commit.author,
            message: entry.commit.message,
            content_hash: entry.commit.content_hash,
            additions: entry.stats.map(|s| s.additions),
            deletions: entry.stats.map(|s| s.deletions),
        })
        .collect();
    output_success(
        cli,
        HistoryOutput {
            repo: config.repo.clone(),
            commits,
            tags: history.tags,
        },
    );
    Ok(())
}
