mod cli;
mod commands;
mod context;
mod output;

use clap::Parser;
use cli::{Cli, Command};
use libdynasync_core::SyncError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    let cli = Cli::parse();

    // Logs go to stderr; stdout is reserved for command output
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = run_command(&cli);

    if let Err(e) = result {
        output::output_error(&cli, &e);
        std::process::exit(e.exit_code());
    }
}

fn run_command(cli: &Cli) -> Result<(), SyncError> {
    match &cli.command {
        Command::Init { name } => commands::init::run(cli, name.clone()),
        Command::Commit { files, message } => commands::commit::run(cli, files, message),
        Command::Tag { message } => commands::tag::run(cli, message),
        Command::Clone { repo, into } => commands::clone::run(cli, repo, into.clone()),
        Command::Get => commands::get::run(cli),
        Command::Status => commands::status::run(cli),
        Command::Log { file } => commands::history::run(cli, file.as_deref()),
    }
}
