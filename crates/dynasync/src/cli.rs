use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dynasync", about = "Patch-based file synchronizer", version)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress human-readable output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Storage credential profile
    #[arg(long, global = true, visible_alias = "aws-profile")]
    pub profile: Option<String>,

    /// Storage region
    #[arg(long, global = true, visible_alias = "aws-region")]
    pub region: Option<String>,

    /// Directory holding the remote commit logs
    #[arg(long, global = true)]
    pub remote_root: Option<PathBuf>,

    /// Maximum number of files processed in parallel
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Seconds to wait for the remote log before giving up
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Initialize a repository in the current directory
    Init {
        /// Repository name (default: directory name)
        name: Option<String>,
    },

    /// Record the current content of files in the remote log
    Commit {
        /// Files to commit
        #[arg(required = true)]
        files: Vec<String>,

        /// Commit message
        #[arg(short, long)]
        message: String,
    },

    /// Mark the current state of the repository
    Tag {
        /// Tag message
        message: String,
    },

    /// Create a checkout of a remote repository
    Clone {
        /// Repository name
        repo: String,

        /// Destination directory (default: ./<repo>)
        #[arg(long)]
        into: Option<PathBuf>,
    },

    /// Apply remote commits to the working copy
    Get,

    /// Show local and remote state of tracked files
    Status,

    /// Show commit history
    Log {
        /// Only show commits of this file
        file: Option<String>,
    },
}
