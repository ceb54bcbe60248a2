use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "blobsync")]
#[command(about = "Push large content-addressed objects referenced from git history")]
#[command(after_help = "Run '<command> --help' for detailed options on each command.")]
pub struct Cli {
    /// Override the configuration directory for this invocation
    #[arg(long, global = true, value_name = "PATH")]
    pub config_dir: Option<PathBuf>,
    /// Log queue and scan activity to stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Push objects referenced by local refs (or bare object ids) to a remote
    Push(PushArgs),
}

#[derive(Args, Clone, Debug)]
pub struct PushArgs {
    /// Remote name from the config file, a file:// URL, or a directory
    pub remote: Option<String>,
    /// Refs to push (object ids with --object-id)
    pub refs: Vec<String>,
    /// Do everything except actually send the updates
    #[arg(long, short = 'd')]
    pub dry_run: bool,
    /// Treat the remaining arguments as object ids instead of refs
    #[arg(long, short = 'o')]
    pub object_id: bool,
    /// Push every object in the history of the refs, not just what the remote lacks
    #[arg(long, short = 'a')]
    pub all: bool,
    /// Limit worker threads (advanced debugging only)
    #[arg(long, hide = true)]
    pub workers: Option<usize>,
}
