mod cli;
mod context;
mod push;

use blobsync_core::errors::USAGE_EXIT_CODE;
use clap::Parser;
use cli::{Cli, Commands};
use context::AppContext;
use eyre::Result;

fn init_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            // --help and --version are not errors
            std::process::exit(if err.use_stderr() { USAGE_EXIT_CODE } else { 0 });
        }
    };
    init_logging(cli.verbose);
    let ctx = AppContext::load(cli.config_dir.as_deref())?;

    let code = match &cli.command {
        Commands::Push(args) => push::run_push(&ctx, args).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
