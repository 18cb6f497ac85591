//! vbak - versioned, deduplicating directory backups
//!
//! Main binary entry point for the command-line interface.

use clap::Parser;
use vbak::cli::{self, Cli, Commands};
use vbak::logging::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = cli.engine_config()?;

    match cli.command {
        Commands::Backup(args) => cli::backup::run(args, config).await,
        Commands::BackupAll(args) => cli::backup::run_all(args, config).await,
        Commands::Restore(args) => cli::restore::run(args, config).await,
        Commands::Versions(args) => cli::versions::run(args, config).await,
        Commands::Trim(args) => cli::trim::run(args, config).await,
        Commands::List(args) => cli::list::run(args).await,
    }
}
