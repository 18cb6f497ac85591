//! List command implementation.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use crate::catalog::discover;
use crate::cli::blocking;

/// Arguments for the list command
#[derive(Args)]
pub struct ListArgs {
    /// Directory containing archives
    #[arg(short, long, default_value = ".")]
    pub dir: PathBuf,
}

/// Run the list command
pub async fn run(args: ListArgs) -> Result<()> {
    let dir = args.dir.clone();
    let catalog = blocking(move || {
        discover(&dir).with_context(|| format!("Failed to read {}", dir.display()))
    })
    .await?;

    if catalog.is_empty() {
        println!("No archives found in {}", args.dir.display());
    }

    for owner in catalog.owners() {
        println!("{}", owner);
        for path in catalog.archives_for(owner) {
            println!("  {}", path.display());
        }
    }

    if !catalog.unreadable.is_empty() {
        println!();
        println!("Unreadable archives:");
        for path in &catalog.unreadable {
            println!("  {}", path.display());
        }
    }
    Ok(())
}
