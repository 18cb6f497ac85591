//! Versions command implementation.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use crate::cli::{blocking, format_bytes};
use crate::config::EngineConfig;
use crate::Backup;

/// Arguments for the versions command
#[derive(Args)]
pub struct VersionsArgs {
    /// Archive to inspect
    #[arg(short, long)]
    pub archive: PathBuf,
}

/// Run the versions command
pub async fn run(args: VersionsArgs, config: EngineConfig) -> Result<()> {
    if !args.archive.exists() {
        anyhow::bail!("Archive not found: {}", args.archive.display());
    }

    let path = args.archive.clone();
    let backup = blocking(move || {
        Backup::open_with_config(&path, config)
            .with_context(|| format!("Failed to open archive {}", path.display()))
    })
    .await?;

    println!("Archive: {}", args.archive.display());
    println!("  Owner: {}", backup.owner_tag());
    if let Some(source) = backup.source_path() {
        println!("  Source: {}", source.display());
    }
    println!("  Stored blobs: {} ({})", backup.blobs().len(), format_bytes(backup.blobs().total_bytes()));

    if backup.versions().is_empty() {
        println!("No versions stored");
        return Ok(());
    }

    println!();
    println!("{:>6}  {:<20}  {:>6}  {:>12}  {:>12}", "ID", "CREATED", "FILES", "SIZE", "NEW");
    for version in backup.versions() {
        println!(
            "{:>6}  {:<20}  {:>6}  {:>12}  {:>12}",
            version.id,
            version.created_at.format("%Y-%m-%d %H:%M:%S"),
            version.file_count(),
            format_bytes(version.size),
            format_bytes(version.sizedelta)
        );
    }
    Ok(())
}
