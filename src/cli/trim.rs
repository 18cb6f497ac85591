//! Trim command implementation.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use crate::cli::{blocking, format_bytes};
use crate::config::EngineConfig;
use crate::Backup;

/// Arguments for the trim command
#[derive(Args)]
pub struct TrimArgs {
    /// Archive to trim
    #[arg(short, long)]
    pub archive: PathBuf,

    /// Number of most recent versions to keep
    #[arg(short, long)]
    pub keep: usize,
}

/// Run the trim command
pub async fn run(args: TrimArgs, config: EngineConfig) -> Result<()> {
    if !args.archive.exists() {
        anyhow::bail!("Archive not found: {}", args.archive.display());
    }

    let keep = args.keep;
    let path = args.archive.clone();
    let report = blocking(move || {
        let mut backup = Backup::open_with_config(&path, config)
            .with_context(|| format!("Failed to open archive {}", path.display()))?;
        Ok(backup.trim_to(keep)?)
    })
    .await?;

    if report.is_noop() {
        println!("Nothing to trim: {} has at most {} versions", args.archive.display(), keep);
        return Ok(());
    }

    let removed: Vec<String> = report.removed.iter().map(|id| id.to_string()).collect();
    println!("Trimmed {}", args.archive.display());
    println!("  Removed versions: {}", removed.join(", "));
    if let Some(anchor) = report.anchor {
        println!("  Oldest kept version: {}", anchor);
    }
    println!("  Blobs migrated: {}", report.migrated);
    println!(
        "  Space reclaimed: {} ({} blobs)",
        format_bytes(report.gc.bytes_freed),
        report.gc.slots_removed
    );
    Ok(())
}
