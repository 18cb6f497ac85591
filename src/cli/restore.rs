//! Restore command implementation.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use crate::cli::{blocking, format_bytes};
use crate::config::EngineConfig;
use crate::version::VersionId;
use crate::Backup;

/// Arguments for the restore command
#[derive(Args)]
pub struct RestoreArgs {
    /// Archive to restore from
    #[arg(short, long)]
    pub archive: PathBuf,

    /// Directory to restore into
    #[arg(short, long)]
    pub dest: PathBuf,

    /// Id of the version to restore (defaults to the most recent)
    #[arg(long = "id", value_name = "ID")]
    pub version: Option<VersionId>,
}

/// Run the restore command
pub async fn run(args: RestoreArgs, config: EngineConfig) -> Result<()> {
    if !args.archive.exists() {
        anyhow::bail!("Archive not found: {}", args.archive.display());
    }

    println!("Restoring from {}", args.archive.display());
    println!("  Destination: {}", args.dest.display());

    let report = blocking(move || {
        let backup = Backup::open_with_config(&args.archive, config)
            .with_context(|| format!("Failed to open archive {}", args.archive.display()))?;
        let report = match args.version {
            Some(id) => backup.restore_at(id, &args.dest)?,
            None => backup.restore(&args.dest)?,
        };
        Ok(report)
    })
    .await?;

    println!("Restored version {}", report.version_id);
    println!("  Files restored: {}", report.files_restored);
    println!("  Bytes written: {}", format_bytes(report.bytes_written));
    println!("  Duration: {:.2}s", report.duration.as_secs_f64());

    if !report.is_complete() {
        println!("  Files failed: {}", report.files_failed());
        for (path, e) in &report.errors {
            eprintln!("  {}: {}", path.display(), e);
        }
        anyhow::bail!("{} file(s) could not be restored", report.files_failed());
    }
    Ok(())
}
