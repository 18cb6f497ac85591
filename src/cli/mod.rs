//! Command-line interface for vbak.
//!
//! Thin orchestration over the library: every subcommand opens one or more
//! archives, runs the blocking engine work on tokio's blocking pool and
//! prints a summary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use crate::config::EngineConfig;

pub mod backup;
pub mod list;
pub mod restore;
pub mod trim;
pub mod versions;

/// vbak - versioned, deduplicating directory backups
#[derive(Parser)]
#[command(name = "vbak")]
#[command(about = "Versioned, deduplicating single-file backups of directory trees")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Back up one source directory into an archive
    Backup(backup::BackupArgs),
    /// Back up several source directories in parallel, one archive each
    BackupAll(backup::BackupAllArgs),
    /// Restore the latest or a specific version
    Restore(restore::RestoreArgs),
    /// Show the versions stored in an archive
    Versions(versions::VersionsArgs),
    /// Discard old versions
    Trim(trim::TrimArgs),
    /// List the archives in a directory
    List(list::ListArgs),
}

impl Cli {
    /// Engine configuration from `--config`, or the defaults
    pub fn engine_config(&self) -> Result<EngineConfig> {
        match &self.config {
            Some(path) => EngineConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display())),
            None => Ok(EngineConfig::default()),
        }
    }
}

/// Run a blocking engine operation off the async runtime
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Worker task failed")?
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Owner tag derived from the last component of a source path
pub(crate) fn default_owner(source: &Path) -> String {
    source
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| "backup".to_string())
}
