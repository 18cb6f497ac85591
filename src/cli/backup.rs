//! Backup command implementation.

use anyhow::{Context, Result};
use clap::Args;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;
use tracing::warn;
use crate::catalog::archive_file_name;
use crate::cli::{blocking, default_owner, format_bytes};
use crate::config::EngineConfig;
use crate::retention::RetentionPolicy;
use crate::{Backup, PathFilter};

/// Arguments for the backup command
#[derive(Args)]
pub struct BackupArgs {
    /// Source directory to back up
    #[arg(short, long)]
    pub source: PathBuf,

    /// Archive file to write
    #[arg(short, long, required_unless_present = "dest")]
    pub archive: Option<PathBuf>,

    /// Directory to place a conventionally named archive in
    #[arg(short, long, conflicts_with = "archive")]
    pub dest: Option<PathBuf>,

    /// Owner tag stored in the archive (defaults to the source directory name)
    #[arg(long)]
    pub owner: Option<String>,

    /// Only back up files matching this glob (repeatable)
    #[arg(long)]
    pub include: Vec<String>,

    /// Skip files matching this glob (repeatable)
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Trim to <min> versions once more than <max> exist (a lone <max> keeps 2)
    #[arg(long, value_name = "MIN:MAX")]
    pub trim: Option<RetentionPolicy>,
}

/// Arguments for the backup-all command
#[derive(Args)]
pub struct BackupAllArgs {
    /// Directory receiving one archive per source
    #[arg(short, long)]
    pub dest: PathBuf,

    /// Source directories to back up
    #[arg(short, long, num_args = 1.., required = true)]
    pub source: Vec<PathBuf>,

    /// Owner tag for every archive (defaults to each source directory name)
    #[arg(long)]
    pub owner: Option<String>,

    /// Trim to <min> versions once more than <max> exist (a lone <max> keeps 2)
    #[arg(long, value_name = "MIN:MAX")]
    pub trim: Option<RetentionPolicy>,
}

/// A single archive job
struct Job {
    source: PathBuf,
    archive: PathBuf,
    owner: String,
    filter: PathFilter,
    config: EngineConfig,
}

/// Run the backup command
pub async fn run(args: BackupArgs, mut config: EngineConfig) -> Result<()> {
    if let Some(policy) = args.trim {
        config.retention = Some(policy);
    }
    let owner = args.owner.unwrap_or_else(|| default_owner(&args.source));
    let archive = match (args.archive, args.dest) {
        (Some(archive), _) => archive,
        (None, Some(dest)) => dest.join(archive_file_name(&owner, &args.source)),
        (None, None) => anyhow::bail!("either --archive or --dest is required"),
    };
    let filter = PathFilter::new(&args.include, &args.exclude)?;

    let job = Job {
        source: args.source,
        archive,
        owner,
        filter,
        config,
    };
    let summary = blocking(move || run_job(job)).await?;
    println!("{}", summary);
    Ok(())
}

/// Run the backup-all command
pub async fn run_all(args: BackupAllArgs, mut config: EngineConfig) -> Result<()> {
    if let Some(policy) = args.trim {
        config.retention = Some(policy);
    }

    let mut jobs = JoinSet::new();
    for job in plan_jobs(&args.dest, args.source, args.owner.as_deref(), &config) {
        jobs.spawn_blocking(move || run_job(job));
    }

    let mut failures = 0;
    while let Some(joined) = jobs.join_next().await {
        match joined.context("Worker task failed")? {
            Ok(summary) => println!("{}", summary),
            Err(e) => {
                failures += 1;
                eprintln!("Backup failed: {:#}", e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} backup(s) failed", failures);
    }
    Ok(())
}

/// One job per distinct archive file; repeated sources are dropped
fn plan_jobs(
    dest: &Path,
    sources: Vec<PathBuf>,
    owner: Option<&str>,
    config: &EngineConfig,
) -> Vec<Job> {
    let mut seen = HashSet::new();
    let mut jobs = Vec::new();
    for source in sources {
        let owner = owner.map(str::to_string).unwrap_or_else(|| default_owner(&source));
        let archive = dest.join(archive_file_name(&owner, &source));
        if !seen.insert(archive.clone()) {
            warn!("Skipping duplicate source {} (archive {})", source.display(), archive.display());
            continue;
        }
        jobs.push(Job {
            source,
            archive,
            owner,
            filter: PathFilter::allow_all(),
            config: config.clone(),
        });
    }
    jobs
}

fn run_job(job: Job) -> Result<String> {
    let Job {
        source,
        archive,
        owner,
        filter,
        config,
    } = job;

    let mut backup = Backup::open_for(&archive, &owner, config)
        .with_context(|| format!("Failed to open archive {}", archive.display()))?;
    let report = backup
        .build(&source, &filter)
        .with_context(|| format!("Failed to scan {}", source.display()))?;
    for (path, e) in &report.skipped {
        eprintln!("  skipped {}: {}", path.display(), e);
    }
    let id = backup
        .save()
        .with_context(|| format!("Failed to save archive {}", archive.display()))?;

    Ok(describe(&backup, id, &source, &archive, report.changed_files))
}

fn describe(backup: &Backup, id: u64, source: &Path, archive: &Path, changed: usize) -> String {
    let (size, delta) = backup
        .version(id)
        .map(|v| (v.size, v.sizedelta))
        .unwrap_or_default();
    format!(
        "Backed up {} -> {}\n  Version: {}\n  Files changed: {}\n  Size: {} (new: {})\n  Versions kept: {}",
        source.display(),
        archive.display(),
        id,
        changed,
        format_bytes(size),
        format_bytes(delta),
        backup.versions().len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_jobs_gives_each_archive_one_writer() {
        let dest = Path::new("/backups");
        let sources = vec![
            PathBuf::from("/saves/GameA"),
            PathBuf::from("/saves/GameB"),
            PathBuf::from("/saves/GameA"),
        ];
        let jobs = plan_jobs(dest, sources, None, &EngineConfig::default());

        let planned: Vec<_> = jobs.iter().map(|j| (j.owner.as_str(), j.source.as_path())).collect();
        assert_eq!(
            planned,
            vec![
                ("GameA", Path::new("/saves/GameA")),
                ("GameB", Path::new("/saves/GameB"))
            ]
        );
        assert_ne!(jobs[0].archive, jobs[1].archive);
        assert!(jobs.iter().all(|j| j.archive.starts_with(dest)));
    }

    #[test]
    fn test_plan_jobs_keeps_same_source_under_different_owners_apart() {
        let dest = Path::new("/backups");
        let source = PathBuf::from("/saves/shared");
        let one = plan_jobs(dest, vec![source.clone()], Some("One"), &EngineConfig::default());
        let two = plan_jobs(dest, vec![source], Some("Two"), &EngineConfig::default());
        assert_ne!(one[0].archive, two[0].archive);
    }
}
