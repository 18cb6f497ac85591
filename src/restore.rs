//! Restore functionality for materializing a version onto disk

use crate::blob::{BlobKey, BlobStore};
use crate::version::{Version, VersionId};
use crate::{Error, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level};

/// Result of a restore operation
#[derive(Debug)]
pub struct RestoreReport {
    /// Version that was restored
    pub version_id: VersionId,
    /// Number of files successfully restored
    pub files_restored: usize,
    /// Total bytes written
    pub bytes_written: u64,
    /// Duration of the operation
    pub duration: Duration,
    /// Files that could not be restored
    pub errors: Vec<(PathBuf, Error)>,
}

impl RestoreReport {
    /// True when every file of the version was written
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn files_failed(&self) -> usize {
        self.errors.len()
    }
}

/// Write every file of `version` below `target_root`.
///
/// Existing files are overwritten and intermediate directories created.
/// Failures on individual files are collected in the report; only an
/// unusable `target_root` fails the whole operation.
pub fn restore_version(version: &Version, blobs: &BlobStore, target_root: &Path) -> Result<RestoreReport> {
    let span = span!(Level::INFO, "restore", version = version.id, target = %target_root.display());
    let _enter = span.enter();
    let start_time = Instant::now();

    fs::create_dir_all(target_root).map_err(|e| Error::destination(target_root, e))?;

    let mut report = RestoreReport {
        version_id: version.id,
        files_restored: 0,
        bytes_written: 0,
        duration: Duration::default(),
        errors: Vec::new(),
    };

    for (rel_path, entry) in &version.files {
        let target_path = match target_for(target_root, rel_path) {
            Some(path) => path,
            None => {
                let path = target_root.join(rel_path);
                warn!("Refusing to restore outside the target: {}", rel_path);
                report.errors.push((
                    path.clone(),
                    Error::destination(&path, "path escapes the restore target"),
                ));
                continue;
            }
        };

        let key = BlobKey::new(entry.owner, rel_path.clone());
        let data = match blobs.get(&key) {
            Some(data) => data,
            None => {
                warn!("Cannot restore {}: blob {} is missing", rel_path, key);
                report.errors.push((
                    target_path,
                    Error::PerFileRead {
                        path: rel_path.clone(),
                        reason: format!("blob {} is missing from the archive", key),
                    },
                ));
                continue;
            }
        };

        match write_file(&target_path, data) {
            Ok(()) => {
                debug!("Restored file: {} ({} bytes)", target_path.display(), data.len());
                report.files_restored += 1;
                report.bytes_written += data.len() as u64;
            }
            Err(e) => {
                warn!("Failed to restore {}: {}", target_path.display(), e);
                report.errors.push((target_path, e));
            }
        }
    }

    report.duration = start_time.elapsed();
    info!(
        "Restore completed: {} files restored, {} failed, {} bytes in {:?}",
        report.files_restored,
        report.files_failed(),
        report.bytes_written,
        report.duration
    );
    Ok(report)
}

fn write_file(target_path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = target_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::destination(parent, e))?;
    }
    fs::write(target_path, data).map_err(|e| Error::destination(target_path, e))
}

/// Join a stored `/`-separated key onto the target, rejecting anything but plain names
fn target_for(target_root: &Path, rel_path: &str) -> Option<PathBuf> {
    let relative = Path::new(rel_path);
    let plain = relative.components().all(|c| matches!(c, Component::Normal(_)));
    if rel_path.is_empty() || !plain {
        return None;
    }
    Some(rel_path.split('/').fold(target_root.to_path_buf(), |acc, part| acc.join(part)))
}
