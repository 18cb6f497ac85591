//! Source tree scanning: enumeration, filtering, reading and fingerprinting

use crate::filter::PathFilter;
use crate::fingerprint::Fingerprint;
use crate::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, span, warn, Level};
use walkdir::WalkDir;

/// Configuration for scan operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Whether to descend into symlinked directories. Symlinks to regular
    /// files are always read through.
    pub follow_symlinks: bool,
    /// Read and hash files on the rayon thread pool
    pub parallel: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            parallel: true,
        }
    }
}

/// A file read from the source tree
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Path relative to the source root, `/`-separated
    pub rel_path: String,
    pub fingerprint: Fingerprint,
    pub data: Vec<u8>,
}

impl ScannedFile {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Outcome of a scan: readable files plus the ones skipped
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Files sorted by relative path
    pub files: Vec<ScannedFile>,
    /// Entries that could not be read, with the reason
    pub skipped: Vec<(PathBuf, Error)>,
}

impl ScanReport {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(ScannedFile::size).sum()
    }
}

/// Walks a source directory and produces fingerprinted file contents
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    config: ScannerConfig,
}

impl Scanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Scan `source` recursively, keeping the files accepted by `filter`.
    ///
    /// Fails only when `source` itself is not a readable directory; per-file
    /// failures end up in [`ScanReport::skipped`].
    pub fn scan(&self, source: &Path, filter: &PathFilter) -> Result<ScanReport> {
        let span = span!(Level::INFO, "scan", source = %source.display());
        let _enter = span.enter();

        if !source.is_dir() || fs::read_dir(source).is_err() {
            return Err(Error::SourceNotFound {
                path: source.display().to_string(),
            });
        }

        let mut candidates = Vec::new();
        let mut skipped = Vec::new();

        for entry in WalkDir::new(source).follow_links(self.config.follow_symlinks) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.to_path_buf());
                    warn!("Skipping entry due to error: {}", e);
                    skipped.push((
                        path.clone(),
                        Error::PerFileRead {
                            path: path.display().to_string(),
                            reason: e.to_string(),
                        },
                    ));
                    continue;
                }
            };

            if !entry.file_type().is_file() && !is_file_symlink(&entry) {
                if entry.path_is_symlink() {
                    debug!("Skipping symlink that is not a regular file: {}", entry.path().display());
                }
                continue;
            }

            let rel_path = match relative_key(entry.path(), source) {
                Some(rel) => rel,
                None => {
                    warn!("Skipping file with non UTF-8 path: {}", entry.path().display());
                    skipped.push((
                        entry.path().to_path_buf(),
                        Error::PerFileRead {
                            path: entry.path().display().to_string(),
                            reason: "path is not valid UTF-8".to_string(),
                        },
                    ));
                    continue;
                }
            };

            if !filter.is_included(&rel_path) {
                debug!("Filtered out: {}", rel_path);
                continue;
            }

            candidates.push((entry.into_path(), rel_path));
        }

        let read = |(full, rel): &(PathBuf, String)| -> std::result::Result<ScannedFile, (PathBuf, Error)> {
            let data = fs::read(full).map_err(|e| {
                (
                    full.clone(),
                    Error::PerFileRead {
                        path: full.display().to_string(),
                        reason: e.to_string(),
                    },
                )
            })?;
            Ok(ScannedFile {
                rel_path: rel.clone(),
                fingerprint: Fingerprint::from_bytes(&data),
                data,
            })
        };

        let results: Vec<_> = if self.config.parallel {
            candidates.par_iter().map(read).collect()
        } else {
            candidates.iter().map(read).collect()
        };

        let mut files = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(file) => files.push(file),
                Err((path, e)) => {
                    warn!("Failed to read {}: {}", path.display(), e);
                    skipped.push((path, e));
                }
            }
        }
        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

        let report = ScanReport { files, skipped };
        info!(
            "Scan completed: {} files, {} bytes, {} skipped",
            report.files.len(),
            report.total_bytes(),
            report.skipped.len()
        );
        Ok(report)
    }
}

/// A symlink whose target is a regular file
fn is_file_symlink(entry: &walkdir::DirEntry) -> bool {
    entry.path_is_symlink() && fs::metadata(entry.path()).is_ok_and(|m| m.is_file())
}

/// Normalized `/`-separated key for `path` relative to `root`
pub fn relative_key(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
