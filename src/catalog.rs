//! Archive naming and discovery of archives in a backup directory

use crate::archive::{read_archive, ARCHIVE_EXTENSION};
use crate::Result;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Conventional file name for the archive of `source` owned by `owner_tag`:
/// `<owner>_<HASH6>.vbak`, where `HASH6` identifies the source directory.
pub fn archive_file_name(owner_tag: &str, source: &Path) -> String {
    let digest = Sha256::digest(source.to_string_lossy().as_bytes());
    let short = hex::encode_upper(&digest[..3]);
    let owner: String = owner_tag
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    format!("{}_{}.{}", owner, short, ARCHIVE_EXTENSION)
}

/// Archives found in a directory, grouped by owner tag
#[derive(Debug, Default)]
pub struct Catalog {
    pub archives: BTreeMap<String, Vec<PathBuf>>,
    /// Files with the archive extension that failed to load
    pub unreadable: Vec<PathBuf>,
}

impl Catalog {
    pub fn owners(&self) -> impl Iterator<Item = &str> {
        self.archives.keys().map(String::as_str)
    }

    pub fn archives_for(&self, owner_tag: &str) -> &[PathBuf] {
        self.archives.get(owner_tag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.archives.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.archives.is_empty()
    }
}

/// Load every archive directly inside `dir` and index it by owner tag
pub fn discover(dir: &Path) -> Result<Catalog> {
    let mut catalog = Catalog::default();
    let mut paths = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == ARCHIVE_EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        match read_archive(&path) {
            Ok(state) => catalog.archives.entry(state.owner_tag).or_default().push(path),
            Err(e) => {
                warn!("Skipping unreadable archive {}: {}", path.display(), e);
                catalog.unreadable.push(path);
            }
        }
    }

    info!("Loaded {} archives from '{}'", catalog.len(), dir.display());
    Ok(catalog)
}
