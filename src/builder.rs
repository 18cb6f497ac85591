//! Version building: diffing a scan against the last committed version

use crate::blob::BlobKey;
use crate::scanner::ScanReport;
use crate::version::{FileEntry, Version, VersionId};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// A built but uncommitted version together with the bytes it must store
#[derive(Debug, Clone)]
pub struct StagedVersion {
    /// The version as it will be committed. Its id is the one `save` assigns.
    pub version: Version,
    /// Source directory the version was built from
    pub source: PathBuf,
    /// Bytes of new or changed files, keyed by relative path
    pub pending: BTreeMap<String, Vec<u8>>,
}

impl StagedVersion {
    /// Bytes that will be newly written to the blob store on commit
    pub fn pending_bytes(&self) -> u64 {
        self.pending.values().map(|d| d.len() as u64).sum()
    }

    /// Blob slots that will be written on commit
    pub fn pending_keys(&self) -> impl Iterator<Item = BlobKey> + '_ {
        let id = self.version.id;
        self.pending.keys().map(move |path| BlobKey::new(id, path.clone()))
    }
}

/// Build the next version from a scan.
///
/// A path whose fingerprint equals the one recorded in `previous` reuses the
/// previous entry's owner and size. New or changed paths are owned by
/// `next_id` and their bytes are staged. Paths missing from the scan are
/// simply left out.
pub fn build_version(
    previous: Option<&Version>,
    scan: ScanReport,
    next_id: VersionId,
    source: PathBuf,
) -> StagedVersion {
    let mut files = BTreeMap::new();
    let mut pending = BTreeMap::new();

    for scanned in scan.files {
        let unchanged = previous
            .and_then(|v| v.file(&scanned.rel_path))
            .filter(|prev| prev.fingerprint == scanned.fingerprint);

        let entry = match unchanged {
            Some(prev) => {
                debug!("Unchanged: {} (owner {})", scanned.rel_path, prev.owner);
                prev.clone()
            }
            None => {
                debug!("Changed: {} ({} bytes)", scanned.rel_path, scanned.size());
                let entry = FileEntry {
                    size: scanned.size(),
                    fingerprint: scanned.fingerprint,
                    owner: next_id,
                };
                pending.insert(scanned.rel_path.clone(), scanned.data);
                entry
            }
        };
        files.insert(scanned.rel_path, entry);
    }

    StagedVersion {
        version: Version::new(next_id, Utc::now(), files),
        source,
        pending,
    }
}
