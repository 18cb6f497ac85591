//! Versions and file entries: the ownership-pointer data model
//!
//! Every committed [`Version`] maps relative paths to [`FileEntry`] records.
//! An entry's `owner` names the version whose blob slot physically holds the
//! bytes for that path, which may be an earlier version than the one
//! containing the entry.

use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of a committed version. Issued monotonically and never reused.
pub type VersionId = u64;

/// A file as recorded in one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File size in bytes
    pub size: u64,
    /// BLAKE3 fingerprint of the file content
    pub fingerprint: Fingerprint,
    /// Version whose blob slot holds the bytes for this path
    pub owner: VersionId,
}

/// One snapshot of the tracked file set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub created_at: DateTime<Utc>,
    /// Sum of all entry sizes
    pub size: u64,
    /// Sum of the sizes of entries owned by this version
    pub sizedelta: u64,
    /// Relative path (`/`-separated) to entry
    pub files: BTreeMap<String, FileEntry>,
}

impl Version {
    /// Create a version from its file map, computing the aggregates
    pub fn new(id: VersionId, created_at: DateTime<Utc>, files: BTreeMap<String, FileEntry>) -> Self {
        let mut version = Self {
            id,
            created_at,
            size: 0,
            sizedelta: 0,
            files,
        };
        version.recompute_sizes();
        version
    }

    /// Recompute `size` and `sizedelta` from the file map
    pub fn recompute_sizes(&mut self) {
        let (size, sizedelta) = self.computed_sizes();
        self.size = size;
        self.sizedelta = sizedelta;
    }

    /// Aggregates as implied by the current file map
    pub fn computed_sizes(&self) -> (u64, u64) {
        self.files.values().fold((0, 0), |(size, delta), entry| {
            let owned = if entry.owner == self.id { entry.size } else { 0 };
            (size + entry.size, delta + owned)
        })
    }

    /// Find a file entry by relative path
    pub fn file(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(path)
    }

    /// Number of files recorded
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Entries whose bytes live in this version
    pub fn owned_files(&self) -> impl Iterator<Item = (&String, &FileEntry)> {
        let id = self.id;
        self.files.iter().filter(move |(_, e)| e.owner == id)
    }

    /// Check the per-version structural invariants, returning a reason on failure
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        if let Some((path, entry)) = self.files.iter().find(|(_, e)| e.owner > self.id) {
            return Err(format!(
                "version {}: '{}' is owned by later version {}",
                self.id, path, entry.owner
            ));
        }
        let (size, sizedelta) = self.computed_sizes();
        if size != self.size || sizedelta != self.sizedelta {
            return Err(format!(
                "version {}: stored sizes ({}, {}) disagree with entries ({}, {})",
                self.id, self.size, self.sizedelta, size, sizedelta
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(size: u64, owner: VersionId) -> FileEntry {
        FileEntry {
            size,
            fingerprint: Fingerprint::from_bytes(&size.to_le_bytes()),
            owner,
        }
    }

    #[test]
    fn test_sizes_count_only_owned_entries_in_delta() {
        let mut files = BTreeMap::new();
        files.insert("a.sav".to_string(), entry(5, 1));
        files.insert("b.sav".to_string(), entry(9, 2));

        let version = Version::new(2, Utc::now(), files);
        assert_eq!(version.size, 14);
        assert_eq!(version.sizedelta, 9);
        assert_eq!(version.owned_files().count(), 1);
        assert!(version.check_invariants().is_ok());
    }

    #[test]
    fn test_invariant_rejects_future_owner() {
        let mut files = BTreeMap::new();
        files.insert("a.sav".to_string(), entry(5, 3));
        let version = Version::new(2, Utc::now(), files);
        assert!(version.check_invariants().is_err());
    }

    #[test]
    fn test_invariant_rejects_stale_aggregates() {
        let mut files = BTreeMap::new();
        files.insert("a.sav".to_string(), entry(5, 1));
        let mut version = Version::new(1, Utc::now(), files);
        version.sizedelta = 0;
        assert!(version.check_invariants().is_err());
        version.recompute_sizes();
        assert!(version.check_invariants().is_ok());
    }
}
