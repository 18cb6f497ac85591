//! Blob store holding the physical bytes of backed-up files
//!
//! Slots are keyed by `(owner version id, relative path)`. A slot is
//! reachable while some file entry in the chain points at that pair;
//! unreachable slots are reclaimed by [`BlobStore::retain_reachable`].

use crate::version::{Version, VersionId};
use std::collections::{BTreeMap, BTreeSet};

/// Address of a blob slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobKey {
    pub owner: VersionId,
    pub path: String,
}

impl BlobKey {
    pub fn new(owner: VersionId, path: impl Into<String>) -> Self {
        Self {
            owner,
            path: path.into(),
        }
    }
}

impl std::fmt::Display for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.owner, self.path)
    }
}

/// Statistics from a garbage collection pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub slots_removed: usize,
    pub bytes_freed: u64,
}

/// In-memory blob store of one archive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobStore {
    slots: BTreeMap<BlobKey, Vec<u8>>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store bytes in a slot, replacing any previous content
    pub fn put(&mut self, key: BlobKey, data: Vec<u8>) {
        self.slots.insert(key, data);
    }

    /// Retrieve the bytes held by a slot
    pub fn get(&self, key: &BlobKey) -> Option<&[u8]> {
        self.slots.get(key).map(Vec::as_slice)
    }

    /// Remove a slot, returning its content
    pub fn remove(&mut self, key: &BlobKey) -> Option<Vec<u8>> {
        self.slots.remove(key)
    }

    /// Check if a slot exists in the store
    pub fn contains(&self, key: &BlobKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Duplicate the content of `from` into `to`. Returns false if `from` is empty.
    pub fn copy(&mut self, from: &BlobKey, to: BlobKey) -> bool {
        match self.slots.get(from) {
            Some(data) => {
                let data = data.clone();
                self.slots.insert(to, data);
                true
            }
            None => false,
        }
    }

    /// Drop every slot not present in `reachable`
    pub fn retain_reachable(&mut self, reachable: &BTreeSet<BlobKey>) -> GcStats {
        let mut stats = GcStats::default();
        self.slots.retain(|key, data| {
            let keep = reachable.contains(key);
            if !keep {
                stats.slots_removed += 1;
                stats.bytes_freed += data.len() as u64;
            }
            keep
        });
        stats
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total stored bytes
    pub fn total_bytes(&self) -> u64 {
        self.slots.values().map(|d| d.len() as u64).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BlobKey, &[u8])> {
        self.slots.iter().map(|(k, v)| (k, v.as_slice()))
    }
}

/// Every `(owner, path)` pair referenced by the given versions
pub fn reachable_keys<'a, I>(versions: I) -> BTreeSet<BlobKey>
where
    I: IntoIterator<Item = &'a Version>,
{
    versions
        .into_iter()
        .flat_map(|v| {
            v.files
                .iter()
                .map(|(path, entry)| BlobKey::new(entry.owner, path.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use crate::version::FileEntry;
    use chrono::Utc;

    #[test]
    fn test_put_get_copy() {
        let mut store = BlobStore::new();
        store.put(BlobKey::new(1, "a.sav"), b"hello".to_vec());

        assert_eq!(store.get(&BlobKey::new(1, "a.sav")), Some(&b"hello"[..]));
        assert!(store.get(&BlobKey::new(2, "a.sav")).is_none());

        assert!(store.copy(&BlobKey::new(1, "a.sav"), BlobKey::new(3, "a.sav")));
        assert!(!store.copy(&BlobKey::new(9, "a.sav"), BlobKey::new(3, "b.sav")));
        assert_eq!(store.len(), 2);
        assert_eq!(store.total_bytes(), 10);
    }

    #[test]
    fn test_retain_reachable_reclaims_orphans() {
        let mut store = BlobStore::new();
        store.put(BlobKey::new(1, "a.sav"), vec![0; 4]);
        store.put(BlobKey::new(1, "b.sav"), vec![0; 6]);
        store.put(BlobKey::new(2, "a.sav"), vec![0; 8]);

        let mut files = BTreeMap::new();
        files.insert(
            "a.sav".to_string(),
            FileEntry {
                size: 8,
                fingerprint: Fingerprint::from_bytes(&[0; 8]),
                owner: 2,
            },
        );
        let version = Version::new(2, Utc::now(), files);

        let stats = store.retain_reachable(&reachable_keys([&version]));
        assert_eq!(stats.slots_removed, 2);
        assert_eq!(stats.bytes_freed, 10);
        assert!(store.contains(&BlobKey::new(2, "a.sav")));
        assert_eq!(store.len(), 1);
    }
}
