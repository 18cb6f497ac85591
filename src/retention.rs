//! Retention: collapsing the version chain while keeping survivors restorable
//!
//! Compaction discards the oldest versions. Bytes still referenced by a
//! surviving version but physically owned by a discarded one are copied
//! forward into the oldest survivor (the anchor), every entry pointing at
//! them is redirected to the anchor, and unreachable slots are reclaimed.

use crate::blob::{reachable_keys, BlobKey, BlobStore, GcStats};
use crate::version::{Version, VersionId};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, span, Level};

/// Versions kept when only a maximum is given
pub const DEFAULT_TRIM_MIN: usize = 2;

/// Hysteresis bounds for automatic trimming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Versions kept after a trim
    pub min: usize,
    /// Version count that must be exceeded before trimming
    pub max: usize,
}

impl RetentionPolicy {
    pub fn new(min: usize, max: usize) -> Result<Self> {
        let policy = Self { min, max };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min == 0 {
            return Err(Error::InvalidRetention {
                reason: "at least one version must be kept".to_string(),
            });
        }
        if self.min > self.max {
            return Err(Error::InvalidRetention {
                reason: format!("min ({}) exceeds max ({})", self.min, self.max),
            });
        }
        Ok(())
    }

    /// Whether a chain of `count` versions should be trimmed
    pub fn should_trim(&self, count: usize) -> bool {
        count > self.max
    }
}

impl std::str::FromStr for RetentionPolicy {
    type Err = Error;

    /// Parse `"<min>:<max>"`, or a single `"<max>"` trimming down to
    /// [`DEFAULT_TRIM_MIN`] versions (or `max`, if smaller)
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidRetention {
            reason: format!("expected <min>:<max>, got '{}'", s),
        };
        match s.split_once(':') {
            Some((min, max)) => {
                let min = min.trim().parse().map_err(|_| invalid())?;
                let max = max.trim().parse().map_err(|_| invalid())?;
                Self::new(min, max)
            }
            None => {
                let max: usize = s.trim().parse().map_err(|_| invalid())?;
                Self::new(DEFAULT_TRIM_MIN.min(max), max)
            }
        }
    }
}

/// What a compaction did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Ids of the discarded versions, oldest first
    pub removed: Vec<VersionId>,
    /// Oldest surviving version, if anything was discarded
    pub anchor: Option<VersionId>,
    /// Blob slots copied forward into the anchor
    pub migrated: usize,
    pub gc: GcStats,
}

impl CompactionReport {
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty()
    }
}

/// Collapse `versions` to its `keep` most recent entries.
///
/// `pending` holds versions that are not part of the chain yet but may point
/// at discarded owners (a staged version); their entries are redirected too
/// and their references keep slots alive.
pub fn compact(
    versions: &mut Vec<Version>,
    blobs: &mut BlobStore,
    keep: usize,
    mut pending: Option<&mut Version>,
) -> Result<CompactionReport> {
    let span = span!(Level::INFO, "compact", keep = keep);
    let _enter = span.enter();

    if keep == 0 {
        return Err(Error::InvalidRetention {
            reason: "at least one version must be kept".to_string(),
        });
    }
    if versions.len() <= keep {
        debug!("Nothing to compact: {} versions, keeping {}", versions.len(), keep);
        return Ok(CompactionReport::default());
    }

    let split = versions.len() - keep;
    let anchor_id = versions[split].id;

    // Slots owned by versions older than the anchor but still referenced
    let mut migrate = BTreeSet::new();
    let survivors = versions[split..].iter().chain(pending.as_deref());
    for version in survivors {
        for (path, entry) in &version.files {
            if entry.owner < anchor_id {
                migrate.insert(BlobKey::new(entry.owner, path.clone()));
            }
        }
    }
    if let Some(missing) = migrate.iter().find(|key| !blobs.contains(key)) {
        return Err(Error::InvalidVersion { id: missing.owner });
    }

    for key in &migrate {
        debug!("Migrating {} -> {}", key, anchor_id);
        blobs.copy(key, BlobKey::new(anchor_id, key.path.clone()));
    }

    let survivors = versions.split_off(split);
    let discarded = std::mem::replace(versions, survivors);

    for version in versions.iter_mut().chain(pending.as_deref_mut()) {
        for entry in version.files.values_mut() {
            if entry.owner < anchor_id {
                entry.owner = anchor_id;
            }
        }
        version.recompute_sizes();
    }

    let reachable = reachable_keys(versions.iter().chain(pending.as_deref()));
    let gc = blobs.retain_reachable(&reachable);

    let report = CompactionReport {
        removed: discarded.iter().map(|v| v.id).collect(),
        anchor: Some(anchor_id),
        migrated: migrate.len(),
        gc,
    };
    info!(
        "Compacted chain: removed {:?}, anchor {}, {} slots migrated, {} bytes freed",
        report.removed, anchor_id, report.migrated, report.gc.bytes_freed
    );
    Ok(report)
}
