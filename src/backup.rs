//! The `Backup` root object bound to one archive file
//!
//! A backup is built from a source directory (staging an uncommitted
//! version), committed and persisted with [`Backup::save`], compacted with
//! [`Backup::trim_to`] / [`Backup::autotrim`] and materialized with
//! [`Backup::restore`] / [`Backup::restore_at`].
//!
//! Mutating operations take `&mut self`. Across processes, exclusive access
//! to an archive file is the caller's responsibility; every write goes
//! through an atomic replace, so readers never observe a half-written file.

use crate::archive::{read_archive, write_archive, ArchiveState};
use crate::blob::{BlobKey, BlobStore};
use crate::builder::{build_version, StagedVersion};
use crate::config::EngineConfig;
use crate::filter::PathFilter;
use crate::restore::{restore_version, RestoreReport};
use crate::retention::{compact, CompactionReport, RetentionPolicy};
use crate::scanner::Scanner;
use crate::version::{Version, VersionId};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, span, warn, Level};

/// Summary of a `build` call
#[derive(Debug)]
pub struct BuildReport {
    /// Id the staged version receives on save
    pub version_id: VersionId,
    pub files: usize,
    /// Files whose bytes will be newly stored
    pub changed_files: usize,
    pub changed_bytes: u64,
    /// Files skipped because they could not be read
    pub skipped: Vec<(PathBuf, Error)>,
}

/// A versioned backup of one source directory, persisted in one archive file
#[derive(Debug)]
pub struct Backup {
    path: PathBuf,
    config: EngineConfig,
    state: ArchiveState,
    staged: Option<StagedVersion>,
}

impl Backup {
    /// Open the archive at `path`, or start an empty backup if it does not exist
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, EngineConfig::default())
    }

    /// Open with explicit engine configuration
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let state = read_archive(&path)?;
            info!(
                "Opened archive {} ({} versions)",
                path.display(),
                state.versions.len()
            );
            state
        } else {
            ArchiveState::default()
        };

        Ok(Self {
            path,
            config,
            state,
            staged: None,
        })
    }

    /// Open the archive for `owner_tag`. A new archive takes the tag; an
    /// existing archive keeps the tag it was saved with.
    pub fn open_for<P: AsRef<Path>>(path: P, owner_tag: &str, config: EngineConfig) -> Result<Self> {
        let mut backup = Self::open_with_config(path, config)?;
        if backup.state.owner_tag.is_empty() {
            backup.state.owner_tag = owner_tag.to_string();
        } else if backup.state.owner_tag != owner_tag {
            warn!(
                "Archive {} belongs to '{}', not '{}'",
                backup.path.display(),
                backup.state.owner_tag,
                owner_tag
            );
        }
        Ok(backup)
    }

    /// Stage a new version from `source`.
    ///
    /// Replaces any version staged earlier. Nothing is written to disk and no
    /// committed version changes.
    pub fn build<P: AsRef<Path>>(&mut self, source: P, filter: &PathFilter) -> Result<BuildReport> {
        let source = source.as_ref();
        let span = span!(Level::INFO, "build", source = %source.display());
        let _enter = span.enter();

        let mut scan = Scanner::new(self.config.scanner.clone()).scan(source, filter)?;
        let skipped = std::mem::take(&mut scan.skipped);

        let next_id = self.state.last_issued_id + 1;
        let staged = build_version(self.last_version(), scan, next_id, source.to_path_buf());

        let report = BuildReport {
            version_id: next_id,
            files: staged.version.file_count(),
            changed_files: staged.pending.len(),
            changed_bytes: staged.pending_bytes(),
            skipped,
        };
        info!(
            "Staged version {}: {} files, {} changed ({} bytes), {} skipped",
            next_id,
            report.files,
            report.changed_files,
            report.changed_bytes,
            report.skipped.len()
        );

        self.staged = Some(staged);
        Ok(report)
    }

    /// Commit the staged version and persist the archive.
    ///
    /// Applies the configured retention policy afterwards, if any. A failed
    /// trim is logged and does not undo the commit.
    pub fn save(&mut self) -> Result<VersionId> {
        let span = span!(Level::INFO, "save", archive = %self.path.display());
        let _enter = span.enter();

        let staged = self.staged.take().ok_or(Error::NothingStaged)?;
        let id = staged.version.id;
        let previous_id = self.state.last_issued_id;
        let previous_source = self.state.source_path.clone();
        let pending_keys: Vec<_> = staged.pending_keys().collect();

        let StagedVersion {
            version,
            source,
            pending,
        } = staged;
        for (path, data) in pending {
            self.state.blobs.put(BlobKey::new(id, path), data);
        }
        self.state.versions.push(version);
        self.state.last_issued_id = id;
        self.state.source_path = Some(source);

        if let Err(e) = write_archive(&self.path, &self.state, &self.config.archive) {
            // roll the in-memory state back to the last persisted one
            let version = self.state.versions.pop();
            self.state.last_issued_id = previous_id;
            let source = std::mem::replace(&mut self.state.source_path, previous_source);
            let mut pending = BTreeMap::new();
            for key in pending_keys {
                if let Some(data) = self.state.blobs.remove(&key) {
                    pending.insert(key.path, data);
                }
            }
            if let (Some(version), Some(source)) = (version, source) {
                self.staged = Some(StagedVersion {
                    version,
                    source,
                    pending,
                });
            }
            return Err(e);
        }
        info!("Committed version {} to {}", id, self.path.display());

        if let Some(policy) = self.config.retention {
            // the version is already persisted
            if let Err(e) = self.autotrim(policy.min, policy.max) {
                warn!("Retention after saving version {} failed: {}", id, e);
            }
        }
        Ok(id)
    }

    /// Collapse the chain to the `keep` most recent versions and persist
    pub fn trim_to(&mut self, keep: usize) -> Result<CompactionReport> {
        let span = span!(Level::INFO, "trim", archive = %self.path.display(), keep = keep);
        let _enter = span.enter();

        let mut versions = self.state.versions.clone();
        let mut blobs = self.state.blobs.clone();
        let mut staged_version = self.staged.as_ref().map(|s| s.version.clone());

        let report = compact(&mut versions, &mut blobs, keep, staged_version.as_mut())?;
        if report.is_noop() {
            return Ok(report);
        }

        let state = ArchiveState {
            owner_tag: self.state.owner_tag.clone(),
            source_path: self.state.source_path.clone(),
            last_issued_id: self.state.last_issued_id,
            versions,
            blobs,
        };
        write_archive(&self.path, &state, &self.config.archive)?;

        self.state = state;
        if let (Some(staged), Some(version)) = (self.staged.as_mut(), staged_version) {
            staged.version = version;
        }
        Ok(report)
    }

    /// Trim to `min` versions only when more than `max` are present
    pub fn autotrim(&mut self, min: usize, max: usize) -> Result<Option<CompactionReport>> {
        let policy = RetentionPolicy::new(min, max)?;
        if !policy.should_trim(self.state.versions.len()) {
            return Ok(None);
        }
        self.trim_to(policy.min).map(Some)
    }

    /// Restore the most recent committed version into `target`
    pub fn restore<P: AsRef<Path>>(&self, target: P) -> Result<RestoreReport> {
        // ids start at 1, so 0 names "no version at all"
        let version = self.last_version().ok_or(Error::InvalidVersion { id: 0 })?;
        restore_version(version, &self.state.blobs, target.as_ref())
    }

    /// Restore the committed version `id` into `target`
    pub fn restore_at<P: AsRef<Path>>(&self, id: VersionId, target: P) -> Result<RestoreReport> {
        let version = self.version(id).ok_or(Error::InvalidVersion { id })?;
        restore_version(version, &self.state.blobs, target.as_ref())
    }

    /// Archive file this backup is bound to
    pub fn archive_path(&self) -> &Path {
        &self.path
    }

    pub fn owner_tag(&self) -> &str {
        &self.state.owner_tag
    }

    /// Set the owner tag; persisted with the next save or trim
    pub fn set_owner_tag(&mut self, owner_tag: impl Into<String>) {
        self.state.owner_tag = owner_tag.into();
    }

    /// Source directory of the last committed version
    pub fn source_path(&self) -> Option<&Path> {
        self.state.source_path.as_deref()
    }

    /// Committed versions, oldest first
    pub fn versions(&self) -> &[Version] {
        &self.state.versions
    }

    pub fn version(&self, id: VersionId) -> Option<&Version> {
        self.state
            .versions
            .binary_search_by_key(&id, |v| v.id)
            .ok()
            .map(|idx| &self.state.versions[idx])
    }

    /// Most recent committed version
    pub fn last_version(&self) -> Option<&Version> {
        self.state.versions.last()
    }

    /// Version built but not yet saved
    pub fn staged(&self) -> Option<&StagedVersion> {
        self.staged.as_ref()
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.state.blobs
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        source: PathBuf,
        archive: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("files");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("file1.txt"), b"test1").unwrap();
        fs::write(source.join("file2.txt"), b"test2").unwrap();
        let archive = temp.path().join("test.vbak");
        Fixture {
            _temp: temp,
            source,
            archive,
        }
    }

    #[test]
    fn test_build_stages_without_touching_disk() -> Result<()> {
        let fx = fixture();
        let mut backup = Backup::open(&fx.archive)?;
        let report = backup.build(&fx.source, &PathFilter::allow_all())?;

        assert_eq!(report.version_id, 1);
        assert_eq!(report.files, 2);
        assert_eq!(report.changed_bytes, 10);
        assert!(!fx.archive.exists());
        assert!(backup.last_version().is_none());

        let staged = backup.staged().map(|s| &s.version);
        assert_eq!(staged.map(|v| (v.size, v.sizedelta)), Some((10, 10)));
        Ok(())
    }

    #[test]
    fn test_save_without_build_fails() -> Result<()> {
        let fx = fixture();
        let mut backup = Backup::open(&fx.archive)?;
        assert!(matches!(backup.save(), Err(Error::NothingStaged)));

        backup.build(&fx.source, &PathFilter::allow_all())?;
        backup.save()?;
        assert!(matches!(backup.save(), Err(Error::NothingStaged)));
        Ok(())
    }

    #[test]
    fn test_build_missing_source_fails() -> Result<()> {
        let fx = fixture();
        let mut backup = Backup::open(&fx.archive)?;
        let result = backup.build(fx.source.join("missing"), &PathFilter::allow_all());
        assert!(matches!(result, Err(Error::SourceNotFound { .. })));
        assert!(backup.staged().is_none());
        Ok(())
    }

    #[test]
    fn test_rebuild_replaces_staged_version() -> Result<()> {
        let fx = fixture();
        let mut backup = Backup::open(&fx.archive)?;
        backup.build(&fx.source, &PathFilter::allow_all())?;
        fs::write(fx.source.join("file3.txt"), b"three")?;
        backup.build(&fx.source, &PathFilter::allow_all())?;

        assert_eq!(backup.staged().map(|s| s.version.file_count()), Some(3));
        assert_eq!(backup.save()?, 1);
        Ok(())
    }

    #[test]
    fn test_ids_are_not_reused_after_trim() -> Result<()> {
        let fx = fixture();
        let mut backup = Backup::open(&fx.archive)?;
        for content in [&b"a"[..], b"bb", b"ccc"] {
            fs::write(fx.source.join("file1.txt"), content)?;
            backup.build(&fx.source, &PathFilter::allow_all())?;
            backup.save()?;
        }
        backup.trim_to(1)?;

        let mut reopened = Backup::open(&fx.archive)?;
        assert_eq!(reopened.versions().len(), 1);
        assert_eq!(reopened.last_version().map(|v| v.id), Some(3));

        fs::write(fx.source.join("file1.txt"), b"dddd")?;
        reopened.build(&fx.source, &PathFilter::allow_all())?;
        assert_eq!(reopened.save()?, 4);
        Ok(())
    }

    #[test]
    fn test_owner_tag_is_kept_for_existing_archive() -> Result<()> {
        let fx = fixture();
        let mut backup = Backup::open_for(&fx.archive, "GameOne", EngineConfig::default())?;
        backup.build(&fx.source, &PathFilter::allow_all())?;
        backup.save()?;

        let reopened = Backup::open_for(&fx.archive, "GameTwo", EngineConfig::default())?;
        assert_eq!(reopened.owner_tag(), "GameOne");
        assert_eq!(reopened.source_path(), Some(fx.source.as_path()));
        Ok(())
    }

    #[test]
    fn test_configured_retention_applies_on_save() -> Result<()> {
        let fx = fixture();
        let config = EngineConfig::default().with_retention(RetentionPolicy::new(2, 3)?);
        let mut backup = Backup::open_with_config(&fx.archive, config)?;

        for i in 0..4u8 {
            fs::write(fx.source.join("file1.txt"), vec![i; usize::from(i) + 1])?;
            backup.build(&fx.source, &PathFilter::allow_all())?;
            backup.save()?;
        }
        let ids: Vec<_> = backup.versions().iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![3, 4]);
        Ok(())
    }

    #[test]
    fn test_failed_write_keeps_version_staged_for_retry() -> Result<()> {
        let fx = fixture();
        let mut backup = Backup::open(&fx.archive)?;
        backup.build(&fx.source, &PathFilter::allow_all())?;

        // a directory in place of the archive makes the final rename fail
        fs::create_dir_all(&fx.archive)?;
        assert!(backup.save().is_err());
        assert!(backup.versions().is_empty());
        assert!(backup.blobs().is_empty());
        assert_eq!(backup.staged().map(|s| s.version.id), Some(1));
        assert_eq!(backup.staged().map(|s| s.pending.len()), Some(2));

        fs::remove_dir(&fx.archive)?;
        assert_eq!(backup.save()?, 1);

        let reopened = Backup::open(&fx.archive)?;
        let target = fx.source.with_file_name("restored");
        assert!(reopened.restore(&target)?.is_complete());
        assert_eq!(fs::read(target.join("file1.txt"))?, b"test1");
        assert_eq!(fs::read(target.join("file2.txt"))?, b"test2");

        let leftovers: Vec<_> = fs::read_dir(fx.archive.parent().unwrap_or(Path::new(".")))?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        Ok(())
    }

    #[test]
    fn test_failed_retention_does_not_fail_save() -> Result<()> {
        let fx = fixture();
        let mut backup = Backup::open(&fx.archive)?;
        // bypasses validation so the post-commit trim fails
        backup.config.retention = Some(RetentionPolicy { min: 0, max: 1 });

        for content in [&b"a"[..], b"bb"] {
            fs::write(fx.source.join("file1.txt"), content)?;
            backup.build(&fx.source, &PathFilter::allow_all())?;
            backup.save()?;
        }
        assert_eq!(backup.versions().len(), 2);
        assert_eq!(Backup::open(&fx.archive)?.versions().len(), 2);
        Ok(())
    }

    #[test]
    fn test_restore_on_empty_backup_fails() -> Result<()> {
        let fx = fixture();
        let backup = Backup::open(&fx.archive)?;
        assert!(matches!(
            backup.restore(fx.source.join("out")),
            Err(Error::InvalidVersion { id: 0 })
        ));
        Ok(())
    }

    #[test]
    fn test_trim_with_staged_version_keeps_it_consistent() -> Result<()> {
        let fx = fixture();
        let mut backup = Backup::open(&fx.archive)?;
        for content in [&b"a"[..], b"bb"] {
            fs::write(fx.source.join("file1.txt"), content)?;
            backup.build(&fx.source, &PathFilter::allow_all())?;
            backup.save()?;
        }
        backup.build(&fx.source, &PathFilter::allow_all())?;
        backup.trim_to(1)?;
        backup.save()?;

        let target = fx.source.parent().map(|p| p.join("restored")).unwrap_or_default();
        let report = backup.restore(&target)?;
        assert!(report.is_complete());
        assert_eq!(fs::read(target.join("file2.txt"))?, b"test2");
        assert_eq!(backup.last_version().and_then(|v| v.file("file2.txt")).map(|e| e.owner), Some(2));
        Ok(())
    }
}
