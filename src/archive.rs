//! Archive file format and atomic persistence
//!
//! An archive is a single file:
//!
//! ```text
//! "VBAK" | format version (u32 LE) | gzip( header length (u64 LE) | JSON header | blob segment )
//! ```
//!
//! The JSON header carries the owner tag, source path, id high-water mark,
//! the ordered version chain and an index of `(owner, path) -> (offset, length)`
//! into the blob segment, which holds the raw file bytes back to back.

use crate::blob::{reachable_keys, BlobKey, BlobStore};
use crate::version::{Version, VersionId};
use crate::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, span, Level};
use uuid::Uuid;

/// Leading bytes of every archive file
pub const ARCHIVE_MAGIC: &[u8; 4] = b"VBAK";

/// Current archive format version
pub const FORMAT_VERSION: u32 = 1;

/// Conventional archive file extension
pub const ARCHIVE_EXTENSION: &str = "vbak";

/// Default gzip level
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Archive-level options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// gzip level, 0 (store) to 9 (best)
    pub compression_level: u32,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// Complete persisted state of one backup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveState {
    pub owner_tag: String,
    pub source_path: Option<PathBuf>,
    /// Highest version id ever issued, including ids removed by compaction
    pub last_issued_id: VersionId,
    pub versions: Vec<Version>,
    pub blobs: BlobStore,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArchiveHeader {
    format_version: u32,
    owner_tag: String,
    source_path: Option<PathBuf>,
    last_issued_id: VersionId,
    versions: Vec<Version>,
    blobs: Vec<BlobIndexEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlobIndexEntry {
    owner: VersionId,
    path: String,
    offset: u64,
    length: u64,
}

/// Serialize `state` to `path`, replacing any existing file atomically.
///
/// Only blob slots reachable from the version chain are written.
pub fn write_archive(path: &Path, state: &ArchiveState, config: &ArchiveConfig) -> Result<()> {
    let span = span!(Level::DEBUG, "write_archive", path = %path.display());
    let _enter = span.enter();

    let reachable = reachable_keys(&state.versions);
    let mut index = Vec::with_capacity(reachable.len());
    let mut offset = 0u64;
    for key in &reachable {
        let data = state
            .blobs
            .get(key)
            .ok_or(Error::InvalidVersion { id: key.owner })?;
        index.push(BlobIndexEntry {
            owner: key.owner,
            path: key.path.clone(),
            offset,
            length: data.len() as u64,
        });
        offset += data.len() as u64;
    }

    let header = ArchiveHeader {
        format_version: FORMAT_VERSION,
        owner_tag: state.owner_tag.clone(),
        source_path: state.source_path.clone(),
        last_issued_id: state.last_issued_id,
        versions: state.versions.clone(),
        blobs: index,
    };
    let header_json = serde_json::to_vec(&header)?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    let written = write_container(&temp_path, &header_json, &reachable, state, config)
        .and_then(|bytes| fs::rename(&temp_path, path).map(|_| bytes).map_err(Error::from));

    match written {
        Ok(bytes) => {
            info!(
                "Archive written: {} versions, {} blobs, {} bytes on disk",
                state.versions.len(),
                reachable.len(),
                bytes
            );
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            Err(e)
        }
    }
}

fn write_container(
    temp_path: &Path,
    header_json: &[u8],
    reachable: &std::collections::BTreeSet<BlobKey>,
    state: &ArchiveState,
    config: &ArchiveConfig,
) -> Result<u64> {
    let file = File::create(temp_path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(ARCHIVE_MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;

    let mut encoder = GzEncoder::new(writer, Compression::new(config.compression_level.min(9)));
    encoder.write_all(&(header_json.len() as u64).to_le_bytes())?;
    encoder.write_all(header_json)?;
    for key in reachable {
        if let Some(data) = state.blobs.get(key) {
            encoder.write_all(data)?;
        }
    }

    let writer = encoder.finish()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(file.metadata()?.len())
}

/// Load an archive, validating its structure and cross-version invariants
pub fn read_archive(path: &Path) -> Result<ArchiveState> {
    let span = span!(Level::DEBUG, "read_archive", path = %path.display());
    let _enter = span.enter();

    let raw = fs::read(path)?;
    if raw.len() < 8 || &raw[..4] != ARCHIVE_MAGIC {
        return Err(Error::decode(path, "not a vbak archive"));
    }
    let mut version_bytes = [0u8; 4];
    version_bytes.copy_from_slice(&raw[4..8]);
    let format_version = u32::from_le_bytes(version_bytes);
    if format_version != FORMAT_VERSION {
        return Err(Error::decode(
            path,
            format!("unsupported format version {} (expected {})", format_version, FORMAT_VERSION),
        ));
    }

    let mut body = Vec::new();
    GzDecoder::new(&raw[8..])
        .read_to_end(&mut body)
        .map_err(|e| Error::decode(path, format!("corrupt compressed body: {}", e)))?;

    if body.len() < 8 {
        return Err(Error::decode(path, "truncated header"));
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&body[..8]);
    let header_len = usize::try_from(u64::from_le_bytes(len_bytes))
        .map_err(|_| Error::decode(path, "header length out of range"))?;
    let header_end = 8usize
        .checked_add(header_len)
        .filter(|end| *end <= body.len())
        .ok_or_else(|| Error::decode(path, "header length exceeds archive size"))?;

    let header: ArchiveHeader = serde_json::from_slice(&body[8..header_end])
        .map_err(|e| Error::decode(path, format!("invalid header: {}", e)))?;
    if header.format_version != format_version {
        return Err(Error::decode(path, "header format version mismatch"));
    }

    let segment = &body[header_end..];
    let mut blobs = BlobStore::new();
    for entry in header.blobs {
        let start = usize::try_from(entry.offset).ok();
        let end = start.and_then(|s| usize::try_from(entry.length).ok().and_then(|l| s.checked_add(l)));
        let data = match (start, end) {
            (Some(start), Some(end)) if end <= segment.len() => &segment[start..end],
            _ => {
                return Err(Error::decode(
                    path,
                    format!("blob {}:{} lies outside the blob segment", entry.owner, entry.path),
                ))
            }
        };
        blobs.put(BlobKey::new(entry.owner, entry.path), data.to_vec());
    }

    let state = ArchiveState {
        owner_tag: header.owner_tag,
        source_path: header.source_path,
        last_issued_id: header.last_issued_id,
        versions: header.versions,
        blobs,
    };
    validate(&state).map_err(|reason| Error::decode(path, reason))?;

    debug!(
        "Loaded archive: {} versions, {} blobs",
        state.versions.len(),
        state.blobs.len()
    );
    Ok(state)
}

/// Check the invariants every persisted state must satisfy
pub fn validate(state: &ArchiveState) -> std::result::Result<(), String> {
    let mut previous: Option<VersionId> = None;
    for version in &state.versions {
        if previous.is_some_and(|p| version.id <= p) {
            return Err(format!("version ids are not increasing at {}", version.id));
        }
        if version.id > state.last_issued_id {
            return Err(format!(
                "version {} exceeds the issued id mark {}",
                version.id, state.last_issued_id
            ));
        }
        version.check_invariants()?;
        previous = Some(version.id);
    }

    for key in reachable_keys(&state.versions) {
        match state.blobs.get(&key) {
            None => return Err(format!("missing blob for {}", key)),
            Some(data) => {
                let expected = state
                    .versions
                    .iter()
                    .filter_map(|v| v.file(&key.path))
                    .find(|e| e.owner == key.owner)
                    .map(|e| e.size);
                if expected.is_some_and(|size| size != data.len() as u64) {
                    return Err(format!("blob {} has the wrong length", key));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use crate::version::FileEntry;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn sample_state() -> ArchiveState {
        let mut blobs = BlobStore::new();
        let mut files = BTreeMap::new();
        for (path, data) in [("file1.txt", &b"test1"[..]), ("dir/file2.txt", &b"test22"[..])] {
            files.insert(
                path.to_string(),
                FileEntry {
                    size: data.len() as u64,
                    fingerprint: Fingerprint::from_bytes(data),
                    owner: 3,
                },
            );
            blobs.put(BlobKey::new(3, path), data.to_vec());
        }
        // unreachable slot: must not be persisted
        blobs.put(BlobKey::new(1, "stale.txt"), b"old".to_vec());

        ArchiveState {
            owner_tag: "SomeGame".to_string(),
            source_path: Some(PathBuf::from("/saves/somegame")),
            last_issued_id: 4,
            versions: vec![Version::new(3, Utc::now(), files)],
            blobs,
        }
    }

    #[test]
    fn test_round_trip_drops_unreachable_blobs() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("game.vbak");
        let state = sample_state();

        write_archive(&path, &state, &ArchiveConfig::default())?;
        let loaded = read_archive(&path)?;

        assert_eq!(loaded.owner_tag, state.owner_tag);
        assert_eq!(loaded.source_path, state.source_path);
        assert_eq!(loaded.last_issued_id, 4);
        assert_eq!(loaded.versions, state.versions);
        assert_eq!(loaded.blobs.len(), 2);
        assert_eq!(loaded.blobs.get(&BlobKey::new(3, "dir/file2.txt")), Some(&b"test22"[..]));
        Ok(())
    }

    #[test]
    fn test_write_leaves_no_temp_files() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("nested/game.vbak");
        write_archive(&path, &sample_state(), &ArchiveConfig { compression_level: 0 })?;
        write_archive(&path, &sample_state(), &ArchiveConfig::default())?;

        let names: Vec<_> = fs::read_dir(temp_dir.path().join("nested"))?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["game.vbak".to_string()]);
        Ok(())
    }

    #[test]
    fn test_foreign_file_is_a_decode_error() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("junk.vbak");
        fs::write(&path, b"this is not an archive")?;

        assert!(matches!(read_archive(&path), Err(Error::ArchiveDecode { .. })));
        Ok(())
    }

    #[test]
    fn test_truncated_archive_is_a_decode_error() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("game.vbak");
        write_archive(&path, &sample_state(), &ArchiveConfig::default())?;

        let raw = fs::read(&path)?;
        fs::write(&path, &raw[..raw.len() / 2])?;
        assert!(matches!(read_archive(&path), Err(Error::ArchiveDecode { .. })));
        Ok(())
    }

    #[test]
    fn test_validate_detects_missing_blob() {
        let mut state = sample_state();
        state.blobs = BlobStore::new();
        assert!(validate(&state).is_err());
    }

    #[test]
    fn test_write_with_missing_blob_fails_cleanly() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("game.vbak");
        let mut state = sample_state();
        state.blobs.remove(&BlobKey::new(3, "file1.txt"));

        assert!(matches!(
            write_archive(&path, &state, &ArchiveConfig::default()),
            Err(Error::InvalidVersion { id: 3 })
        ));
        assert_eq!(fs::read_dir(temp_dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_validate_detects_reused_ids() {
        let mut state = sample_state();
        state.last_issued_id = 2;
        assert!(validate(&state).is_err());
    }
}
