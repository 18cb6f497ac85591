//! # vbak
//!
//! Versioned, deduplicating backups of directory trees stored in a single
//! archive file.
//!
//! ## Features
//!
//! - **Snapshots**: every save appends an immutable, numbered version
//! - **Deduplication**: unchanged files (by BLAKE3 fingerprint) are stored once
//!   and referenced from later versions through an owner pointer
//! - **Retention**: compaction keeps the newest versions restorable while
//!   reclaiming the bytes nothing references anymore
//! - **Restore**: latest or any retained version, onto any directory
//! - **Atomic persistence**: archives are replaced via temp file and rename
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vbak::{Backup, PathFilter};
//!
//! # fn main() -> vbak::Result<()> {
//! let mut backup = Backup::open("saves/SomeGame_1A2B3C.vbak")?;
//! backup.build("/home/me/.local/share/SomeGame", &PathFilter::new(&["*.sav"], &[])?)?;
//! let id = backup.save()?;
//! backup.autotrim(5, 10)?;
//! backup.restore_at(id, "/tmp/restored")?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod backup;
pub mod blob;
pub mod builder;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod fingerprint;
pub mod logging;
pub mod restore;
pub mod retention;
pub mod scanner;
pub mod version;

// Re-export commonly used types
pub use backup::{Backup, BuildReport};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use filter::PathFilter;
pub use restore::RestoreReport;
pub use retention::{CompactionReport, RetentionPolicy};
pub use version::{FileEntry, Version, VersionId};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
