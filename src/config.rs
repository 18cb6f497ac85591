//! Engine configuration, loadable from TOML

use crate::archive::ArchiveConfig;
use crate::retention::RetentionPolicy;
use crate::scanner::ScannerConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Options shared by every operation on an archive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scanner: ScannerConfig,
    pub archive: ArchiveConfig,
    /// Applied after every save when set
    pub retention: Option<RetentionPolicy>,
}

impl EngineConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| Error::Configuration {
            reason: format!("Failed to parse config {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| Error::Configuration {
            reason: format!("Failed to serialize config: {}", e),
        })?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.archive.compression_level > 9 {
            return Err(Error::Configuration {
                reason: format!(
                    "compression_level must be between 0 and 9, got {}",
                    self.archive.compression_level
                ),
            });
        }
        if let Some(policy) = &self.retention {
            policy.validate()?;
        }
        Ok(())
    }

    pub fn with_retention(mut self, policy: RetentionPolicy) -> Self {
        self.retention = Some(policy);
        self
    }
}
