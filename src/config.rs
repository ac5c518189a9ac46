//! Runtime configuration for metadata extraction.
//!
//! Configuration can be loaded from a JSON file or built from defaults:
//!
//! ```no_run
//! use drone_gsd::config::ResolverConfig;
//! use std::path::Path;
//!
//! let config = ResolverConfig::from_json_file(Path::new("resolver.json"))?;
//! let defaults = ResolverConfig::default();
//! # Ok::<(), drone_gsd::CalibError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CalibError, Result};
use crate::metadata::BackendKind;

/// Settings for the extraction orchestrator and its backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// ExifTool executable (looked up on PATH when not absolute)
    pub exiftool_path: PathBuf,

    /// Deadline for the `-ver` availability probe
    pub probe_timeout_secs: u64,

    /// Deadline for a full metadata dump
    pub extraction_timeout_secs: u64,

    /// Backends to try, in priority order
    pub backends: Vec<BackendKind>,

    /// Run the image-library pass to backfill missing XMP/GPS blocks
    pub supplement: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            exiftool_path: PathBuf::from("exiftool"),
            probe_timeout_secs: 5,
            extraction_timeout_secs: 30,
            backends: BackendKind::PRIORITY.to_vec(),
            supplement: true,
        }
    }
}

impl ResolverConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    /// Same configuration without the external tool.
    pub fn without_exiftool(mut self) -> Self {
        self.backends.retain(|b| *b != BackendKind::ExifTool);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(CalibError::Config("at least one backend must be enabled".to_string()));
        }
        if self.probe_timeout_secs == 0 || self.extraction_timeout_secs == 0 {
            return Err(CalibError::Config("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| CalibError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CalibError::Config(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
