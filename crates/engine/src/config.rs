//! Engine configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Smallest copy buffer the engine will use.
const MIN_BUFFER_SIZE: usize = 512;

/// Settings shared by every operation an [`ArchiveEngine`](crate::ArchiveEngine)
/// runs. Constructed once by the host and passed in explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory for materialized sources
    pub scratch_dir: PathBuf,

    /// Copy buffer size in bytes used when materializing sources
    pub buffer_size: usize,

    /// Compression level (0-9) hosts use when the request does not set one
    pub default_compression_level: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir(),
            buffer_size: 8 * 1024,
            default_compression_level: 6,
        }
    }
}

impl EngineConfig {
    /// Load settings from a TOML file; absent keys keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub(crate) fn effective_buffer_size(&self) -> usize {
        self.buffer_size.max(MIN_BUFFER_SIZE)
    }
}
